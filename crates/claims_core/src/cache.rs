//! crates/claims_core/src/cache.rs
//!
//! The in-memory keyed store that list and detail views read from.
//!
//! Each key holds a confirmed value plus one speculative layer per in-flight
//! mutation, applied in the order the mutations were issued. The visible value is
//! the confirmed value with every layer applied on top. Committing a mutation folds
//! the server's answer into the confirmed value; rolling back drops its layer. Either
//! way the newer layers are re-applied, so settling an earlier mutation never erases
//! a later one and never restores state captured before it.
//!
//! Every change of a visible value bumps the key's generation. Background refreshes
//! capture a generation before they suspend and only apply their result if the key
//! has not moved on in the meantime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{ClaimDetail, ClaimSummary, LocalId, ResourceId, ShareLinkState};

//=========================================================================================
// Keys, Values and Generations
//=========================================================================================

/// Addresses one cacheable resource or resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    ClaimsList,
    Claim(ResourceId),
    ShareLink(ResourceId),
}

impl CacheKey {
    fn references(&self, local: LocalId) -> bool {
        match self {
            CacheKey::ClaimsList => false,
            CacheKey::Claim(id) | CacheKey::ShareLink(id) => *id == ResourceId::Pending(local),
        }
    }

    fn promoted(self, local: LocalId, server: Uuid) -> CacheKey {
        match self {
            CacheKey::ClaimsList => CacheKey::ClaimsList,
            CacheKey::Claim(mut id) => {
                id.promote(local, server);
                CacheKey::Claim(id)
            }
            CacheKey::ShareLink(mut id) => {
                id.promote(local, server);
                CacheKey::ShareLink(id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    ClaimsList(Vec<ClaimSummary>),
    Claim(ClaimDetail),
    ShareLink(ShareLinkState),
}

impl CacheValue {
    pub fn as_claims_list(&self) -> Option<&[ClaimSummary]> {
        match self {
            CacheValue::ClaimsList(claims) => Some(claims),
            _ => None,
        }
    }

    pub fn as_claim(&self) -> Option<&ClaimDetail> {
        match self {
            CacheValue::Claim(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn as_share_link(&self) -> Option<&ShareLinkState> {
        match self {
            CacheValue::ShareLink(state) => Some(state),
            _ => None,
        }
    }

    /// Rewrites every reference to the pending id. Returns whether anything changed.
    pub fn promote_ids(&mut self, local: LocalId, server: Uuid) -> bool {
        match self {
            CacheValue::ClaimsList(claims) => claims
                .iter_mut()
                .fold(false, |changed, summary| summary.claim.promote_ids(local, server) || changed),
            CacheValue::Claim(detail) => detail.promote_ids(local, server),
            CacheValue::ShareLink(_) => false,
        }
    }
}

/// A per-key write counter. Never decreases, survives removal of the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    fn bump(&mut self) -> Generation {
        self.0 += 1;
        *self
    }
}

/// The result of a generation-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    DiscardedStale,
}

//=========================================================================================
// Snapshots, Layers and Refresh Tickets
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub key: CacheKey,
    pub value: Option<CacheValue>,
    pub generation: Generation,
}

/// Values of a set of keys captured under a single lock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    pub fn value(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == *key)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }
}

/// Derives a key's next value from its previous one. Must leave values it does not
/// understand untouched, since it is re-applied whenever the state below it changes.
pub type Transform = Arc<dyn Fn(Option<CacheValue>) -> Option<CacheValue> + Send + Sync>;

/// Identifies the speculative layers of one mutation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(u64);

struct Layer {
    id: LayerId,
    transform: Option<Transform>,
}

/// What a speculation did: the snapshot its plan saw, the layer it registered and the
/// generation of every key whose visible value it changed.
#[derive(Debug, Clone)]
pub struct Speculation {
    pub layer: LayerId,
    pub snapshot: Snapshot,
    pub written: Vec<(CacheKey, Generation)>,
}

/// Registration of a background refresh for one key.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    pub key: CacheKey,
    pub token: CancellationToken,
    generation: Generation,
    serial: u64,
}

struct InFlightRefresh {
    token: CancellationToken,
    serial: u64,
}

//=========================================================================================
// The Cache
//=========================================================================================

struct Slot {
    confirmed: Option<CacheValue>,
    layers: Vec<Layer>,
    value: Option<CacheValue>,
    generation: Generation,
    notifier: watch::Sender<Option<CacheValue>>,
    refresh: Option<InFlightRefresh>,
}

impl Slot {
    fn new() -> Self {
        let (notifier, _) = watch::channel(None);
        Self {
            confirmed: None,
            layers: Vec::new(),
            value: None,
            generation: Generation::default(),
            notifier,
            refresh: None,
        }
    }

    fn write(&mut self, value: Option<CacheValue>) -> Generation {
        self.value = value;
        self.notifier.send_replace(self.value.clone());
        self.generation.bump()
    }

    /// Replaces the whole state of the key. Layers of in-flight mutations no longer
    /// apply to it.
    fn overwrite(&mut self, value: Option<CacheValue>) -> Generation {
        self.layers.clear();
        self.confirmed = value.clone();
        self.write(value)
    }

    /// Recomputes the visible value; writes only if it changed.
    fn restack(&mut self) -> Option<Generation> {
        let next = self
            .layers
            .iter()
            .filter_map(|layer| layer.transform.as_ref())
            .fold(self.confirmed.clone(), |value, transform| (**transform)(value));
        (next != self.value).then(|| self.write(next))
    }

    fn has_mutations(&self) -> bool {
        !self.layers.is_empty()
    }
}

#[derive(Default)]
struct Slots {
    map: HashMap<CacheKey, Slot>,
    next_refresh_serial: u64,
    next_layer: u64,
}

impl Slots {
    fn slot(&mut self, key: CacheKey) -> &mut Slot {
        self.map.entry(key).or_insert_with(Slot::new)
    }
}

/// The single shared store of server-resource snapshots for one application session.
///
/// Construct one per session and share it by reference (`Arc`) with the executor
/// and the views. All operations are synchronous and never touch the network.
#[derive(Default)]
pub struct MutationCache {
    slots: Mutex<Slots>,
}

impl MutationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        self.lock().map.get(key).and_then(|slot| slot.value.clone())
    }

    pub fn generation(&self, key: &CacheKey) -> Generation {
        self.lock()
            .map
            .get(key)
            .map(|slot| slot.generation)
            .unwrap_or_default()
    }

    /// Replaces the value and notifies subscribers before returning. In-flight
    /// mutations stop affecting the key.
    pub fn set(&self, key: CacheKey, value: CacheValue) -> Generation {
        self.lock().slot(key).overwrite(Some(value))
    }

    pub fn remove(&self, key: &CacheKey) -> Generation {
        self.lock().slot(*key).overwrite(None)
    }

    /// Writes only if the key is still at `expected`.
    pub fn set_if_generation(
        &self,
        key: CacheKey,
        expected: Generation,
        value: CacheValue,
    ) -> ReconcileOutcome {
        self.write_if_generation(key, expected, Some(value))
    }

    pub fn remove_if_generation(&self, key: &CacheKey, expected: Generation) -> ReconcileOutcome {
        self.write_if_generation(*key, expected, None)
    }

    fn write_if_generation(
        &self,
        key: CacheKey,
        expected: Generation,
        value: Option<CacheValue>,
    ) -> ReconcileOutcome {
        let mut slots = self.lock();
        let slot = slots.slot(key);
        if slot.generation != expected {
            debug!(
                ?key,
                expected = expected.0,
                current = slot.generation.0,
                "Discarding stale write"
            );
            return ReconcileOutcome::DiscardedStale;
        }
        slot.overwrite(value);
        ReconcileOutcome::Applied
    }

    /// Reads a value together with its generation under one lock.
    pub fn get_with_generation(&self, key: &CacheKey) -> (Option<CacheValue>, Generation) {
        self.lock()
            .map
            .get(key)
            .map(|slot| (slot.value.clone(), slot.generation))
            .unwrap_or_default()
    }

    /// Observes every write to `key`. The receiver starts at the current value.
    pub fn subscribe(&self, key: &CacheKey) -> watch::Receiver<Option<CacheValue>> {
        self.lock().slot(*key).notifier.subscribe()
    }

    //-------------------------------------------------------------------------------------
    // Background refreshes
    //-------------------------------------------------------------------------------------

    /// Registers a refresh of `key`, cancelling any earlier one still in flight.
    pub fn begin_refresh(&self, key: CacheKey) -> RefreshTicket {
        let mut slots = self.lock();
        slots.next_refresh_serial += 1;
        let serial = slots.next_refresh_serial;
        let slot = slots.slot(key);
        if let Some(previous) = slot.refresh.take() {
            previous.token.cancel();
        }
        let token = CancellationToken::new();
        slot.refresh = Some(InFlightRefresh {
            token: token.clone(),
            serial,
        });
        RefreshTicket {
            key,
            token,
            generation: slot.generation,
            serial,
        }
    }

    /// Applies a refresh result unless it was cancelled, the key was written since the
    /// refresh began, or a user mutation is in flight on the key.
    pub fn complete_refresh(
        &self,
        ticket: &RefreshTicket,
        value: Option<CacheValue>,
    ) -> ReconcileOutcome {
        let mut slots = self.lock();
        let slot = slots.slot(ticket.key);
        if slot
            .refresh
            .as_ref()
            .is_some_and(|current| current.serial == ticket.serial)
        {
            slot.refresh = None;
        }
        if ticket.token.is_cancelled()
            || slot.generation != ticket.generation
            || slot.has_mutations()
        {
            debug!(key = ?ticket.key, "Discarding background refresh result");
            return ReconcileOutcome::DiscardedStale;
        }
        slot.overwrite(value);
        ReconcileOutcome::Applied
    }

    /// Tells a pending background refresh of `key` to drop its result.
    pub fn cancel_in_flight(&self, key: &CacheKey) {
        if let Some(slot) = self.lock().map.get_mut(key) {
            if let Some(refresh) = slot.refresh.take() {
                debug!(?key, "Cancelling in-flight refresh");
                refresh.token.cancel();
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Mutation support
    //-------------------------------------------------------------------------------------

    /// Snapshots `keys`, lets `plan` derive a transform per key from that snapshot, and
    /// stacks the transforms as a new layer, all under one lock. If `plan` fails nothing
    /// is written and no layer is registered.
    ///
    /// On success any background refresh of `keys` is cancelled, and every key counts
    /// as having an active mutation until [`MutationCache::settle`] is called for the
    /// layer. Keys without a transform carry an empty layer.
    pub fn speculate<E, F>(&self, keys: &[CacheKey], plan: F) -> Result<Speculation, E>
    where
        F: FnOnce(&Snapshot) -> Result<Vec<(CacheKey, Transform)>, E>,
    {
        let mut slots = self.lock();
        let snapshot = Snapshot {
            entries: keys
                .iter()
                .map(|key| {
                    let (value, generation) = slots
                        .map
                        .get(key)
                        .map(|slot| (slot.value.clone(), slot.generation))
                        .unwrap_or_default();
                    SnapshotEntry {
                        key: *key,
                        value,
                        generation,
                    }
                })
                .collect(),
        };

        let mut transforms = plan(&snapshot)?;

        slots.next_layer += 1;
        let layer = LayerId(slots.next_layer);
        let mut written = Vec::new();
        for key in keys {
            let transform = transforms
                .iter()
                .position(|(target, _)| target == key)
                .map(|index| transforms.swap_remove(index).1);
            let slot = slots.slot(*key);
            // Nothing can land while the lock is held, so cancelling after the
            // snapshot is equivalent to cancelling before it.
            if let Some(refresh) = slot.refresh.take() {
                debug!(?key, "Cancelling in-flight refresh");
                refresh.token.cancel();
            }
            slot.layers.push(Layer {
                id: layer,
                transform,
            });
            if let Some(generation) = slot.restack() {
                written.push((*key, generation));
            }
        }
        debug_assert!(transforms.is_empty(), "transform for a key outside the plan");

        Ok(Speculation {
            layer,
            snapshot,
            written,
        })
    }

    /// Ends a mutation: removes its layer from every key, folds each commit transform
    /// into the confirmed value of its key, and re-applies the remaining layers.
    /// Settling with no commits is a rollback.
    ///
    /// A commit reaches the confirmed value only where the layer was still present;
    /// a key overwritten directly since the speculation reports `DiscardedStale`.
    pub fn settle(
        &self,
        layer: LayerId,
        commits: Vec<(CacheKey, Transform)>,
    ) -> Vec<(CacheKey, ReconcileOutcome)> {
        let mut slots = self.lock();
        let mut outcomes = Vec::new();
        for (key, slot) in slots.map.iter_mut() {
            let before = slot.layers.len();
            slot.layers.retain(|l| l.id != layer);
            let had_layer = slot.layers.len() != before;

            let commit = commits.iter().find(|(target, _)| target == key);
            if let Some((_, transform)) = commit {
                let outcome = if had_layer {
                    slot.confirmed = (**transform)(slot.confirmed.take());
                    ReconcileOutcome::Applied
                } else {
                    debug!(?key, "Key was overwritten, commit skipped");
                    ReconcileOutcome::DiscardedStale
                };
                outcomes.push((*key, outcome));
            }
            if had_layer {
                slot.restack();
                if slot.has_mutations() {
                    debug!(?key, pending = slot.layers.len(), "Newer mutations stay on top");
                }
            }
        }
        for (key, _) in &commits {
            if !outcomes.iter().any(|(settled, _)| settled == key) {
                outcomes.push((*key, ReconcileOutcome::DiscardedStale));
            }
        }
        outcomes
    }

    /// Replaces every reference to `local` with `server`, re-keying entries addressed by
    /// the pending id. Subscribers of a re-keyed entry keep receiving its updates.
    ///
    /// Promotion relabels existing state and does not bump generations.
    pub fn promote_identifier(&self, local: LocalId, server: Uuid) {
        let mut slots = self.lock();

        let pending: Vec<CacheKey> = slots
            .map
            .keys()
            .filter(|key| key.references(local))
            .copied()
            .collect();
        for key in pending {
            let Some(mut slot) = slots.map.remove(&key) else {
                continue;
            };
            for value in [slot.confirmed.as_mut(), slot.value.as_mut()].into_iter().flatten() {
                value.promote_ids(local, server);
            }
            let target = key.promoted(local, server);
            match slots.map.get_mut(&target) {
                None => {
                    slot.notifier.send_replace(slot.value.clone());
                    slots.map.insert(target, slot);
                }
                Some(existing) => {
                    if existing.value.is_none() && !existing.has_mutations() {
                        existing.overwrite(slot.value.take());
                    }
                    slot.notifier.send_replace(existing.value.clone());
                }
            }
        }

        for slot in slots.map.values_mut() {
            if let Some(confirmed) = slot.confirmed.as_mut() {
                confirmed.promote_ids(local, server);
            }
            if let Some(value) = slot.value.as_mut() {
                if value.promote_ids(local, server) {
                    slot.notifier.send_replace(slot.value.clone());
                }
            }
        }
        debug!(%local, %server, "Promoted identifier");
    }

    /// Every key that currently holds a value.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock()
            .map
            .iter()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(key, _)| *key)
            .collect()
    }
}
