//! crates/claims_core/src/executor.rs
//!
//! Runs user-initiated writes against the cache and the claims API.
//!
//! Each mutation goes through the same phases: cancel background refreshes of the
//! keys it touches, snapshot them, push a speculative layer, await the server, then
//! either fold the server's answer into the confirmed state or drop the layer. Newer
//! layers are re-applied on top in both cases, so a slow response never hides a later
//! mutation and a failed one never resurrects state another mutation removed.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{
    CacheKey, CacheValue, MutationCache, ReconcileOutcome, Snapshot, Speculation, Transform,
};
use crate::domain::{
    Attachment, AttachmentUpload, Claim, ClaimDetail, ClaimPatch, ClaimSummary, Item, ItemOrder,
    ItemPatch, LocalId, NewClaim, NewItem, ResourceId, ShareLink, ShareLinkState,
    ValidationError,
};
use crate::ports::{ClaimsApi, PortError, PortResult};

//=========================================================================================
// Errors and Phases
//=========================================================================================

/// Why a mutation did not commit. Every variant except `Precondition` means the
/// speculative state was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MutationError {
    /// Rejected locally; the cache was never touched.
    #[error("Precondition failed: {0}")]
    Precondition(String),
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Server rejected the mutation ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl From<ValidationError> for MutationError {
    fn from(err: ValidationError) -> Self {
        MutationError::Precondition(err.to_string())
    }
}

impl From<PortError> for MutationError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Transport(message) => MutationError::Transport(message),
            PortError::Status { status, message } => MutationError::Server { status, message },
            PortError::NotFound(message) => MutationError::Server {
                status: 404,
                message,
            },
            PortError::Conflict(message) => MutationError::Server {
                status: 409,
                message,
            },
            PortError::Invalid(message) => MutationError::Server {
                status: 400,
                message,
            },
            PortError::Malformed(message) => MutationError::MalformedResponse(message),
            PortError::Unexpected(message) => MutationError::Transport(message),
        }
    }
}

/// Lifecycle of a single mutation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Snapshotting,
    Speculating,
    InFlight,
    Committed,
    RolledBack,
}

type Transforms = Vec<(CacheKey, Transform)>;

//=========================================================================================
// A Single Attempt
//=========================================================================================

/// Tracks one mutation from speculation to settlement. Dropping it before it settles
/// rolls it back.
struct Attempt<'a> {
    cache: &'a MutationCache,
    kind: &'static str,
    speculation: Speculation,
    phase: MutationPhase,
}

impl<'a> Attempt<'a> {
    fn start<F>(
        cache: &'a MutationCache,
        kind: &'static str,
        keys: Vec<CacheKey>,
        plan: F,
    ) -> Result<Self, MutationError>
    where
        F: FnOnce(&Snapshot) -> Result<Transforms, MutationError>,
    {
        debug!(mutation = kind, phase = ?MutationPhase::Snapshotting);
        let speculation = cache.speculate(&keys, |snapshot| {
            debug!(mutation = kind, phase = ?MutationPhase::Speculating);
            plan(snapshot)
        })?;
        debug!(
            mutation = kind,
            phase = ?MutationPhase::InFlight,
            written = speculation.written.len()
        );
        Ok(Self {
            cache,
            kind,
            speculation,
            phase: MutationPhase::InFlight,
        })
    }

    /// Folds the server's answer into the confirmed state of each key.
    fn commit(mut self, commits: Transforms) {
        let outcomes = self.cache.settle(self.speculation.layer, commits);
        let stale = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == ReconcileOutcome::DiscardedStale)
            .count();
        self.phase = MutationPhase::Committed;
        debug!(mutation = self.kind, phase = ?self.phase, stale);
    }

    /// Withdraws the speculative state and hands back the error.
    fn roll_back(mut self, error: MutationError) -> MutationError {
        self.cache.settle(self.speculation.layer, Vec::new());
        self.phase = MutationPhase::RolledBack;
        warn!(mutation = self.kind, phase = ?self.phase, "Mutation failed: {}", error);
        error
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.phase == MutationPhase::InFlight {
            warn!(mutation = self.kind, "Mutation dropped before settling, rolling back");
            self.cache.settle(self.speculation.layer, Vec::new());
            self.phase = MutationPhase::RolledBack;
        }
    }
}

//=========================================================================================
// The Executor
//=========================================================================================

/// Orchestrates optimistic mutations and background refreshes for one session.
pub struct OptimisticExecutor {
    cache: Arc<MutationCache>,
    api: Arc<dyn ClaimsApi>,
    next_local_id: AtomicU64,
}

impl OptimisticExecutor {
    pub fn new(cache: Arc<MutationCache>, api: Arc<dyn ClaimsApi>) -> Self {
        Self {
            cache,
            api,
            next_local_id: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &Arc<MutationCache> {
        &self.cache
    }

    fn allocate_local_id(&self) -> LocalId {
        LocalId(self.next_local_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    //-------------------------------------------------------------------------------------
    // Claims
    //-------------------------------------------------------------------------------------

    /// Inserts a placeholder at the top of the list and as its own detail entry, then
    /// promotes its temporary id once the server assigns one.
    pub async fn create_claim(&self, input: NewClaim) -> Result<Claim, MutationError> {
        input.validate()?;
        let local = self.allocate_local_id();
        let pending = ResourceId::Pending(local);
        let placeholder = placeholder_claim(pending, &input);
        let detail_key = CacheKey::Claim(pending);

        let attempt = Attempt::start(
            &self.cache,
            "create_claim",
            vec![CacheKey::ClaimsList, detail_key],
            |_| {
                Ok(vec![
                    (CacheKey::ClaimsList, insert_claim(placeholder.clone())),
                    (detail_key, new_detail(placeholder)),
                ])
            },
        )?;

        let result = self.api.create_claim(&input).await;
        let (claim, server_id) = match settle(result, |claim| server_id(&claim.id)) {
            Ok(settled) => settled,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        attempt.commit(vec![
            (CacheKey::ClaimsList, insert_claim(claim.clone())),
            (detail_key, new_detail(claim.clone())),
        ]);
        self.cache.promote_identifier(local, server_id);
        info!(claim_id = %server_id, "Claim created");
        Ok(claim)
    }

    /// Applies only the patched fields to the list and detail entries.
    pub async fn update_claim(
        &self,
        claim_id: ResourceId,
        patch: ClaimPatch,
    ) -> Result<Claim, MutationError> {
        patch.validate()?;
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let detail_key = CacheKey::Claim(claim_id);

        let speculative = patch.clone();
        let attempt = Attempt::start(
            &self.cache,
            "update_claim",
            vec![CacheKey::ClaimsList, detail_key],
            |_| {
                let patch = Arc::new(speculative);
                let in_detail = patch.clone();
                Ok(vec![
                    (
                        CacheKey::ClaimsList,
                        on_list(move |claims| {
                            for summary in claims.iter_mut().filter(|s| s.claim.id == claim_id) {
                                patch.apply_to(&mut summary.claim);
                            }
                        }),
                    ),
                    (detail_key, on_detail(move |detail| in_detail.apply_to(&mut detail.claim))),
                ])
            },
        )?;

        let claim = match settle(self.api.update_claim(server_claim_id, &patch).await, |_| Ok(())) {
            Ok((claim, ())) => claim,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        attempt.commit(vec![
            (CacheKey::ClaimsList, replace_claim(claim.clone())),
            (detail_key, {
                let claim = claim.clone();
                on_detail(move |detail| detail.claim = claim.clone())
            }),
        ]);
        Ok(claim)
    }

    /// Removes the claim from the list and marks its detail and share entries absent.
    pub async fn delete_claim(&self, claim_id: ResourceId) -> Result<(), MutationError> {
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let keys = vec![
            CacheKey::ClaimsList,
            CacheKey::Claim(claim_id),
            CacheKey::ShareLink(claim_id),
        ];
        let removal = move || -> Transforms {
            vec![
                (CacheKey::ClaimsList, remove_claim(claim_id)),
                (CacheKey::Claim(claim_id), absent()),
                (CacheKey::ShareLink(claim_id), absent()),
            ]
        };

        let attempt = Attempt::start(&self.cache, "delete_claim", keys, |_| Ok(removal()))?;

        if let Err(error) = settle(self.api.delete_claim(server_claim_id).await, |_| Ok(())) {
            return Err(attempt.roll_back(error));
        }
        attempt.commit(removal());
        info!(claim_id = %server_claim_id, "Claim deleted");
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Items
    //-------------------------------------------------------------------------------------

    /// Inserts a placeholder item at order 0 and shifts the existing items by one in the
    /// same write.
    pub async fn create_item(
        &self,
        claim_id: ResourceId,
        input: NewItem,
    ) -> Result<Item, MutationError> {
        input.validate()?;
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let local = self.allocate_local_id();
        let pending = ResourceId::Pending(local);
        let detail_key = CacheKey::Claim(claim_id);
        let now = Utc::now();
        let placeholder = Item {
            id: pending,
            claim_id,
            title: input.title.clone(),
            description: input.description.clone(),
            order: 0,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let attempt = Attempt::start(
            &self.cache,
            "create_item",
            vec![detail_key, CacheKey::ClaimsList],
            |_| {
                Ok(vec![
                    (detail_key, insert_item(placeholder)),
                    (CacheKey::ClaimsList, adjust_item_count(claim_id, 1)),
                ])
            },
        )?;

        let result = self.api.create_item(server_claim_id, &input).await;
        let (item, server_id) = match settle(result, |item| server_id(&item.id)) {
            Ok(settled) => settled,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        attempt.commit(vec![
            (detail_key, insert_item(item.clone())),
            (CacheKey::ClaimsList, adjust_item_count(claim_id, 1)),
        ]);
        self.cache.promote_identifier(local, server_id);
        Ok(item)
    }

    pub async fn update_item(
        &self,
        claim_id: ResourceId,
        item_id: ResourceId,
        patch: ItemPatch,
    ) -> Result<Item, MutationError> {
        patch.validate()?;
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let server_item_id = require_confirmed(item_id, "item")?;
        let detail_key = CacheKey::Claim(claim_id);

        let speculative = patch.clone();
        let attempt = Attempt::start(&self.cache, "update_item", vec![detail_key], |_| {
            Ok(vec![(
                detail_key,
                on_detail(move |detail| {
                    if let Some(item) = detail.item_mut(item_id) {
                        speculative.apply_to(item);
                    }
                }),
            )])
        })?;

        let result = self
            .api
            .update_item(server_claim_id, server_item_id, &patch)
            .await;
        let item = match settle(result, |_| Ok(())) {
            Ok((item, ())) => item,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        let committed = item.clone();
        attempt.commit(vec![(
            detail_key,
            on_detail(move |detail| {
                if let Some(slot) = detail.item_mut(item_id) {
                    *slot = committed.clone();
                    detail.sort_items();
                }
            }),
        )]);
        Ok(item)
    }

    /// Removes the item from its claim. The other items keep their order values.
    pub async fn delete_item(
        &self,
        claim_id: ResourceId,
        item_id: ResourceId,
    ) -> Result<(), MutationError> {
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let server_item_id = require_confirmed(item_id, "item")?;
        let detail_key = CacheKey::Claim(claim_id);
        let removal = move || -> Transforms {
            vec![
                (
                    detail_key,
                    on_detail(move |detail| detail.items.retain(|item| item.id != item_id)),
                ),
                (CacheKey::ClaimsList, adjust_item_count(claim_id, -1)),
            ]
        };

        let attempt = Attempt::start(
            &self.cache,
            "delete_item",
            vec![detail_key, CacheKey::ClaimsList],
            |_| Ok(removal()),
        )?;

        let result = self.api.delete_item(server_claim_id, server_item_id).await;
        if let Err(error) = settle(result, |_| Ok(())) {
            return Err(attempt.roll_back(error));
        }
        attempt.commit(removal());
        Ok(())
    }

    /// Assigns orders `0..n` following `ordered` to every item of the claim in one write.
    pub async fn reorder_items(
        &self,
        claim_id: ResourceId,
        ordered: Vec<ResourceId>,
    ) -> Result<(), MutationError> {
        if ordered.is_empty() {
            return Err(ValidationError::EmptyReorder.into());
        }
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let entries = ordered
            .iter()
            .enumerate()
            .map(|(index, id)| {
                Ok(ItemOrder {
                    id: require_confirmed(*id, "item")?,
                    order: index as i32,
                })
            })
            .collect::<Result<Vec<_>, MutationError>>()?;
        let detail_key = CacheKey::Claim(claim_id);
        let ordered = Arc::new(ordered);

        let attempt = Attempt::start(&self.cache, "reorder_items", vec![detail_key], |snapshot| {
            if let Some(detail) = snapshot.value(&detail_key).and_then(CacheValue::as_claim) {
                let cached: HashSet<ResourceId> = detail.items.iter().map(|item| item.id).collect();
                let requested: HashSet<ResourceId> = ordered.iter().copied().collect();
                if cached != requested || requested.len() != ordered.len() {
                    return Err(ValidationError::ReorderMismatch.into());
                }
            }
            Ok(vec![(detail_key, reorder(ordered.clone()))])
        })?;

        let result = self.api.reorder_items(server_claim_id, &entries).await;
        if let Err(error) = settle(result, |_| Ok(())) {
            return Err(attempt.roll_back(error));
        }
        attempt.commit(vec![(detail_key, reorder(ordered))]);
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Attachments
    //-------------------------------------------------------------------------------------

    /// Shows a placeholder attachment on the item while the upload runs.
    pub async fn upload_attachment(
        &self,
        claim_id: ResourceId,
        item_id: ResourceId,
        upload: AttachmentUpload,
    ) -> Result<Attachment, MutationError> {
        if upload.bytes.is_empty() {
            return Err(ValidationError::EmptyUpload.into());
        }
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let server_item_id = require_confirmed(item_id, "item")?;
        let local = self.allocate_local_id();
        let pending = ResourceId::Pending(local);
        let detail_key = CacheKey::Claim(claim_id);
        let placeholder = Attachment {
            id: pending,
            item_id,
            filename: upload.filename.clone(),
            url: String::new(),
            thumbnail_url: None,
            mime_type: upload.mime_type.clone(),
            size: upload.bytes.len() as i64,
            width: None,
            height: None,
            storage_key: String::new(),
            created_at: Utc::now(),
        };

        let attempt = Attempt::start(
            &self.cache,
            "upload_attachment",
            vec![detail_key],
            |_| Ok(vec![(detail_key, add_attachment(item_id, placeholder))]),
        )?;

        let result = self
            .api
            .upload_attachment(server_claim_id, server_item_id, &upload)
            .await;
        let (attachment, server_id) = match settle(result, |a| server_id(&a.id)) {
            Ok(settled) => settled,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        attempt.commit(vec![(detail_key, add_attachment(item_id, attachment.clone()))]);
        self.cache.promote_identifier(local, server_id);
        Ok(attachment)
    }

    pub async fn delete_attachment(
        &self,
        claim_id: ResourceId,
        item_id: ResourceId,
        attachment_id: ResourceId,
    ) -> Result<(), MutationError> {
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let server_item_id = require_confirmed(item_id, "item")?;
        let server_attachment_id = require_confirmed(attachment_id, "attachment")?;
        let detail_key = CacheKey::Claim(claim_id);
        let removal = move || {
            on_detail(move |detail| {
                if let Some(item) = detail.item_mut(item_id) {
                    item.attachments.retain(|a| a.id != attachment_id);
                }
            })
        };

        let attempt = Attempt::start(
            &self.cache,
            "delete_attachment",
            vec![detail_key],
            |_| Ok(vec![(detail_key, removal())]),
        )?;

        let result = self
            .api
            .delete_attachment(server_claim_id, server_item_id, server_attachment_id)
            .await;
        if let Err(error) = settle(result, |_| Ok(())) {
            return Err(attempt.roll_back(error));
        }
        attempt.commit(vec![(detail_key, removal())]);
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Share Links
    //-------------------------------------------------------------------------------------

    /// Stores exactly the link the server returns; nothing is synthesized locally.
    pub async fn create_share_link(&self, claim_id: ResourceId) -> Result<ShareLink, MutationError> {
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let share_key = CacheKey::ShareLink(claim_id);

        let attempt = Attempt::start(&self.cache, "create_share_link", vec![share_key], |_| {
            Ok(Transforms::new())
        })?;

        let link = match settle(self.api.create_share_link(server_claim_id).await, |_| Ok(())) {
            Ok((link, ())) => link,
            Err(error) => return Err(attempt.roll_back(error)),
        };

        attempt.commit(vec![(
            share_key,
            share_state(ShareLinkState::Shared(link.clone())),
        )]);
        Ok(link)
    }

    /// Speculatively marks the claim as not shared.
    pub async fn revoke_share_link(&self, claim_id: ResourceId) -> Result<(), MutationError> {
        let server_claim_id = require_confirmed(claim_id, "claim")?;
        let share_key = CacheKey::ShareLink(claim_id);

        let attempt = Attempt::start(&self.cache, "revoke_share_link", vec![share_key], |_| {
            Ok(vec![(share_key, share_state(ShareLinkState::NotShared))])
        })?;

        let result = self.api.revoke_share_link(server_claim_id).await;
        if let Err(error) = settle(result, |_| Ok(())) {
            return Err(attempt.roll_back(error));
        }
        attempt.commit(vec![(share_key, share_state(ShareLinkState::NotShared))]);
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // Background Refreshes
    //-------------------------------------------------------------------------------------

    pub async fn refresh_claims_list(&self) -> PortResult<ReconcileOutcome> {
        self.refresh(CacheKey::ClaimsList, self.api.list_claims(), |claims| {
            Some(CacheValue::ClaimsList(claims))
        })
        .await
    }

    /// A claim the server no longer has is removed from the cache.
    pub async fn refresh_claim(&self, claim_id: Uuid) -> PortResult<ReconcileOutcome> {
        let fetch = async {
            match self.api.get_claim(claim_id).await {
                Ok(detail) => Ok(Some(detail)),
                Err(PortError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        };
        self.refresh(CacheKey::Claim(claim_id.into()), fetch, |detail| {
            detail.map(|mut detail| {
                detail.sort_items();
                CacheValue::Claim(detail)
            })
        })
        .await
    }

    pub async fn refresh_share_link(&self, claim_id: Uuid) -> PortResult<ReconcileOutcome> {
        self.refresh(
            CacheKey::ShareLink(claim_id.into()),
            self.api.get_share_link(claim_id),
            |link| {
                Some(CacheValue::ShareLink(match link {
                    Some(link) => ShareLinkState::Shared(link),
                    None => ShareLinkState::NotShared,
                }))
            },
        )
        .await
    }

    async fn refresh<T, Fut, F>(
        &self,
        key: CacheKey,
        fetch: Fut,
        into_value: F,
    ) -> PortResult<ReconcileOutcome>
    where
        Fut: Future<Output = PortResult<T>>,
        F: FnOnce(T) -> Option<CacheValue>,
    {
        let ticket = self.cache.begin_refresh(key);
        tokio::select! {
            _ = ticket.token.cancelled() => {
                debug!(?key, "Refresh cancelled before the response arrived");
                Ok(ReconcileOutcome::DiscardedStale)
            }
            result = fetch => {
                let value = result?;
                Ok(self.cache.complete_refresh(&ticket, into_value(value)))
            }
        }
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Maps a port result into the executor's error taxonomy, with an extra check on the
/// returned value.
fn settle<T, U, F>(result: PortResult<T>, check: F) -> Result<(T, U), MutationError>
where
    F: FnOnce(&T) -> Result<U, MutationError>,
{
    let value = result?;
    let checked = check(&value)?;
    Ok((value, checked))
}

fn server_id(id: &ResourceId) -> Result<Uuid, MutationError> {
    id.confirmed().ok_or_else(|| {
        MutationError::MalformedResponse(format!("server returned unconfirmed id {}", id))
    })
}

fn require_confirmed(id: ResourceId, what: &str) -> Result<Uuid, MutationError> {
    id.confirmed().ok_or_else(|| {
        MutationError::Precondition(format!("{} {} has not been saved yet", what, id))
    })
}

//-----------------------------------------------------------------------------------------
// Transforms
//-----------------------------------------------------------------------------------------

// Each transform is re-applied whenever an older mutation settles, so it must leave
// values of another shape untouched and must not depend on how often it ran.

fn on_list<F>(f: F) -> Transform
where
    F: Fn(&mut Vec<ClaimSummary>) + Send + Sync + 'static,
{
    Arc::new(move |value| match value {
        Some(CacheValue::ClaimsList(mut claims)) => {
            f(&mut claims);
            Some(CacheValue::ClaimsList(claims))
        }
        other => other,
    })
}

fn on_detail<F>(f: F) -> Transform
where
    F: Fn(&mut ClaimDetail) + Send + Sync + 'static,
{
    Arc::new(move |value| match value {
        Some(CacheValue::Claim(mut detail)) => {
            f(&mut detail);
            Some(CacheValue::Claim(detail))
        }
        other => other,
    })
}

fn absent() -> Transform {
    Arc::new(|_| None)
}

fn share_state(state: ShareLinkState) -> Transform {
    Arc::new(move |_| Some(CacheValue::ShareLink(state.clone())))
}

fn new_detail(claim: Claim) -> Transform {
    Arc::new(move |_| {
        Some(CacheValue::Claim(ClaimDetail {
            claim: claim.clone(),
            items: Vec::new(),
        }))
    })
}

fn insert_claim(claim: Claim) -> Transform {
    on_list(move |claims| {
        if claims.iter().all(|s| s.claim.id != claim.id) {
            claims.insert(
                0,
                ClaimSummary {
                    claim: claim.clone(),
                    item_count: 0,
                },
            );
        }
    })
}

fn replace_claim(claim: Claim) -> Transform {
    on_list(move |claims| {
        for summary in claims.iter_mut().filter(|s| s.claim.id == claim.id) {
            summary.claim = claim.clone();
        }
    })
}

fn remove_claim(claim_id: ResourceId) -> Transform {
    on_list(move |claims| claims.retain(|s| s.claim.id != claim_id))
}

fn adjust_item_count(claim_id: ResourceId, delta: i64) -> Transform {
    on_list(move |claims| {
        if let Some(summary) = claims.iter_mut().find(|s| s.claim.id == claim_id) {
            summary.item_count = (summary.item_count + delta).max(0);
        }
    })
}

/// Puts the item first and shifts the others down by one.
fn insert_item(item: Item) -> Transform {
    on_detail(move |detail| {
        if detail.items.iter().any(|existing| existing.id == item.id) {
            return;
        }
        for existing in &mut detail.items {
            existing.order += 1;
        }
        detail.items.push(item.clone());
        detail.sort_items();
    })
}

/// Lays the listed items out first, in sequence, followed by any others the cache
/// holds, and renumbers them all from zero.
fn reorder(ordered: Arc<Vec<ResourceId>>) -> Transform {
    on_detail(move |detail| {
        let mut rest = std::mem::take(&mut detail.items);
        let mut items: Vec<Item> = ordered
            .iter()
            .filter_map(|id| {
                let position = rest.iter().position(|item| item.id == *id)?;
                Some(rest.remove(position))
            })
            .collect();
        items.append(&mut rest);
        for (index, item) in items.iter_mut().enumerate() {
            item.order = index as i32;
        }
        detail.items = items;
    })
}

fn add_attachment(item_id: ResourceId, attachment: Attachment) -> Transform {
    on_detail(move |detail| {
        if let Some(item) = detail.item_mut(item_id) {
            if item.attachments.iter().all(|a| a.id != attachment.id) {
                item.attachments.push(attachment.clone());
            }
        }
    })
}

fn placeholder_claim(id: ResourceId, input: &NewClaim) -> Claim {
    let now = Utc::now();
    Claim {
        id,
        claim_number: input.claim_number.clone(),
        status: input.status,
        customer: input.customer.clone(),
        adjustor_name: input.adjustor_name.clone(),
        adjustor_email: input.adjustor_email.clone(),
        adjustor_phone: input.adjustor_phone.clone(),
        claimant_name: input.claimant_name.clone(),
        claimant_email: input.claimant_email.clone(),
        claimant_phone: input.claimant_phone.clone(),
        user_id: None,
        created_at: now,
        updated_at: now,
    }
}
