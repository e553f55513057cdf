//! services/api/src/adapters/memory.rs
//!
//! An in-memory `ClaimRepository` for local development and tests. Every
//! operation runs under one lock, which gives it the same atomicity the
//! Postgres adapter gets from transactions.

use async_trait::async_trait;
use chrono::Utc;
use claims_core::domain::{
    Attachment, Claim, ClaimDetail, ClaimPatch, ClaimSummary, Item, ItemOrder, ItemPatch,
    NewClaim, NewItem, ResourceId, ShareLink,
};
use claims_core::ports::{ClaimRepository, NewAttachment, PortError, PortResult};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct Store {
    claims: HashMap<Uuid, ClaimDetail>,
    share_links: HashMap<Uuid, ShareLink>,
}

impl Store {
    fn detail_mut(&mut self, claim_id: Uuid) -> PortResult<&mut ClaimDetail> {
        self.claims
            .get_mut(&claim_id)
            .ok_or_else(|| claim_not_found(claim_id))
    }

    fn item_mut(&mut self, claim_id: Uuid, item_id: Uuid) -> PortResult<&mut Item> {
        self.detail_mut(claim_id)?
            .item_mut(ResourceId::Confirmed(item_id))
            .ok_or_else(|| PortError::NotFound(format!("Item {} not found", item_id)))
    }

    fn number_taken(&self, number: &str, except: Option<Uuid>) -> bool {
        self.claims.iter().any(|(id, detail)| {
            Some(*id) != except && detail.claim.claim_number == number
        })
    }
}

fn claim_not_found(claim_id: Uuid) -> PortError {
    PortError::NotFound(format!("Claim {} not found", claim_id))
}

fn duplicate_number(number: &str) -> PortError {
    PortError::Conflict(format!("Claim number {} already exists", number))
}

fn storage_keys<'a>(items: impl IntoIterator<Item = &'a Item>) -> Vec<String> {
    items
        .into_iter()
        .flat_map(|item| item.attachments.iter().map(|a| a.storage_key.clone()))
        .collect()
}

#[derive(Default)]
pub struct MemoryAdapter {
    store: Mutex<Store>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ClaimRepository for MemoryAdapter {
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>> {
        let store = self.store();
        let mut summaries: Vec<ClaimSummary> =
            store.claims.values().map(ClaimDetail::summary).collect();
        summaries.sort_by(|a, b| b.claim.created_at.cmp(&a.claim.created_at));
        Ok(summaries)
    }

    async fn get_claim_detail(&self, claim_id: Uuid) -> PortResult<ClaimDetail> {
        let mut store = self.store();
        Ok(store.detail_mut(claim_id)?.clone())
    }

    async fn create_claim(&self, user_id: Option<Uuid>, input: &NewClaim) -> PortResult<Claim> {
        let mut store = self.store();
        if store.number_taken(&input.claim_number, None) {
            return Err(duplicate_number(&input.claim_number));
        }
        let now = Utc::now();
        let id = Uuid::new_v4();
        let claim = Claim {
            id: id.into(),
            claim_number: input.claim_number.clone(),
            status: input.status,
            customer: input.customer.clone(),
            adjustor_name: input.adjustor_name.clone(),
            adjustor_email: input.adjustor_email.clone(),
            adjustor_phone: input.adjustor_phone.clone(),
            claimant_name: input.claimant_name.clone(),
            claimant_email: input.claimant_email.clone(),
            claimant_phone: input.claimant_phone.clone(),
            user_id,
            created_at: now,
            updated_at: now,
        };
        store.claims.insert(
            id,
            ClaimDetail {
                claim: claim.clone(),
                items: Vec::new(),
            },
        );
        Ok(claim)
    }

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim> {
        let mut store = self.store();
        if let Some(number) = &patch.claim_number {
            if store.number_taken(number, Some(claim_id)) {
                return Err(duplicate_number(number));
            }
        }
        let detail = store.detail_mut(claim_id)?;
        patch.apply_to(&mut detail.claim);
        detail.claim.updated_at = Utc::now();
        Ok(detail.claim.clone())
    }

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<Vec<String>> {
        let mut store = self.store();
        let detail = store
            .claims
            .remove(&claim_id)
            .ok_or_else(|| claim_not_found(claim_id))?;
        store.share_links.remove(&claim_id);
        Ok(storage_keys(&detail.items))
    }

    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item> {
        let mut store = self.store();
        let detail = store.detail_mut(claim_id)?;
        for item in &mut detail.items {
            item.order += 1;
        }
        let now = Utc::now();
        let item = Item {
            id: Uuid::new_v4().into(),
            claim_id: claim_id.into(),
            title: input.title.clone(),
            description: input.description.clone(),
            order: 0,
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        detail.items.insert(0, item.clone());
        Ok(item)
    }

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item> {
        let mut store = self.store();
        let item = store.item_mut(claim_id, item_id)?;
        patch.apply_to(item);
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<Vec<String>> {
        let mut store = self.store();
        let detail = store.detail_mut(claim_id)?;
        let position = detail
            .items
            .iter()
            .position(|item| item.id == ResourceId::Confirmed(item_id))
            .ok_or_else(|| PortError::NotFound(format!("Item {} not found", item_id)))?;
        let removed = detail.items.remove(position);
        Ok(storage_keys([&removed]))
    }

    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()> {
        let mut store = self.store();
        let detail = store.detail_mut(claim_id)?;
        let existing: HashSet<Uuid> = detail
            .items
            .iter()
            .filter_map(|item| item.id.confirmed())
            .collect();
        let requested: HashSet<Uuid> = order.iter().map(|entry| entry.id).collect();
        if existing != requested || requested.len() != order.len() {
            return Err(PortError::Invalid(
                "Reorder must list every item of the claim exactly once".to_string(),
            ));
        }
        let now = Utc::now();
        for entry in order {
            if let Some(item) = detail.item_mut(ResourceId::Confirmed(entry.id)) {
                item.order = entry.order;
                item.updated_at = now;
            }
        }
        detail.sort_items();
        Ok(())
    }

    async fn create_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment: NewAttachment,
    ) -> PortResult<Attachment> {
        let mut store = self.store();
        let item = store.item_mut(claim_id, item_id)?;
        let created = Attachment {
            id: Uuid::new_v4().into(),
            item_id: item_id.into(),
            filename: attachment.filename,
            url: attachment.url,
            thumbnail_url: attachment.thumbnail_url,
            mime_type: attachment.mime_type,
            size: attachment.size,
            width: attachment.width,
            height: attachment.height,
            storage_key: attachment.storage_key,
            created_at: Utc::now(),
        };
        item.attachments.push(created.clone());
        Ok(created)
    }

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<Attachment> {
        let mut store = self.store();
        let item = store.item_mut(claim_id, item_id)?;
        let position = item
            .attachments
            .iter()
            .position(|a| a.id == ResourceId::Confirmed(attachment_id))
            .ok_or_else(|| {
                PortError::NotFound(format!("Attachment {} not found", attachment_id))
            })?;
        Ok(item.attachments.remove(position))
    }

    async fn create_share_link(&self, claim_id: Uuid, token: &str) -> PortResult<ShareLink> {
        let mut store = self.store();
        if !store.claims.contains_key(&claim_id) {
            return Err(claim_not_found(claim_id));
        }
        let link = store
            .share_links
            .entry(claim_id)
            .or_insert_with(|| ShareLink {
                id: Uuid::new_v4(),
                token: token.to_string(),
                claim_id,
                created_at: Utc::now(),
            });
        Ok(link.clone())
    }

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>> {
        Ok(self.store().share_links.get(&claim_id).cloned())
    }

    async fn delete_share_link(&self, claim_id: Uuid) -> PortResult<()> {
        self.store().share_links.remove(&claim_id);
        Ok(())
    }

    async fn get_claim_by_share_token(&self, token: &str) -> PortResult<ClaimDetail> {
        let store = self.store();
        let claim_id = store
            .share_links
            .values()
            .find(|link| link.token == token)
            .map(|link| link.claim_id)
            .ok_or_else(|| PortError::NotFound("Share link not found".to_string()))?;
        store
            .claims
            .get(&claim_id)
            .cloned()
            .ok_or_else(|| claim_not_found(claim_id))
    }
}
