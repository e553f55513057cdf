//! Test doubles for the `ClaimsApi` port and fixture builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::domain::{
    Attachment, AttachmentUpload, Claim, ClaimDetail, ClaimPatch, ClaimStatus, ClaimSummary, Item,
    ItemOrder, ItemPatch, NewClaim, NewItem, ResourceId, ShareLink,
};
use crate::ports::{ClaimsApi, PortError, PortResult};

//=========================================================================================
// Fixtures
//=========================================================================================

pub fn claim(number: &str, status: ClaimStatus) -> Claim {
    let now = Utc::now();
    Claim {
        id: ResourceId::Confirmed(Uuid::new_v4()),
        claim_number: number.to_string(),
        status,
        customer: None,
        adjustor_name: None,
        adjustor_email: None,
        adjustor_phone: None,
        claimant_name: None,
        claimant_email: None,
        claimant_phone: None,
        user_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn detail(claim: Claim, titles: &[&str]) -> ClaimDetail {
    let base = Utc::now();
    let items = titles
        .iter()
        .enumerate()
        .map(|(index, title)| Item {
            id: ResourceId::Confirmed(Uuid::new_v4()),
            claim_id: claim.id,
            title: title.to_string(),
            description: None,
            order: index as i32,
            attachments: Vec::new(),
            created_at: base + Duration::milliseconds(index as i64),
            updated_at: base,
        })
        .collect();
    ClaimDetail { claim, items }
}

//=========================================================================================
// In-memory Server
//=========================================================================================

#[derive(Default)]
pub struct FakeServer {
    pub claims: Vec<ClaimDetail>,
    pub share_links: HashMap<Uuid, ShareLink>,
}

impl FakeServer {
    fn detail_mut(&mut self, claim_id: Uuid) -> PortResult<&mut ClaimDetail> {
        self.claims
            .iter_mut()
            .find(|d| d.claim.id == ResourceId::Confirmed(claim_id))
            .ok_or_else(|| PortError::NotFound(format!("Claim {} not found", claim_id)))
    }

    fn item_mut(&mut self, claim_id: Uuid, item_id: Uuid) -> PortResult<&mut Item> {
        self.detail_mut(claim_id)?
            .item_mut(ResourceId::Confirmed(item_id))
            .ok_or_else(|| PortError::NotFound(format!("Item {} not found", item_id)))
    }
}

/// A `ClaimsApi` backed by memory. `fail_with` makes every later call fail.
#[derive(Default)]
pub struct FakeApi {
    pub server: Mutex<FakeServer>,
    failure: Mutex<Option<PortError>>,
    calls: AtomicUsize,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, detail: ClaimDetail) {
        self.server.lock().unwrap().claims.push(detail);
    }

    pub fn fail_with(&self, error: PortError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> PortResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClaimsApi for FakeApi {
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>> {
        self.check()?;
        Ok(self
            .server
            .lock()
            .unwrap()
            .claims
            .iter()
            .map(ClaimDetail::summary)
            .collect())
    }

    async fn get_claim(&self, claim_id: Uuid) -> PortResult<ClaimDetail> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        Ok(server.detail_mut(claim_id)?.clone())
    }

    async fn create_claim(&self, input: &NewClaim) -> PortResult<Claim> {
        self.check()?;
        let mut created = claim(&input.claim_number, input.status);
        created.customer = input.customer.clone();
        created.claimant_name = input.claimant_name.clone();
        created.adjustor_name = input.adjustor_name.clone();
        self.server.lock().unwrap().claims.push(ClaimDetail {
            claim: created.clone(),
            items: Vec::new(),
        });
        Ok(created)
    }

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        let detail = server.detail_mut(claim_id)?;
        patch.apply_to(&mut detail.claim);
        detail.claim.updated_at = Utc::now();
        Ok(detail.claim.clone())
    }

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<()> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        server
            .claims
            .retain(|d| d.claim.id != ResourceId::Confirmed(claim_id));
        server.share_links.remove(&claim_id);
        Ok(())
    }

    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        let detail = server.detail_mut(claim_id)?;
        for item in &mut detail.items {
            item.order += 1;
        }
        let now = Utc::now();
        let item = Item {
            id: ResourceId::Confirmed(Uuid::new_v4()),
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
        self.check()?;
        let mut server = self.server.lock().unwrap();
        let item = server.item_mut(claim_id, item_id)?;
        patch.apply_to(item);
        Ok(item.clone())
    }

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<()> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        server
            .detail_mut(claim_id)?
            .items
            .retain(|item| item.id != ResourceId::Confirmed(item_id));
        Ok(())
    }

    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        let detail = server.detail_mut(claim_id)?;
        for entry in order {
            if let Some(item) = detail.item_mut(ResourceId::Confirmed(entry.id)) {
                item.order = entry.order;
            }
        }
        detail.sort_items();
        Ok(())
    }

    async fn upload_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> PortResult<Attachment> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        let item = server.item_mut(claim_id, item_id)?;
        let id = Uuid::new_v4();
        let attachment = Attachment {
            id: id.into(),
            item_id: item_id.into(),
            filename: upload.filename.clone(),
            url: format!("http://files.test/{}", id),
            thumbnail_url: None,
            mime_type: upload.mime_type.clone(),
            size: upload.bytes.len() as i64,
            width: None,
            height: None,
            storage_key: format!("attachments/{}", id),
            created_at: Utc::now(),
        };
        item.attachments.push(attachment.clone());
        Ok(attachment)
    }

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<()> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        server
            .item_mut(claim_id, item_id)?
            .attachments
            .retain(|a| a.id != ResourceId::Confirmed(attachment_id));
        Ok(())
    }

    async fn create_share_link(&self, claim_id: Uuid) -> PortResult<ShareLink> {
        self.check()?;
        let mut server = self.server.lock().unwrap();
        server.detail_mut(claim_id)?;
        let link = server
            .share_links
            .entry(claim_id)
            .or_insert_with(|| ShareLink {
                id: Uuid::new_v4(),
                token: Uuid::new_v4().simple().to_string(),
                claim_id,
                created_at: Utc::now(),
            });
        Ok(link.clone())
    }

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>> {
        self.check()?;
        Ok(self.server.lock().unwrap().share_links.get(&claim_id).cloned())
    }

    async fn revoke_share_link(&self, claim_id: Uuid) -> PortResult<()> {
        self.check()?;
        self.server.lock().unwrap().share_links.remove(&claim_id);
        Ok(())
    }
}

//=========================================================================================
// Gated Server
//=========================================================================================

/// Holds every call until the test releases it, in arrival order.
/// Each call announces itself on `arrivals` before it waits.
pub struct GatedApi {
    pub inner: Arc<FakeApi>,
    gate: Semaphore,
    arrivals: mpsc::UnboundedSender<&'static str>,
}

impl GatedApi {
    pub fn new(inner: Arc<FakeApi>) -> (Arc<Self>, mpsc::UnboundedReceiver<&'static str>) {
        let (arrivals, rx) = mpsc::unbounded_channel();
        let api = Arc::new(Self {
            inner,
            gate: Semaphore::new(0),
            arrivals,
        });
        (api, rx)
    }

    pub fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    async fn pass(&self, call: &'static str) {
        let _ = self.arrivals.send(call);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
    }
}

#[async_trait]
impl ClaimsApi for GatedApi {
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>> {
        self.pass("list_claims").await;
        self.inner.list_claims().await
    }

    async fn get_claim(&self, claim_id: Uuid) -> PortResult<ClaimDetail> {
        self.pass("get_claim").await;
        self.inner.get_claim(claim_id).await
    }

    async fn create_claim(&self, input: &NewClaim) -> PortResult<Claim> {
        self.pass("create_claim").await;
        self.inner.create_claim(input).await
    }

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim> {
        self.pass("update_claim").await;
        self.inner.update_claim(claim_id, patch).await
    }

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<()> {
        self.pass("delete_claim").await;
        self.inner.delete_claim(claim_id).await
    }

    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item> {
        self.pass("create_item").await;
        self.inner.create_item(claim_id, input).await
    }

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item> {
        self.pass("update_item").await;
        self.inner.update_item(claim_id, item_id, patch).await
    }

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<()> {
        self.pass("delete_item").await;
        self.inner.delete_item(claim_id, item_id).await
    }

    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()> {
        self.pass("reorder_items").await;
        self.inner.reorder_items(claim_id, order).await
    }

    async fn upload_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> PortResult<Attachment> {
        self.pass("upload_attachment").await;
        self.inner.upload_attachment(claim_id, item_id, upload).await
    }

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<()> {
        self.pass("delete_attachment").await;
        self.inner
            .delete_attachment(claim_id, item_id, attachment_id)
            .await
    }

    async fn create_share_link(&self, claim_id: Uuid) -> PortResult<ShareLink> {
        self.pass("create_share_link").await;
        self.inner.create_share_link(claim_id).await
    }

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>> {
        self.pass("get_share_link").await;
        self.inner.get_share_link(claim_id).await
    }

    async fn revoke_share_link(&self, claim_id: Uuid) -> PortResult<()> {
        self.pass("revoke_share_link").await;
        self.inner.revoke_share_link(claim_id).await
    }
}
