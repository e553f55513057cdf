//! crates/claims_core/src/ports.rs
//!
//! Defines the service contracts (traits) at the edges of the claims core.
//! `ClaimsApi` is the client's view of the Server Resource API; `ClaimRepository`
//! and `ObjectStorage` are what the server itself persists through.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::domain::{
    Attachment, AttachmentUpload, Claim, ClaimDetail, ClaimPatch, ClaimSummary, Item, ItemOrder,
    ItemPatch, NewClaim, NewItem, ShareLink,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    /// The request never reached the server or the response never arrived.
    #[error("Transport failure: {0}")]
    Transport(String),
    /// The server answered with a non-success status.
    #[error("Server responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Client-side Port
//=========================================================================================

/// The Server Resource API as consumed by the optimistic executor.
#[async_trait]
pub trait ClaimsApi: Send + Sync {
    // --- Claims ---
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>>;

    async fn get_claim(&self, claim_id: Uuid) -> PortResult<ClaimDetail>;

    async fn create_claim(&self, input: &NewClaim) -> PortResult<Claim>;

    /// Partial update; fields the patch leaves unchanged keep their server value.
    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim>;

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<()>;

    // --- Items ---
    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item>;

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item>;

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<()>;

    /// Applies the whole ordering atomically.
    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()>;

    // --- Attachments ---
    async fn upload_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> PortResult<Attachment>;

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<()>;

    // --- Share Links ---
    /// Creates the claim's share link, or returns the existing one.
    async fn create_share_link(&self, claim_id: Uuid) -> PortResult<ShareLink>;

    /// Returns `None` when the claim is not shared.
    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>>;

    async fn revoke_share_link(&self, claim_id: Uuid) -> PortResult<()>;
}

//=========================================================================================
// Server-side Ports
//=========================================================================================

/// Attachment metadata produced by the upload pipeline, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttachment {
    pub filename: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage_key: String,
}

#[async_trait]
pub trait ClaimRepository: Send + Sync {
    // --- Claims ---
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>>;

    async fn get_claim_detail(&self, claim_id: Uuid) -> PortResult<ClaimDetail>;

    /// Fails with `PortError::Conflict` when the claim number is taken.
    async fn create_claim(&self, user_id: Option<Uuid>, input: &NewClaim) -> PortResult<Claim>;

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim>;

    /// Deletes the claim with its items, attachments and share link.
    /// Returns the storage keys of the removed attachments.
    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<Vec<String>>;

    // --- Items ---
    /// Inserts at order 0, shifting the claim's other items by one.
    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item>;

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item>;

    /// Returns the storage keys of the removed attachments.
    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<Vec<String>>;

    /// Fails with `PortError::Invalid` unless `order` names exactly the claim's items.
    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()>;

    // --- Attachments ---
    async fn create_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment: NewAttachment,
    ) -> PortResult<Attachment>;

    /// Returns the removed attachment so its stored objects can be deleted.
    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<Attachment>;

    // --- Share Links ---
    /// Idempotent: concurrent calls for one claim yield one link.
    async fn create_share_link(&self, claim_id: Uuid, token: &str) -> PortResult<ShareLink>;

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>>;

    async fn delete_share_link(&self, claim_id: Uuid) -> PortResult<()>;

    async fn get_claim_by_share_token(&self, token: &str) -> PortResult<ClaimDetail>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> PortResult<()>;

    async fn get(&self, key: &str) -> PortResult<Bytes>;

    /// Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> PortResult<()>;
}
