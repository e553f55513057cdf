//! crates/claims_core/src/domain.rs
//!
//! Defines the core data structures for claims, items, attachments and share links,
//! together with the mutation inputs the executor and the server both accept.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Identifiers
//=========================================================================================

/// A client-allocated identifier for a resource the server has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

/// Identifies a resource either by its temporary local id or by the id the server assigned.
///
/// Only confirmed identifiers ever cross the wire. Serializing a pending identifier
/// fails instead of leaking a placeholder into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    Pending(LocalId),
    Confirmed(Uuid),
}

impl ResourceId {
    pub fn confirmed(&self) -> Option<Uuid> {
        match self {
            ResourceId::Confirmed(id) => Some(*id),
            ResourceId::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ResourceId::Pending(_))
    }

    /// Rewrites `self` to the server id if it is the given pending id.
    /// Returns whether anything changed.
    pub fn promote(&mut self, local: LocalId, server: Uuid) -> bool {
        if *self == ResourceId::Pending(local) {
            *self = ResourceId::Confirmed(server);
            true
        } else {
            false
        }
    }
}

impl From<Uuid> for ResourceId {
    fn from(id: Uuid) -> Self {
        ResourceId::Confirmed(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Pending(local) => local.fmt(f),
            ResourceId::Confirmed(id) => id.fmt(f),
        }
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResourceId::Confirmed(id) => id.serialize(serializer),
            ResourceId::Pending(local) => Err(ser::Error::custom(format!(
                "pending identifier {} cannot be sent to the server",
                local
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Uuid::deserialize(deserializer).map(ResourceId::Confirmed)
    }
}

//=========================================================================================
// Entities
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    #[default]
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Closed,
}

impl ClaimStatus {
    pub const ALL: [ClaimStatus; 5] = [
        ClaimStatus::Pending,
        ClaimStatus::UnderReview,
        ClaimStatus::Approved,
        ClaimStatus::Rejected,
        ClaimStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "PENDING",
            ClaimStatus::UnderReview => "UNDER_REVIEW",
            ClaimStatus::Approved => "APPROVED",
            ClaimStatus::Rejected => "REJECTED",
            ClaimStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClaimStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClaimStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownStatus(s.to_string()))
    }
}

/// An insurance claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub id: ResourceId,
    pub claim_number: String,
    pub status: ClaimStatus,
    pub customer: Option<String>,
    pub adjustor_name: Option<String>,
    pub adjustor_email: Option<String>,
    pub adjustor_phone: Option<String>,
    pub claimant_name: Option<String>,
    pub claimant_email: Option<String>,
    pub claimant_phone: Option<String>,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    pub fn promote_ids(&mut self, local: LocalId, server: Uuid) -> bool {
        self.id.promote(local, server)
    }
}

/// A line item on a claim. `order` defines display sequence within the claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ResourceId,
    pub claim_id: ResourceId,
    pub title: String,
    pub description: Option<String>,
    pub order: i32,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    pub fn promote_ids(&mut self, local: LocalId, server: Uuid) -> bool {
        let mut changed = self.id.promote(local, server);
        changed |= self.claim_id.promote(local, server);
        for attachment in &mut self.attachments {
            changed |= attachment.promote_ids(local, server);
        }
        changed
    }
}

/// Metadata for a stored file attached to an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: ResourceId,
    pub item_id: ResourceId,
    pub filename: String,
    pub url: String,
    pub thumbnail_url: Option<String>,
    pub mime_type: String,
    pub size: i64,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn promote_ids(&mut self, local: LocalId, server: Uuid) -> bool {
        let changed = self.id.promote(local, server);
        self.item_id.promote(local, server) || changed
    }
}

/// A public read-only link to a claim. At most one exists per claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: Uuid,
    pub token: String,
    pub claim_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The cached share state of a claim. An absent cache entry means "not loaded yet".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareLinkState {
    Shared(ShareLink),
    NotShared,
}

/// A claim as shown in the claims list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimSummary {
    #[serde(flatten)]
    pub claim: Claim,
    pub item_count: i64,
}

/// A claim with its items and their attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDetail {
    #[serde(flatten)]
    pub claim: Claim,
    pub items: Vec<Item>,
}

impl ClaimDetail {
    /// Sorts items by order, breaking ties by creation time.
    pub fn sort_items(&mut self) {
        self.items
            .sort_by(|a, b| a.order.cmp(&b.order).then(a.created_at.cmp(&b.created_at)));
    }

    pub fn summary(&self) -> ClaimSummary {
        ClaimSummary {
            claim: self.claim.clone(),
            item_count: self.items.len() as i64,
        }
    }

    pub fn item_mut(&mut self, id: ResourceId) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    pub fn promote_ids(&mut self, local: LocalId, server: Uuid) -> bool {
        let mut changed = self.claim.promote_ids(local, server);
        for item in &mut self.items {
            changed |= item.promote_ids(local, server);
        }
        changed
    }
}

//=========================================================================================
// Mutation Inputs
//=========================================================================================

/// A single field of a partial update.
///
/// On the wire an omitted field is `Unchanged`, `null` is `Clear` and any value is `SetTo`.
/// Fields of this type must be declared with
/// `#[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPatch<T> {
    Unchanged,
    SetTo(T),
    Clear,
}

impl<T> Default for FieldPatch<T> {
    fn default() -> Self {
        FieldPatch::Unchanged
    }
}

impl<T> FieldPatch<T> {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, FieldPatch::Unchanged)
    }
}

impl<T: Clone> FieldPatch<T> {
    pub fn apply(&self, target: &mut Option<T>) {
        match self {
            FieldPatch::Unchanged => {}
            FieldPatch::SetTo(value) => *target = Some(value.clone()),
            FieldPatch::Clear => *target = None,
        }
    }
}

impl<T: Serialize> Serialize for FieldPatch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldPatch::SetTo(value) => value.serialize(serializer),
            FieldPatch::Clear => serializer.serialize_none(),
            FieldPatch::Unchanged => Err(ser::Error::custom(
                "unchanged field patches must be skipped, not serialized",
            )),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldPatch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            Some(value) => FieldPatch::SetTo(value),
            None => FieldPatch::Clear,
        })
    }
}

/// Input for creating a claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewClaim {
    pub claim_number: String,
    #[serde(default)]
    pub status: ClaimStatus,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub adjustor_name: Option<String>,
    #[serde(default)]
    pub adjustor_email: Option<String>,
    #[serde(default)]
    pub adjustor_phone: Option<String>,
    #[serde(default)]
    pub claimant_name: Option<String>,
    #[serde(default)]
    pub claimant_email: Option<String>,
    #[serde(default)]
    pub claimant_phone: Option<String>,
}

impl NewClaim {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.claim_number.trim().is_empty() {
            return Err(ValidationError::EmptyClaimNumber);
        }
        Ok(())
    }
}

/// Partial update of a claim. Required fields use `Option` and can only be replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ClaimStatus>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub customer: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub adjustor_name: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub adjustor_email: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub adjustor_phone: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub claimant_name: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub claimant_email: FieldPatch<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub claimant_phone: FieldPatch<String>,
}

impl ClaimPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.claim_number {
            Some(number) if number.trim().is_empty() => Err(ValidationError::EmptyClaimNumber),
            _ => Ok(()),
        }
    }

    /// Applies only the fields present in the patch.
    pub fn apply_to(&self, claim: &mut Claim) {
        if let Some(number) = &self.claim_number {
            claim.claim_number = number.clone();
        }
        if let Some(status) = self.status {
            claim.status = status;
        }
        self.customer.apply(&mut claim.customer);
        self.adjustor_name.apply(&mut claim.adjustor_name);
        self.adjustor_email.apply(&mut claim.adjustor_email);
        self.adjustor_phone.apply(&mut claim.adjustor_phone);
        self.claimant_name.apply(&mut claim.claimant_name);
        self.claimant_email.apply(&mut claim.claimant_email);
        self.claimant_phone.apply(&mut claim.claimant_phone);
    }
}

/// Input for creating an item. New items are inserted at order 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_unchanged")]
    pub description: FieldPatch<String>,
}

impl ItemPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.title {
            Some(title) if title.trim().is_empty() => Err(ValidationError::EmptyTitle),
            _ => Ok(()),
        }
    }

    pub fn apply_to(&self, item: &mut Item) {
        if let Some(title) = &self.title {
            item.title = title.clone();
        }
        self.description.apply(&mut item.description);
    }
}

/// One entry of a reorder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOrder {
    pub id: Uuid,
    pub order: i32,
}

/// A file to upload as an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentUpload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

//=========================================================================================
// Validation
//=========================================================================================

/// Input problems detected before any network or database call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Claim number must not be empty")]
    EmptyClaimNumber,
    #[error("Item title must not be empty")]
    EmptyTitle,
    #[error("Reorder requires at least one item")]
    EmptyReorder,
    #[error("Reorder must list every item of the claim exactly once")]
    ReorderMismatch,
    #[error("Attachment upload is empty")]
    EmptyUpload,
    #[error("Unknown claim status: {0}")]
    UnknownStatus(String),
}
