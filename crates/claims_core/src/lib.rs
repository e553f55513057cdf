pub mod cache;
pub mod domain;
pub mod executor;
pub mod filter;
pub mod ports;

#[cfg(test)]
mod testing;

pub use cache::{
    CacheKey, CacheValue, Generation, LayerId, MutationCache, ReconcileOutcome, Transform,
};
pub use domain::{
    Attachment, AttachmentUpload, Claim, ClaimDetail, ClaimPatch, ClaimStatus, ClaimSummary,
    FieldPatch, Item, ItemOrder, ItemPatch, LocalId, NewClaim, NewItem, ResourceId, ShareLink,
    ShareLinkState, ValidationError,
};
pub use executor::{MutationError, MutationPhase, OptimisticExecutor};
pub use filter::{filter_claims, ClaimFilter, ClaimsFilterView, FilteredClaims};
pub use ports::{ClaimRepository, ClaimsApi, NewAttachment, ObjectStorage, PortError, PortResult};
