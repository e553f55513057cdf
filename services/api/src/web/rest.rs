//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::adapters::thumbnail::content_type_for;
use crate::error::{ApiError, ErrorResponse};
use crate::web::files::{read_upload, remove_objects, store_attachment};
use crate::web::middleware::CurrentUser;
use crate::web::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use claims_core::domain::{
    Attachment, Claim, ClaimDetail, ClaimPatch, ClaimSummary, Item, ItemOrder, ItemPatch,
    NewClaim, NewItem, ShareLink,
};
use claims_core::ports::PortError;
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_claims_handler,
        create_claim_handler,
        get_claim_handler,
        update_claim_handler,
        delete_claim_handler,
        create_item_handler,
        update_item_handler,
        delete_item_handler,
        reorder_items_handler,
        upload_attachment_handler,
        delete_attachment_handler,
        create_share_link_handler,
        get_share_link_handler,
        revoke_share_link_handler,
        get_shared_claim_handler,
        serve_file_handler,
    ),
    components(
        schemas(ErrorResponse)
    ),
    tags(
        (name = "claims", description = "Claims, their items and attachments."),
        (name = "sharing", description = "Read-only public links to a claim.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Claims
//=========================================================================================

/// List every claim with its item count, newest first.
#[utoipa::path(
    get,
    path = "/claims",
    tag = "claims",
    responses(
        (status = 200, description = "Claim summaries"),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_claims_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ClaimSummary>>, ApiError> {
    Ok(Json(state.repo.list_claims().await?))
}

/// Create a claim. The claim number must be unique.
#[utoipa::path(
    post,
    path = "/claims",
    tag = "claims",
    request_body(content_type = "application/json", description = "The new claim."),
    responses(
        (status = 201, description = "Claim created"),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 409, description = "Claim number already exists", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Option<Uuid>, Header, description = "The user the claim is attributed to.")
    )
)]
pub async fn create_claim_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(input): Json<NewClaim>,
) -> Result<(StatusCode, Json<Claim>), ApiError> {
    input.validate()?;
    let claim = state.repo.create_claim(user_id, &input).await?;
    info!(claim_number = %claim.claim_number, "Claim created");
    Ok((StatusCode::CREATED, Json(claim)))
}

/// Fetch a claim with its items and attachments.
#[utoipa::path(
    get,
    path = "/claims/{claim_id}",
    tag = "claims",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    responses(
        (status = 200, description = "Claim detail"),
        (status = 404, description = "Claim not found", body = ErrorResponse)
    )
)]
pub async fn get_claim_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<ClaimDetail>, ApiError> {
    Ok(Json(state.repo.get_claim_detail(claim_id).await?))
}

/// Partially update a claim. Omitted fields are unchanged; `null` clears an optional field.
#[utoipa::path(
    patch,
    path = "/claims/{claim_id}",
    tag = "claims",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    request_body(content_type = "application/json", description = "Fields to change."),
    responses(
        (status = 200, description = "Updated claim"),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 404, description = "Claim not found", body = ErrorResponse),
        (status = 409, description = "Claim number already exists", body = ErrorResponse)
    )
)]
pub async fn update_claim_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
    Json(patch): Json<ClaimPatch>,
) -> Result<Json<Claim>, ApiError> {
    patch.validate()?;
    Ok(Json(state.repo.update_claim(claim_id, &patch).await?))
}

/// Delete a claim with its items, attachments, stored files and share link.
#[utoipa::path(
    delete,
    path = "/claims/{claim_id}",
    tag = "claims",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    responses(
        (status = 204, description = "Claim deleted"),
        (status = 404, description = "Claim not found", body = ErrorResponse)
    )
)]
pub async fn delete_claim_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let keys = state.repo.delete_claim(claim_id).await?;
    remove_objects(&state, &keys).await;
    info!(%claim_id, "Claim deleted");
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Items
//=========================================================================================

/// Add an item at the top of the claim; existing items move down by one.
#[utoipa::path(
    post,
    path = "/claims/{claim_id}/items",
    tag = "claims",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    request_body(content_type = "application/json", description = "The new item."),
    responses(
        (status = 201, description = "Item created"),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 404, description = "Claim not found", body = ErrorResponse)
    )
)]
pub async fn create_item_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
    Json(input): Json<NewItem>,
) -> Result<(StatusCode, Json<Item>), ApiError> {
    input.validate()?;
    let item = state.repo.create_item(claim_id, &input).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[utoipa::path(
    patch,
    path = "/claims/{claim_id}/items/{item_id}",
    tag = "claims",
    params(
        ("claim_id" = Uuid, Path, description = "Claim id"),
        ("item_id" = Uuid, Path, description = "Item id")
    ),
    request_body(content_type = "application/json", description = "Fields to change."),
    responses(
        (status = 200, description = "Updated item"),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 404, description = "Item not found", body = ErrorResponse)
    )
)]
pub async fn update_item_handler(
    State(state): State<Arc<AppState>>,
    Path((claim_id, item_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<ItemPatch>,
) -> Result<Json<Item>, ApiError> {
    patch.validate()?;
    Ok(Json(state.repo.update_item(claim_id, item_id, &patch).await?))
}

#[utoipa::path(
    delete,
    path = "/claims/{claim_id}/items/{item_id}",
    tag = "claims",
    params(
        ("claim_id" = Uuid, Path, description = "Claim id"),
        ("item_id" = Uuid, Path, description = "Item id")
    ),
    responses(
        (status = 204, description = "Item deleted"),
        (status = 404, description = "Item not found", body = ErrorResponse)
    )
)]
pub async fn delete_item_handler(
    State(state): State<Arc<AppState>>,
    Path((claim_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let keys = state.repo.delete_item(claim_id, item_id).await?;
    remove_objects(&state, &keys).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace the order of every item of a claim at once.
#[utoipa::path(
    put,
    path = "/claims/{claim_id}/items/reorder",
    tag = "claims",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    request_body(
        content_type = "application/json",
        description = "`[{\"id\": ..., \"order\": ...}]` naming each item of the claim once."
    ),
    responses(
        (status = 204, description = "Items reordered"),
        (status = 400, description = "The list does not match the claim's items", body = ErrorResponse),
        (status = 404, description = "Claim not found", body = ErrorResponse)
    )
)]
pub async fn reorder_items_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
    Json(order): Json<Vec<ItemOrder>>,
) -> Result<StatusCode, ApiError> {
    state.repo.reorder_items(claim_id, &order).await?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Attachments
//=========================================================================================

/// Upload a file to an item. Images also get their dimensions and a thumbnail.
#[utoipa::path(
    post,
    path = "/claims/{claim_id}/items/{item_id}/attachments",
    tag = "claims",
    params(
        ("claim_id" = Uuid, Path, description = "Claim id"),
        ("item_id" = Uuid, Path, description = "Item id")
    ),
    request_body(content_type = "multipart/form-data", description = "A single `file` part."),
    responses(
        (status = 201, description = "Attachment stored"),
        (status = 400, description = "Missing or empty file", body = ErrorResponse),
        (status = 404, description = "Item not found", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse)
    )
)]
pub async fn upload_attachment_handler(
    State(state): State<Arc<AppState>>,
    Path((claim_id, item_id)): Path<(Uuid, Uuid)>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Attachment>), ApiError> {
    let upload = read_upload(multipart, state.config.max_upload_bytes).await?;
    let attachment = store_attachment(&state, claim_id, item_id, upload).await?;
    Ok((StatusCode::CREATED, Json(attachment)))
}

#[utoipa::path(
    delete,
    path = "/claims/{claim_id}/items/{item_id}/attachments/{attachment_id}",
    tag = "claims",
    params(
        ("claim_id" = Uuid, Path, description = "Claim id"),
        ("item_id" = Uuid, Path, description = "Item id"),
        ("attachment_id" = Uuid, Path, description = "Attachment id")
    ),
    responses(
        (status = 204, description = "Attachment deleted"),
        (status = 404, description = "Attachment not found", body = ErrorResponse)
    )
)]
pub async fn delete_attachment_handler(
    State(state): State<Arc<AppState>>,
    Path((claim_id, item_id, attachment_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .repo
        .delete_attachment(claim_id, item_id, attachment_id)
        .await?;
    remove_objects(&state, &[removed.storage_key]).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Serve the bytes of a stored attachment or thumbnail.
#[utoipa::path(
    get,
    path = "/files/{key}",
    tag = "claims",
    params(("key" = String, Path, description = "Storage key")),
    responses(
        (status = 200, description = "File contents"),
        (status = 404, description = "No such file", body = ErrorResponse)
    )
)]
pub async fn serve_file_handler(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.storage.get(&key).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&key))], data))
}

//=========================================================================================
// Share Links
//=========================================================================================

/// Share a claim. Returns the existing link when the claim is already shared.
#[utoipa::path(
    post,
    path = "/claims/{claim_id}/share",
    tag = "sharing",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    responses(
        (status = 200, description = "The claim's share link"),
        (status = 404, description = "Claim not found", body = ErrorResponse)
    )
)]
pub async fn create_share_link_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<ShareLink>, ApiError> {
    let token = Uuid::new_v4().simple().to_string();
    let link = state.repo.create_share_link(claim_id, &token).await?;
    Ok(Json(link))
}

#[utoipa::path(
    get,
    path = "/claims/{claim_id}/share",
    tag = "sharing",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    responses(
        (status = 200, description = "The claim's share link"),
        (status = 404, description = "The claim is not shared", body = ErrorResponse)
    )
)]
pub async fn get_share_link_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
) -> Result<Json<ShareLink>, ApiError> {
    state
        .repo
        .get_share_link(claim_id)
        .await?
        .map(Json)
        .ok_or_else(|| PortError::NotFound(format!("Claim {} is not shared", claim_id)).into())
}

#[utoipa::path(
    delete,
    path = "/claims/{claim_id}/share",
    tag = "sharing",
    params(("claim_id" = Uuid, Path, description = "Claim id")),
    responses((status = 204, description = "Share link revoked"))
)]
pub async fn revoke_share_link_handler(
    State(state): State<Arc<AppState>>,
    Path(claim_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_share_link(claim_id).await?;
    info!(%claim_id, "Share link revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// Read-only view of a shared claim.
#[utoipa::path(
    get,
    path = "/shared/{token}",
    tag = "sharing",
    params(("token" = String, Path, description = "Share token")),
    responses(
        (status = 200, description = "Claim detail"),
        (status = 404, description = "Unknown or revoked token", body = ErrorResponse)
    )
)]
pub async fn get_shared_claim_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ClaimDetail>, ApiError> {
    Ok(Json(state.repo.get_claim_by_share_token(&token).await?))
}
