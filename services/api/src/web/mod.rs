pub mod files;
pub mod middleware;
pub mod rest;
pub mod state;

#[cfg(test)]
mod tests;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, Method,
    },
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::web::middleware::{identify_user, USER_ID_HEADER};
use crate::web::rest::*;
use crate::web::state::AppState;

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Builds the complete REST router for the given state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(state.config.cors_origin.clone())
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static(USER_ID_HEADER)]);

    Router::new()
        .route("/claims", get(list_claims_handler).post(create_claim_handler))
        .route(
            "/claims/{claim_id}",
            get(get_claim_handler)
                .patch(update_claim_handler)
                .delete(delete_claim_handler),
        )
        .route("/claims/{claim_id}/items", post(create_item_handler))
        .route("/claims/{claim_id}/items/reorder", put(reorder_items_handler))
        .route(
            "/claims/{claim_id}/items/{item_id}",
            axum::routing::patch(update_item_handler).delete(delete_item_handler),
        )
        .route(
            "/claims/{claim_id}/items/{item_id}/attachments",
            post(upload_attachment_handler),
        )
        .route(
            "/claims/{claim_id}/items/{item_id}/attachments/{attachment_id}",
            axum::routing::delete(delete_attachment_handler),
        )
        .route(
            "/claims/{claim_id}/share",
            post(create_share_link_handler)
                .get(get_share_link_handler)
                .delete(revoke_share_link_handler),
        )
        .route("/shared/{token}", get(get_shared_claim_handler))
        .route("/files/{*key}", get(serve_file_handler))
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes + MULTIPART_OVERHEAD,
        ))
        .layer(axum_middleware::from_fn(identify_user))
        .layer(cors)
        .with_state(state)
}
