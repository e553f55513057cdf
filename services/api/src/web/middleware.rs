//! services/api/src/web/middleware.rs
//!
//! Request attribution middleware.

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the caller's user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The user a request is attributed to, if the caller named one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CurrentUser(pub Option<Uuid>);

/// Reads the optional `x-user-id` header into a `CurrentUser` request extension.
///
/// A missing header is fine; a malformed one is rejected with 400.
pub async fn identify_user(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let user_id = match req.headers().get(USER_ID_HEADER) {
        None => None,
        Some(value) => {
            let parsed = value
                .to_str()
                .ok()
                .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
                .ok_or_else(|| ApiError::BadRequest("Invalid x-user-id format".to_string()))?;
            Some(parsed)
        }
    };
    req.extensions_mut().insert(CurrentUser(user_id));
    Ok(next.run(req).await)
}
