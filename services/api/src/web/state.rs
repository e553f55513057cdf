//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every request handler.

use crate::config::Config;
use claims_core::ports::{ClaimRepository, ObjectStorage};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn ClaimRepository>,
    pub storage: Arc<dyn ObjectStorage>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Public URL under which a stored object is served.
    pub fn file_url(&self, key: &str) -> String {
        format!("{}/files/{}", self.config.public_base_url, key)
    }
}
