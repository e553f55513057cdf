//! services/api/src/web/files.rs
//!
//! The attachment pipeline between the multipart request, object storage and the
//! repository. Objects are written before the metadata row; if the row cannot be
//! created the objects are removed again.

use axum::{extract::Multipart, http::StatusCode};
use bytes::Bytes;
use claims_core::domain::{Attachment, AttachmentUpload, ValidationError};
use claims_core::ports::NewAttachment;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::thumbnail::inspect_image;
use crate::error::ApiError;
use crate::web::state::AppState;

/// Name of the multipart part carrying the file.
pub const FILE_PART: &str = "file";

/// Reduces a client-supplied filename to a single safe path component.
pub fn sanitize_filename(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn thumbnail_key(storage_key: &str) -> String {
    format!("{}.thumb.jpg", storage_key)
}

/// Reads the `file` part of an upload request.
pub async fn read_upload(
    mut multipart: Multipart,
    max_bytes: usize,
) -> Result<AttachmentUpload, ApiError> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(max_bytes)
        } else {
            ApiError::BadRequest(format!("Failed to read multipart data: {}", e.body_text()))
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_PART) {
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or("upload"));
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.is_empty() {
            return Err(ValidationError::EmptyUpload.into());
        }
        if bytes.len() > max_bytes {
            return Err(ApiError::PayloadTooLarge(max_bytes));
        }
        return Ok(AttachmentUpload {
            filename,
            mime_type,
            bytes,
        });
    }
    Err(ApiError::BadRequest(
        "Multipart form must include a file part".to_string(),
    ))
}

/// Stores the upload (plus a thumbnail for images) and records its metadata.
pub async fn store_attachment(
    state: &AppState,
    claim_id: Uuid,
    item_id: Uuid,
    upload: AttachmentUpload,
) -> Result<Attachment, ApiError> {
    let key = format!(
        "claims/{}/items/{}/{}/{}",
        claim_id,
        item_id,
        Uuid::new_v4(),
        upload.filename
    );

    let data = upload.bytes.clone();
    let mime_type = upload.mime_type.clone();
    let image = tokio::task::spawn_blocking(move || inspect_image(&data, &mime_type))
        .await
        .map_err(|e| ApiError::Internal(format!("Image inspection failed: {}", e)))?;

    state.storage.put(&key, upload.bytes.clone()).await?;
    let mut thumbnail_url = None;
    if let Some(image) = &image {
        let thumb_key = thumbnail_key(&key);
        if let Err(e) = state
            .storage
            .put(&thumb_key, Bytes::from(image.thumbnail.clone()))
            .await
        {
            remove_objects(state, &[key]).await;
            return Err(e.into());
        }
        thumbnail_url = Some(state.file_url(&thumb_key));
    }

    let metadata = NewAttachment {
        filename: upload.filename,
        url: state.file_url(&key),
        thumbnail_url,
        mime_type: upload.mime_type,
        size: upload.bytes.len() as i64,
        width: image.as_ref().map(|i| i.width as i32),
        height: image.as_ref().map(|i| i.height as i32),
        storage_key: key.clone(),
    };
    match state.repo.create_attachment(claim_id, item_id, metadata).await {
        Ok(attachment) => {
            info!(%claim_id, %item_id, key = %key, "Attachment stored");
            Ok(attachment)
        }
        Err(e) => {
            remove_objects(state, &[key]).await;
            Err(e.into())
        }
    }
}

/// Deletes stored objects and their thumbnails. Failures are only logged.
pub async fn remove_objects(state: &AppState, keys: &[String]) {
    for key in keys {
        for object in [key.clone(), thumbnail_key(key)] {
            if let Err(e) = state.storage.delete(&object).await {
                warn!(key = %object, "Failed to delete stored object: {}", e);
            }
        }
    }
}
