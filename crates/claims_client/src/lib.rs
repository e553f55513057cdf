//! crates/claims_client/src/lib.rs
//!
//! `ClaimsApi` over HTTP. Talks to the claims service's REST routes and maps
//! every failure onto `PortError` so the executor can classify it.

use std::time::Duration;

use async_trait::async_trait;
use claims_core::{
    Attachment, AttachmentUpload, Claim, ClaimDetail, ClaimPatch, ClaimSummary, ClaimsApi, Item,
    ItemOrder, ItemPatch, NewClaim, NewItem, PortError, PortResult, ShareLink,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Header the service reads to attribute new claims to a user.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_id: Option<Uuid>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            user_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct HttpClaimsApi {
    client: Client,
    base_url: String,
    user_id: Option<Uuid>,
}

impl HttpClaimsApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_id: config.user_id,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match self.user_id {
            Some(user_id) => builder.header(USER_ID_HEADER, user_id.to_string()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> PortResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(url = %response.url(), %status, "Claims API responded");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        let error = error_from_status(status, &body);
        warn!(%status, "Claims API request failed: {}", error);
        Err(error)
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> PortResult<T> {
        let response = self.send(builder).await?;
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| PortError::Malformed(e.to_string()))
    }

    async fn fetch_json<B, T>(&self, method: Method, path: &str, body: &B) -> PortResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.fetch(self.request(method, path).json(body)).await
    }

    async fn execute(&self, builder: RequestBuilder) -> PortResult<()> {
        self.send(builder).await.map(|_| ())
    }
}

fn transport_error(error: reqwest::Error) -> PortError {
    PortError::Transport(error.to_string())
}

/// Classifies a non-success response, preferring the service's `{"message"}` body.
fn error_from_status(status: StatusCode, body: &[u8]) -> PortError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text
            }
        });
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(message),
        StatusCode::CONFLICT => PortError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => PortError::Invalid(message),
        _ => PortError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl ClaimsApi for HttpClaimsApi {
    async fn list_claims(&self) -> PortResult<Vec<ClaimSummary>> {
        self.fetch(self.request(Method::GET, "/claims")).await
    }

    async fn get_claim(&self, claim_id: Uuid) -> PortResult<ClaimDetail> {
        self.fetch(self.request(Method::GET, &format!("/claims/{}", claim_id)))
            .await
    }

    async fn create_claim(&self, input: &NewClaim) -> PortResult<Claim> {
        self.fetch_json(Method::POST, "/claims", input).await
    }

    async fn update_claim(&self, claim_id: Uuid, patch: &ClaimPatch) -> PortResult<Claim> {
        self.fetch_json(Method::PATCH, &format!("/claims/{}", claim_id), patch)
            .await
    }

    async fn delete_claim(&self, claim_id: Uuid) -> PortResult<()> {
        self.execute(self.request(Method::DELETE, &format!("/claims/{}", claim_id)))
            .await
    }

    async fn create_item(&self, claim_id: Uuid, input: &NewItem) -> PortResult<Item> {
        self.fetch_json(Method::POST, &format!("/claims/{}/items", claim_id), input)
            .await
    }

    async fn update_item(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        patch: &ItemPatch,
    ) -> PortResult<Item> {
        let path = format!("/claims/{}/items/{}", claim_id, item_id);
        self.fetch_json(Method::PATCH, &path, patch).await
    }

    async fn delete_item(&self, claim_id: Uuid, item_id: Uuid) -> PortResult<()> {
        let path = format!("/claims/{}/items/{}", claim_id, item_id);
        self.execute(self.request(Method::DELETE, &path)).await
    }

    async fn reorder_items(&self, claim_id: Uuid, order: &[ItemOrder]) -> PortResult<()> {
        let path = format!("/claims/{}/items/reorder", claim_id);
        self.execute(self.request(Method::PUT, &path).json(order)).await
    }

    async fn upload_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        upload: &AttachmentUpload,
    ) -> PortResult<Attachment> {
        let part = Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| PortError::Invalid(e.to_string()))?;
        let path = format!("/claims/{}/items/{}/attachments", claim_id, item_id);
        let builder = self
            .request(Method::POST, &path)
            .multipart(Form::new().part("file", part));
        self.fetch(builder).await
    }

    async fn delete_attachment(
        &self,
        claim_id: Uuid,
        item_id: Uuid,
        attachment_id: Uuid,
    ) -> PortResult<()> {
        let path = format!(
            "/claims/{}/items/{}/attachments/{}",
            claim_id, item_id, attachment_id
        );
        self.execute(self.request(Method::DELETE, &path)).await
    }

    async fn create_share_link(&self, claim_id: Uuid) -> PortResult<ShareLink> {
        self.fetch(self.request(Method::POST, &format!("/claims/{}/share", claim_id)))
            .await
    }

    async fn get_share_link(&self, claim_id: Uuid) -> PortResult<Option<ShareLink>> {
        let builder = self.request(Method::GET, &format!("/claims/{}/share", claim_id));
        match self.fetch(builder).await {
            Ok(link) => Ok(Some(link)),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn revoke_share_link(&self, claim_id: Uuid) -> PortResult<()> {
        self.execute(self.request(Method::DELETE, &format!("/claims/{}/share", claim_id)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let api = HttpClaimsApi::new(ClientConfig::new("http://localhost:3000/")).unwrap();
        assert_eq!(api.url("/claims"), "http://localhost:3000/claims");
    }

    #[test]
    fn service_message_is_used_for_errors() {
        let error = error_from_status(
            StatusCode::CONFLICT,
            br#"{"message":"Claim number CLM-1 already exists"}"#,
        );
        assert_eq!(
            error,
            PortError::Conflict("Claim number CLM-1 already exists".into())
        );
    }

    #[test]
    fn unstructured_error_bodies_fall_back_to_text() {
        let error = error_from_status(StatusCode::BAD_GATEWAY, b"upstream down");
        assert_eq!(
            error,
            PortError::Status {
                status: 502,
                message: "upstream down".into()
            }
        );
        let empty = error_from_status(StatusCode::NOT_FOUND, b"");
        assert_eq!(empty, PortError::NotFound("Not Found".into()));
    }

    /// Serves one canned HTTP response on a local port.
    async fn respond_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn success_with_an_unparseable_body_is_malformed() {
        let base_url = respond_once("200 OK", "not json").await;
        let api = HttpClaimsApi::new(ClientConfig::new(base_url)).unwrap();

        let result = api
            .create_claim(&NewClaim {
                claim_number: "CLM-1".into(),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(PortError::Malformed(_))));
    }

    #[tokio::test]
    async fn error_status_from_the_wire_is_classified() {
        let base_url = respond_once("409 Conflict", r#"{"message":"taken"}"#).await;
        let api = HttpClaimsApi::new(ClientConfig::new(base_url)).unwrap();

        let result = api.get_claim(Uuid::new_v4()).await;

        assert_eq!(result, Err(PortError::Conflict("taken".into())));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        // Bind then drop a listener so the port is known to refuse connections.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let api = HttpClaimsApi::new(ClientConfig::new(format!("http://127.0.0.1:{}", port)))
            .unwrap();
        let result = api.list_claims().await;
        assert!(matches!(result, Err(PortError::Transport(_))));
    }
}
