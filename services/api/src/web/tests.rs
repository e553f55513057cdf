use super::*;
use crate::adapters::thumbnail::sample_png;
use crate::adapters::{LocalStorageAdapter, MemoryAdapter};
use crate::config::Config;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const BASE_URL: &str = "http://files.test";
const BOUNDARY: &str = "claims-test-boundary";

struct TestApp {
    router: Router,
    _dir: TempDir,
}

fn app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let storage_path = dir.path().to_string_lossy().to_string();
    let config = Config::from_lookup(|name| match name {
        "PUBLIC_BASE_URL" => Some(BASE_URL.to_string()),
        "STORAGE_PATH" => Some(storage_path.clone()),
        _ => None,
    })
    .unwrap();
    let state = Arc::new(AppState {
        repo: Arc::new(MemoryAdapter::new()),
        storage: Arc::new(LocalStorageAdapter::new(dir.path().to_path_buf())),
        config: Arc::new(config),
    });
    TestApp {
        router: router(state),
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let (status, bytes) = self.send(req).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_claim(&self, number: &str) -> String {
        let (status, claim) = self
            .json("POST", "/claims", Some(json!({ "claim_number": number })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        claim["id"].as_str().unwrap().to_string()
    }

    async fn create_item(&self, claim_id: &str, title: &str) -> String {
        let (status, item) = self
            .json(
                "POST",
                &format!("/claims/{}/items", claim_id),
                Some(json!({ "title": title })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        item["id"].as_str().unwrap().to_string()
    }

    async fn upload(&self, uri: &str, filename: &str, mime: &str, data: &[u8]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: {m}\r\n\r\n",
                b = BOUNDARY,
                f = filename,
                m = mime
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, bytes) = self.send(req).await;
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

/// Strips the public base URL so the file can be fetched through the router.
fn local_path(url: &str) -> &str {
    url.strip_prefix(BASE_URL).unwrap()
}

#[tokio::test]
async fn claims_are_created_and_listed_with_item_counts() {
    let app = app();
    let claim_id = app.create_claim("CLM-100").await;
    app.create_item(&claim_id, "Roof").await;

    let (status, list) = app.json("GET", "/claims", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list[0]["claim_number"], "CLM-100");
    assert_eq!(list[0]["status"], "PENDING");
    assert_eq!(list[0]["item_count"], 1);
}

#[tokio::test]
async fn duplicate_claim_numbers_conflict() {
    let app = app();
    app.create_claim("CLM-1").await;

    let (status, body) = app
        .json("POST", "/claims", Some(json!({ "claim_number": "CLM-1" })))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn blank_claim_numbers_are_rejected() {
    let app = app();
    let (status, body) = app
        .json("POST", "/claims", Some(json!({ "claim_number": "  " })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Claim number must not be empty");
}

#[tokio::test]
async fn patch_clears_only_the_fields_it_names() {
    let app = app();
    let (_, claim) = app
        .json(
            "POST",
            "/claims",
            Some(json!({ "claim_number": "CLM-2", "customer": "Acme", "claimant_name": "Jane" })),
        )
        .await;
    let id = claim["id"].as_str().unwrap();

    let (status, updated) = app
        .json(
            "PATCH",
            &format!("/claims/{}", id),
            Some(json!({ "customer": null, "status": "APPROVED" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["customer"], Value::Null);
    assert_eq!(updated["claimant_name"], "Jane");
    assert_eq!(updated["status"], "APPROVED");
}

#[tokio::test]
async fn unknown_claims_are_not_found() {
    let app = app();
    let (status, _) = app
        .json("GET", &format!("/claims/{}", uuid::Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reorder_applies_the_new_sequence() {
    let app = app();
    let claim_id = app.create_claim("CLM-3").await;
    let first = app.create_item(&claim_id, "First").await;
    let second = app.create_item(&claim_id, "Second").await;

    let (status, _) = app
        .json(
            "PUT",
            &format!("/claims/{}/items/reorder", claim_id),
            Some(json!([{ "id": first, "order": 0 }, { "id": second, "order": 1 }])),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, detail) = app.json("GET", &format!("/claims/{}", claim_id), None).await;
    assert_eq!(detail["items"][0]["title"], "First");
    assert_eq!(detail["items"][1]["title"], "Second");
}

#[tokio::test]
async fn reorder_must_name_every_item() {
    let app = app();
    let claim_id = app.create_claim("CLM-4").await;
    let first = app.create_item(&claim_id, "First").await;
    app.create_item(&claim_id, "Second").await;

    let (status, body) = app
        .json(
            "PUT",
            &format!("/claims/{}/items/reorder", claim_id),
            Some(json!([{ "id": first, "order": 0 }])),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn share_links_are_idempotent_and_resolve_to_the_claim() {
    let app = app();
    let claim_id = app.create_claim("CLM-5").await;
    let share_uri = format!("/claims/{}/share", claim_id);

    let (status, _) = app.json("GET", &share_uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, first) = app.json("POST", &share_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, second) = app.json("POST", &share_uri, None).await;
    assert_eq!(first["token"], second["token"]);

    let token = first["token"].as_str().unwrap();
    let (status, shared) = app.json("GET", &format!("/shared/{}", token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shared["claim_number"], "CLM-5");

    let (status, _) = app.json("DELETE", &share_uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.json("GET", &format!("/shared/{}", token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn image_uploads_get_dimensions_and_a_thumbnail() {
    let app = app();
    let claim_id = app.create_claim("CLM-6").await;
    let item_id = app.create_item(&claim_id, "Kitchen").await;

    let png = sample_png(640, 480);
    let (status, attachment) = app
        .upload(
            &format!("/claims/{}/items/{}/attachments", claim_id, item_id),
            "kitchen.png",
            "image/png",
            &png,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(attachment["width"], 640);
    assert_eq!(attachment["height"], 480);
    assert_eq!(attachment["size"], png.len());

    let file_uri = local_path(attachment["url"].as_str().unwrap()).to_string();
    let req = Request::get(file_uri.as_str()).body(Body::empty()).unwrap();
    let (status, bytes) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, png);

    let thumb_uri = local_path(attachment["thumbnail_url"].as_str().unwrap()).to_string();
    let req = Request::get(thumb_uri.as_str()).body(Body::empty()).unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_a_claim_removes_its_files() {
    let app = app();
    let claim_id = app.create_claim("CLM-7").await;
    let item_id = app.create_item(&claim_id, "Garage").await;
    let (_, attachment) = app
        .upload(
            &format!("/claims/{}/items/{}/attachments", claim_id, item_id),
            "notes.txt",
            "text/plain",
            b"water line burst",
        )
        .await;
    assert_eq!(attachment["thumbnail_url"], Value::Null);
    let file_uri = local_path(attachment["url"].as_str().unwrap()).to_string();

    let (status, _) = app.json("DELETE", &format!("/claims/{}", claim_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let req = Request::get(file_uri.as_str()).body(Body::empty()).unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json("GET", &format!("/claims/{}", claim_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_uploads_are_rejected() {
    let app = app();
    let claim_id = app.create_claim("CLM-8").await;
    let item_id = app.create_item(&claim_id, "Porch").await;
    let (status, body) = app
        .upload(
            &format!("/claims/{}/items/{}/attachments", claim_id, item_id),
            "empty.txt",
            "text/plain",
            b"",
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Attachment upload is empty");
}

#[tokio::test]
async fn malformed_user_ids_are_rejected() {
    let app = app();
    let req = Request::get("/claims")
        .header(USER_ID_HEADER, "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let (status, _) = app.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn created_claims_are_attributed_to_the_caller() {
    let app = app();
    let user = uuid::Uuid::new_v4();
    let req = Request::post("/claims")
        .header(USER_ID_HEADER, user.to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "claim_number": "CLM-9" }).to_string()))
        .unwrap();
    let (status, bytes) = app.send(req).await;
    assert_eq!(status, StatusCode::CREATED);
    let claim: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(claim["user_id"], user.to_string());
}
