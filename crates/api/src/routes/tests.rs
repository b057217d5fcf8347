use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use exec_signing_core::artifact::MemoryArtifactStorage;
use exec_signing_core::document::DocumentId;
use exec_signing_core::notify::{RecordingNotifier, SentNotification};
use exec_signing_core::store::MemoryDocumentStore;
use exec_signing_core::SigningService;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::build_router;
use crate::auth::{Claims, ADMIN_ROLE};
use crate::config::AppConfig;
use crate::state::AppState;

struct TestApp {
    router: Router,
    artifacts: MemoryArtifactStorage,
    notifier: RecordingNotifier,
}

fn app() -> TestApp {
    let config = AppConfig::for_tests();
    let artifacts = MemoryArtifactStorage::new();
    let notifier = RecordingNotifier::new();
    let signing = SigningService::new(
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(artifacts.clone()),
        Arc::new(notifier.clone()),
        config.signing_settings(),
    );
    TestApp {
        router: build_router(AppState::new(signing, config)),
        artifacts,
        notifier,
    }
}

fn bearer(email: &str) -> String {
    sign_claims(email, None)
}

fn admin_bearer() -> String {
    sign_claims("admin@example.com", Some(ADMIN_ROLE))
}

fn sign_claims(email: &str, role: Option<&str>) -> String {
    let claims = Claims {
        sub: format!("user-{email}"),
        email: email.to_string(),
        exp: 4_102_444_800,
        role: role.map(str::to_string),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap();
    format!("Bearer {token}")
}

fn signature_image() -> String {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, 8, 8);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        let mut data = vec![0u8; 8 * 8 * 4];
        for px in data.chunks_mut(4).step_by(9) {
            px.copy_from_slice(&[20, 20, 20, 255]);
        }
        writer.write_image_data(&data).unwrap();
    }
    format!("data:image/png;base64,{}", STANDARD.encode(out))
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        request = request.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Waits for the spawned notification to land.
async fn delivered(notifier: &RecordingNotifier) -> Vec<SentNotification> {
    for _ in 0..100 {
        let sent = notifier.sent().await;
        if !sent.is_empty() {
            return sent;
        }
        tokio::task::yield_now().await;
    }
    panic!("notification was never delivered");
}

async fn provision_chain(app: &TestApp, email: &str) -> (DocumentId, DocumentId) {
    let first = DocumentId::new();
    let second = DocumentId::new();
    let first_url = app.artifacts.put(&format!("originals/{first}.pdf"), b"%PDF a".to_vec()).await;
    let second_url = app.artifacts.put(&format!("originals/{second}.pdf"), b"%PDF b".to_vec()).await;
    let (status, _) = call(
        &app.router,
        Method::POST,
        "/v1/documents",
        Some(&admin_bearer()),
        Some(json!({
            "documents": [
                {
                    "id": first,
                    "type": "pre_incorporation_consent",
                    "signer_name": "Ada",
                    "signer_email": email,
                    "signer_role": "CEO",
                    "signing_stage": 1,
                    "file_url": first_url,
                },
                {
                    "id": second,
                    "type": "appointment_letter",
                    "signer_name": "Ada",
                    "signer_email": email,
                    "signer_role": "CEO",
                    "signing_stage": 2,
                    "depends_on_document_id": first,
                    "file_url": second_url,
                }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    (first, second)
}

#[tokio::test]
async fn ping_and_health() {
    let app = app();
    let (status, body) = call(&app.router, Method::GET, "/v1/ping", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "connected");
}

#[tokio::test]
async fn listing_requires_a_valid_bearer() {
    let app = app();
    let (status, body) = call(&app.router, Method::GET, "/v1/documents", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["type"], "unauthorized");

    let (status, _) = call(
        &app.router,
        Method::GET,
        "/v1/documents",
        Some("Bearer not-a-jwt"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signer_works_through_a_staged_chain() {
    let app = app();
    let auth = bearer("ada@example.com");
    let (first, second) = provision_chain(&app, "ada@example.com").await;

    let (status, body) = call(&app.router, Method::GET, "/v1/documents", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    let documents = body["documents"].as_array().unwrap();
    assert_eq!(documents[0]["id"], json!(first));
    assert_eq!(documents[0]["can_sign"], true);
    assert_eq!(documents[1]["can_sign"], false);
    assert_eq!(documents[1]["blocking_documents"][0]["id"], json!(first));
    assert_eq!(body["progress"]["stages"][1]["unlocked"], false);

    let submit = |id: DocumentId| {
        json!({
            "document_id": id,
            "typed_name": "Ada Lovelace",
            "signature_image": signature_image(),
        })
    };

    let (status, body) = call(&app.router, Method::POST, "/v1/signatures", Some(&auth), Some(submit(second))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "DependencyNotMet");
    assert_eq!(body["blocking_document"]["name"], "Pre-Incorporation Consent");

    let (status, body) = call(&app.router, Method::POST, "/v1/signatures", Some(&auth), Some(submit(first))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let (status, body) = call(&app.router, Method::POST, "/v1/signatures", Some(&auth), Some(submit(first))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "AlreadySigned");

    let (status, _) = call(&app.router, Method::POST, "/v1/signatures", Some(&auth), Some(submit(second))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn portal_token_flow() {
    let app = app();
    let admin = admin_bearer();
    let (first, _) = provision_chain(&app, "ada@example.com").await;

    let (status, link) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/token"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(link["document_id"], json!(first));
    assert!(link.get("portal_url").is_none());

    let sent = delivered(&app.notifier).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signer_email, "ada@example.com");
    assert!(sent[0].portal_url.starts_with("https://portal.test/executive/sign?token="));
    let token = sent[0].portal_url.rsplit('=').next().unwrap().to_string();

    let (status, view) = call(
        &app.router,
        Method::GET,
        &format!("/v1/documents/by-token?token={token}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["id"], json!(first));
    assert_eq!(view["can_sign"], true);

    let body = json!({
        "document_id": first,
        "typed_name": "Ada Lovelace",
        "signature_image": signature_image(),
        "signature_token": token,
    });
    let (status, _) = call(&app.router, Method::POST, "/v1/signatures", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app.router, Method::POST, "/v1/signatures", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenNotFound");

    let (status, body) = call(
        &app.router,
        Method::GET,
        &format!("/v1/documents/by-token?token={token}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "TokenNotFound");
}

#[tokio::test]
async fn non_signer_cannot_obtain_a_signing_token() {
    let app = app();
    let (first, _) = provision_chain(&app, "ada@example.com").await;
    let mallory = bearer("mallory@example.com");

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/token"),
        Some(&mallory),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "forbidden");
    assert!(app.notifier.sent().await.is_empty());

    // An admin-issued link answers with a receipt only.
    let (status, link) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/token"),
        Some(&admin_bearer()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let mut fields: Vec<&str> = link.as_object().unwrap().keys().map(String::as_str).collect();
    fields.sort();
    assert_eq!(fields, ["document_id", "expires_at"]);
    assert!(!link.to_string().contains("token="));

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/v1/signatures",
        Some(&mallory),
        Some(json!({
            "document_id": first,
            "typed_name": "Mallory",
            "signature_image": signature_image(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NotAuthorized");
}

#[tokio::test]
async fn administrative_routes_require_the_admin_role() {
    let app = app();
    let (first, _) = provision_chain(&app, "ada@example.com").await;
    let mallory = bearer("mallory@example.com");

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/versions"),
        Some(&mallory),
        Some(json!({ "signer_email": "mallory@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["type"], "forbidden");

    for uri in [
        format!("/v1/documents/{first}/versions"),
        format!("/v1/documents/{first}/versions/1"),
    ] {
        let (status, body) = call(&app.router, Method::GET, &uri, Some(&mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"]["type"], "forbidden");
    }

    // The assigned signer is not an admin either.
    let (status, _) = call(
        &app.router,
        Method::POST,
        "/v1/documents",
        Some(&bearer("ada@example.com")),
        Some(json!({ "documents": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app.router,
        Method::POST,
        "/v1/signatures",
        Some(&mallory),
        Some(json!({
            "document_id": first,
            "typed_name": "Mallory",
            "signature_image": signature_image(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NotAuthorized");

    let (status, history) = call(
        &app.router,
        Method::GET,
        &format!("/v1/documents/{first}/versions"),
        Some(&admin_bearer()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["signer_email"], "ada@example.com");
}

#[tokio::test]
async fn versions_and_decline() {
    let app = app();
    let admin = admin_bearer();
    let (first, _) = provision_chain(&app, "ada@example.com").await;

    let (status, revised) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/versions"),
        Some(&admin),
        Some(json!({ "title": "Consent (corrected)" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(revised["version"], 2);

    let (status, history) = call(
        &app.router,
        Method::GET,
        &format!("/v1/documents/{first}/versions"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["is_latest_version"], false);

    let (status, v1) = call(
        &app.router,
        Method::GET,
        &format!("/v1/documents/{first}/versions/1"),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v1["title"], Value::Null);

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/decline"),
        Some(&bearer("mallory@example.com")),
        Some(json!({ "reason": "not mine" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "NotAuthorized");

    let (status, declined) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/decline"),
        Some(&bearer("ada@example.com")),
        Some(json!({ "reason": "terms changed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(declined["signature_status"], "declined");
    assert_eq!(declined["decline_reason"], "terms changed");

    let (status, body) = call(
        &app.router,
        Method::POST,
        &format!("/v1/documents/{first}/versions"),
        Some(&admin),
        Some(json!({ "title": "too late" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "DocumentFinalized");
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let app = app();
    let (status, body) = call(
        &app.router,
        Method::GET,
        "/v1/documents/not-a-uuid/versions",
        Some(&admin_bearer()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "badRequest");
}
