//! Router-level tests: requests go through the full axum stack with an
//! in-memory database, a static catalog and a wiremock-backed vendor.

mod test_utils;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use keyhub::catalog::StaticCatalog;
use keyhub::config::MegogoConfig;
use keyhub::providers::{MEGOGO_PROVIDER_ID, MegogoAdapter, ProviderRegistry};
use keyhub::server::create_app;
use serde_json::{Value, json};
use std::sync::Arc;
use test_utils::{app_state, routing, setup_test_db};
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn app_with_vendor(vendor_url: String) -> Router {
    let db = setup_test_db().await.expect("Failed to set up test database");
    let adapter = MegogoAdapter::new(&MegogoConfig {
        url: vendor_url,
        partner_id: Some("partner42".to_string()),
        secret: Some("topsecret".to_string()),
        timeout_secs: 5,
    })
    .expect("adapter builds");
    let registry = ProviderRegistry::builder()
        .register(Arc::new(adapter))
        .build();
    let catalog = StaticCatalog::new()
        .with_product(routing("P-TV", MEGOGO_PROVIDER_ID, Some("svc-1")))
        .with_product(routing("P-ORPHAN", "unknown-vendor", None));

    create_app(app_state(db, catalog, registry))
}

async fn app() -> Router {
    app_with_vendor("http://127.0.0.1:9".to_string()).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_root_and_health() {
    let app = app().await;

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "keyhub");

    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = app().await;

    let request = Request::builder()
        .uri("/")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
}

#[tokio::test]
async fn test_load_then_list_hides_values() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post(
            "/keys/load",
            json!({"items": [{"product_id": "P1", "value": "ABC123"}]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["status"], "new");

    send(
        &app,
        post(
            "/keys/load",
            json!({"items": [{"product_id": "P1", "value": "ABC123"}]}),
        ),
    )
    .await;

    let (status, body) = send(&app, get("/keys?product_id=P1&with_total_count=true")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["product_id"], "P1");
    assert!(body["items"][0].get("value").is_none());

    let id = body["items"][0]["id"].as_str().unwrap().to_string();
    let (status, body) = send(&app, get(&format!("/keys/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_status_valid"], true);
}

#[tokio::test]
async fn test_errors_are_problem_json() {
    let app = app().await;

    let response = app
        .clone()
        .oneshot(post("/keys/load", json!({"items": []})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );

    let (status, body) = send(&app, get("/keys?page_size=5000")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "incorrect_page_size");
    assert_eq!(body["kind"], "validation");

    let (status, body) = send(&app, get("/keys/not-a-uuid")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "object_not_found");

    let request = Request::builder()
        .method("POST")
        .uri("/keys/activate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_activate_rejects_unknown_product_and_vendor() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post(
            "/keys/activate",
            json!({"product_id": "NOPE", "order_id": "O1", "customer_phone": "77011234567"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "product_not_found");

    let (status, body) = send(
        &app,
        post(
            "/keys/activate",
            json!({"product_id": "P-ORPHAN", "order_id": "O1", "customer_phone": "77011234567"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "provider_not_connected");
    assert!(body["message"].as_str().unwrap().contains("unknown-vendor"));

    let (status, body) = send(
        &app,
        post(
            "/keys/activate",
            json!({"product_id": "P-TV", "order_id": "O1", "customer_phone": "12"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_phone");
}

#[tokio::test]
async fn test_vendor_activation_and_cancellation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/terminals/partner42/subscription/subscribe"))
        .and(query_param("phone", "77011234567"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"successful": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/terminals/partner42/subscription/unsubscribe"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"successful": true})))
        .expect(1)
        .mount(&server)
        .await;
    let app = app_with_vendor(server.uri()).await;

    let (status, body) = send(
        &app,
        post(
            "/keys/activate",
            json!({"product_id": "P-TV", "order_id": "O1", "customer_phone": "+77011234567"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "77011234567svc-1");
    assert_eq!(body["source"], "vendor");

    let (_, listing) = send(&app, get("/keys?order_id=O1")).await;
    assert_eq!(listing["items"][0]["status"], "activated");

    let (status, body) = send(&app, post("/keys/cancel", json!({"order_id": "O1"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, _) = send(&app, post("/keys/cancel", json!({"order_id": "O1"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreachable_vendor_without_pool_is_retryable() {
    let app = app().await;

    let (status, body) = send(
        &app,
        post(
            "/keys/activate",
            json!({"product_id": "P-TV", "order_id": "O1", "customer_phone": "77011234567"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "provider_not_available");
}

#[tokio::test]
async fn test_providers_catalog_and_routing() {
    let app = app().await;

    let (status, body) = send(&app, get("/providers")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["providers"][0]["id"], MEGOGO_PROVIDER_ID);
    assert_eq!(body["providers"][0]["protocol"], "signed_url");

    let (status, body) = send(&app, get(&format!("/providers/{MEGOGO_PROVIDER_ID}/catalog"))).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["code"], "method_not_supported");

    let (status, body) = send(&app, get("/products/P-TV/routing")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["provider_product_id"], "svc-1");

    let (status, _) = send(&app, get("/products/NOPE/routing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = app().await;

    let (status, body) = send(&app, get("/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/keys/activate").is_some());
}
