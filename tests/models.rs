//! Integration tests for GET /v1/models and GET /health.

use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use trae_proxy::config::Config;
use trae_proxy::proxy::{create_router, AppState};

fn setup_app(upstream_uri: &str, owned_by: Option<&str>) -> axum::Router {
    let mut config = Config::default();
    config.upstream.base_url = upstream_uri.to_string();
    if let Some(owner) = owned_by {
        config.upstream.owned_by = owner.to_string();
    }
    create_router(AppState::new(config).expect("build app state"))
}

async fn parse_body(response: axum::response::Response) -> (StatusCode, Vec<u8>) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    (status, body.to_vec())
}

fn models_request() -> Request<Body> {
    Request::get("/v1/models")
        .header("authorization", "Bearer tok-9")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_models_are_remapped() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ide/v1/model_list"))
        .and(query_param("type", "llm_raw_chat"))
        .and(header("x-ide-token", "tok-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_configs": [{"name": "gpt-x", "display_name": "GPT X"}]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = setup_app(&upstream.uri(), None);
    let (status, body) = parse_body(app.oneshot(models_request()).await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        json,
        json!({
            "object": "list",
            "data": [{"id": "gpt-x", "object": "model", "created": 0, "owned_by": "trae"}]
        })
    );
}

#[tokio::test]
async fn test_models_owned_by_is_configurable() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ide/v1/model_list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model_configs": [{"name": "a"}, {"name": "b"}]
        })))
        .mount(&upstream)
        .await;

    let app = setup_app(&upstream.uri(), Some("vendor"));
    let (status, body) = parse_body(app.oneshot(models_request()).await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    let data = json["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[1]["id"], "b");
    assert!(data.iter().all(|m| m["owned_by"] == "vendor"));
}

#[tokio::test]
async fn test_models_upstream_failure_returns_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ide/v1/model_list"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&upstream)
        .await;

    let app = setup_app(&upstream.uri(), None);
    let (status, body) = parse_body(app.oneshot(models_request()).await.unwrap()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("503"), "body: {}", text);
    assert!(text.contains("maintenance"), "body: {}", text);
}

#[tokio::test]
async fn test_health() {
    let app = setup_app("http://127.0.0.1:9", None);
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = parse_body(app.oneshot(request).await.unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["service"], "trae-proxy");
}
