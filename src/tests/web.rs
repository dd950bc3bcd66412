use std::sync::atomic::Ordering;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::search::retriever::RetrievalError;
use crate::web::{router, SharedState};

use super::fakes::*;

fn create_app(harness: Harness) -> (Router, Harness) {
    let app = router(SharedState {
        pipeline: harness.pipeline.clone(),
    });
    (app, harness)
}

fn default_app(candidates: Vec<crate::search::retriever::SimilarityCandidate>) -> (Router, Harness) {
    create_app(Harness::new(
        FakeEmbedder::default(),
        FakeSimilarityStore::with(candidates),
        FakeMetadataStore::with(vec![
            movie(1, "Primer", 5),
            movie(2, "Back to the Future", 500),
        ]),
        settings(),
    ))
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_search_returns_ranked_movies() {
    let (app, h) = default_app(vec![candidate(1, 0.9, Some(5)), candidate(2, 0.89, Some(500))]);

    let (status, body) = post_json(app, "/api/search", json!({"query": "time travel"})).await;
    assert_eq!(status, StatusCode::OK);

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], 2);
    assert_eq!(results[0]["title"], "Back to the Future");
    assert!(results[0]["score"].is_number());
    assert_eq!(body["meta"]["returned"], 2);
    assert_eq!(h.calls(), (1, 1, 1));
}

#[tokio::test]
async fn test_search_without_query_is_bad_request() {
    let (app, h) = default_app(vec![]);

    let (status, body) = post_json(app, "/api/search", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "invalid_input");
    assert!(body["error"].is_string());
    assert_eq!(h.calls(), (0, 0, 0));
}

#[tokio::test]
async fn test_search_timeout_maps_to_gateway_timeout() {
    let (app, h) = default_app(vec![]);
    *h.similarity.fail_with.lock().unwrap() = Some(RetrievalError::Timeout("57014".into()));

    let (status, body) = post_json(app, "/api/search", json!({"query": "slow"})).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["kind"], "timeout");
    assert_eq!(
        body["error"],
        "Search took too long. Please try a more specific query."
    );
}

#[tokio::test]
async fn test_store_down_is_bad_gateway() {
    let (app, h) = default_app(vec![]);
    *h.similarity.fail_with.lock().unwrap() =
        Some(RetrievalError::Unavailable("503 Service Unavailable".into()));

    let (status, body) = post_json(app, "/api/search", json!({"query": "heist"})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["kind"], "unavailable");
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let (app, _h) = default_app(vec![]);

    let request = Request::builder()
        .method("POST")
        .uri("/api/search")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_movies_by_ids() {
    let (app, _h) = default_app(vec![]);

    let (status, body) = post_json(app, "/api/movies-by-ids", json!({"ids": [2, 3, 1]})).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 1]);
}

#[tokio::test]
async fn test_health() {
    let (app, _h) = default_app(vec![]);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["metadata"], "fake");
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let (app, h) = default_app(vec![]);
    h.metadata.unreachable.store(true, Ordering::SeqCst);

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].as_str().unwrap().contains("connection refused"));
}
