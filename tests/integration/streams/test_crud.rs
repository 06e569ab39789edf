use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::common::{body_json, json_request, test_app};

#[tokio::test]
async fn create_then_list_round_trips() {
    let app = test_app();

    let create = json_request(
        "POST",
        "/api/streams",
        json!({"name": "Front Door", "rtsp_url": "rtsp://10.0.0.5/s"}),
    );
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["name"], "Front Door");
    assert_eq!(created["status"], "stopped");

    let list = app.oneshot(Request::builder().uri("/api/streams").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(list.status(), StatusCode::OK);
    let streams = body_json(list).await;
    assert_eq!(streams.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_name_is_case_insensitive_rejected() {
    let app = test_app();

    let first = json_request("POST", "/api/streams", json!({"name": "Front Door", "rtsp_url": "rtsp://10.0.0.5/s"}));
    assert_eq!(app.clone().oneshot(first).await.unwrap().status(), StatusCode::CREATED);

    let second =
        json_request("POST", "/api/streams", json!({"name": "front door", "rtsp_url": "rtsp://10.0.0.6/s"}));
    let response = app.oneshot(second).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "DUPLICATE_NAME");
    // The request-id middleware injects this into every error body.
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn get_unknown_id_is_not_found() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().uri("/api/streams/does-not-exist").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
