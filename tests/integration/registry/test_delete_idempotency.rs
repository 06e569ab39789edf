use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use crate::common::{body_json, json_request, test_app};

#[tokio::test]
async fn deleting_the_same_stream_twice_is_idempotent_but_deleting_an_unknown_id_is_not_found() {
    let app = test_app();
    let create = json_request("POST", "/api/streams", json!({"name": "Front Door", "rtsp_url": "rtsp://10.0.0.5/s"}));
    let created = body_json(app.clone().oneshot(create).await.unwrap()).await;
    let id = created["id"].as_str().unwrap().to_string();

    let delete_req = axum::http::Request::builder()
        .method("DELETE")
        .uri(format!("/api/streams/{id}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let first = app.clone().oneshot(delete_req).await.unwrap();
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let delete_again = axum::http::Request::builder()
        .method("DELETE")
        .uri(format!("/api/streams/{id}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let second = app.clone().oneshot(delete_again).await.unwrap();
    assert_eq!(second.status(), StatusCode::NO_CONTENT);

    let delete_unknown = axum::http::Request::builder()
        .method("DELETE")
        .uri("/api/streams/never-existed")
        .body(axum::body::Body::empty())
        .unwrap();
    let third = app.oneshot(delete_unknown).await.unwrap();
    assert_eq!(third.status(), StatusCode::NOT_FOUND);
}
