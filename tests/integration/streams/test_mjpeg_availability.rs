use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::common::{body_json, json_request, test_app};

#[tokio::test]
async fn mjpeg_on_a_stopped_stream_is_unavailable() {
    let app = test_app();
    let create = json_request("POST", "/api/streams", json!({"name": "Front Door", "rtsp_url": "rtsp://10.0.0.5/s"}));
    let created = body_json(app.clone().oneshot(create).await.unwrap()).await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(Request::builder().uri(format!("/api/streams/{id}/mjpeg")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
