use axum::http::StatusCode;
use serde_json::json;
use tower::ServiceExt;

use crate::common::{body_json, json_request, test_app};

#[tokio::test]
async fn reorder_with_unknown_id_is_rejected() {
    let app = test_app();
    let first = json_request("POST", "/api/streams", json!({"name": "Front Door", "rtsp_url": "rtsp://10.0.0.5/s"}));
    let created = body_json(app.clone().oneshot(first).await.unwrap()).await;
    let id = created["id"].as_str().unwrap().to_string();

    let second = json_request("POST", "/api/streams", json!({"name": "Back Yard", "rtsp_url": "rtsp://10.0.0.6/s"}));
    assert_eq!(app.clone().oneshot(second).await.unwrap().status(), StatusCode::CREATED);

    let reorder = json_request("POST", "/api/streams/reorder", json!({"order": [id, "bogus-id"]}));
    let response = app.oneshot(reorder).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
