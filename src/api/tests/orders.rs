use super::*;
use crate::types::TaskStatus;
use serde_json::json;

fn order_body(tenant_id: &str, order_number: &str) -> serde_json::Value {
    json!({
        "request_id": "req-1",
        "tenant_id": tenant_id,
        "order_number": order_number,
        // Unsupported scheme: fails fast without touching the network
        "downloads": [
            { "url": "gopher://files.test/a.pdf", "filename": "a.pdf", "order_line": "1" }
        ],
        "debug": true
    })
}

async fn wait_for_terminal(app: &Router, task_id: &str) -> TaskStatus {
    for _ in 0..200 {
        let response = send(app, "GET", &format!("/api/order/task/{task_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status: TaskStatus = serde_json::from_value(json_body(response).await).unwrap();
        match status {
            TaskStatus::Queued | TaskStatus::Running => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            terminal => return terminal,
        }
    }
    panic!("task did not finish");
}

#[tokio::test]
async fn create_order_queues_a_job() {
    let (dir, app) = test_app();

    let response = send(&app, "POST", "/api/order", Some(order_body("acme", "1042"))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let task_id = json_body(response).await["task_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(dir.path().join("data/acme/1042").is_dir());

    match wait_for_terminal(&app, &task_id).await {
        TaskStatus::Completed { report } => {
            assert_eq!(report.request_id, "req-1");
            assert_eq!(report.errors.len(), 1);
            assert_eq!(report.errors[0].error_number, "001");
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_order_conflicts() {
    let (_dir, app) = test_app();

    let first = send(&app, "POST", "/api/order", Some(order_body("acme", "1042"))).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = send(&app, "POST", "/api/order", Some(order_body("acme", "1042"))).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(error_code(second).await, "order_exists");
}

#[tokio::test]
async fn empty_fields_are_rejected() {
    let (dir, app) = test_app();

    let mut no_downloads = order_body("acme", "1");
    no_downloads["downloads"] = json!([]);
    let mut blank_request = order_body("acme", "2");
    blank_request["request_id"] = json!("  ");

    for body in [no_downloads, blank_request, order_body("", "3")] {
        let response = send(&app, "POST", "/api/order", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(response).await, "validation_error");
    }
    assert!(!dir.path().join("data/acme").exists());
}

#[tokio::test]
async fn path_like_identifiers_are_rejected() {
    let (_dir, app) = test_app();

    let response = send(&app, "POST", "/api/order", Some(order_body("..", "1042"))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "invalid_identifier");
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (_dir, app) = test_app();

    let uri = format!("/api/order/task/{}", uuid::Uuid::new_v4());
    let response = send(&app, "GET", &uri, None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "GET", "/api/order/task/not-a-uuid", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_removes_the_order() {
    let (dir, app) = test_app();
    let data_dir = dir.path().join("data");
    seed_order(&data_dir, "acme", "1042", &[("output.zip", b"zip")]);

    let response = send(&app, "DELETE", "/api/order/acme/1042", None).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!data_dir.join("acme/1042").exists());

    let response = send(&app, "DELETE", "/api/order/acme/1042", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "order_not_found");
}
