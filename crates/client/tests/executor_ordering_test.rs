use client::executors::{
    RequestMethod, execute_requests_packages, execute_requests_packages_async,
};
use client::requests::RequestData;
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

fn indexed_request(url: String, index: usize) -> RequestData {
    RequestData {
        url,
        parameters: Vec::new(),
        payload: Some(json!({"index": index})),
        body: None,
        image_scaling_factors: vec![None],
    }
}

/// Mount one mock per request index; the first one answers slowest so that
/// completion order differs from submission order.
fn mount_indexed_mocks(server: &MockServer, count: usize) {
    for index in 0..count {
        server.mock(|when, then| {
            when.method(POST)
                .path("/probe")
                .json_body_partial(format!(r#"{{"index": {index}}}"#));
            let delay = if index == 0 { 300 } else { 10 };
            then.status(200)
                .delay(Duration::from_millis(delay))
                .json_body(json!({"index": index}));
        });
    }
}

fn response_indices(responses: &[client::executors::ApiResponse]) -> Vec<u64> {
    responses
        .iter()
        .map(|response| response.json().unwrap()["index"].as_u64().unwrap())
        .collect()
}

/// Test the blocking executor returns results in submission order
///
/// The slowest request is the first one, so any executor that yields results
/// in completion order would put index 0 last.
#[test]
fn test_blocking_executor_preserves_submission_order() {
    let server = MockServer::start();
    mount_indexed_mocks(&server, 3);

    let requests: Vec<RequestData> = (0..3)
        .map(|index| indexed_request(server.url("/probe"), index))
        .collect();
    let responses = execute_requests_packages(&requests, RequestMethod::Post, 3).unwrap();

    assert_eq!(
        response_indices(&responses),
        vec![0, 1, 2],
        "Results must follow submission order, not completion order"
    );
}

/// Test the cooperative executor returns results in submission order
#[tokio::test]
async fn test_async_executor_preserves_submission_order() {
    let server = MockServer::start_async().await;
    mount_indexed_mocks(&server, 3);

    let http = reqwest::Client::new();
    let requests: Vec<RequestData> = (0..3)
        .map(|index| indexed_request(server.url("/probe"), index))
        .collect();
    let responses = execute_requests_packages_async(&http, &requests, RequestMethod::Post, 3)
        .await
        .unwrap();

    assert_eq!(
        response_indices(&responses),
        vec![0, 1, 2],
        "Results must follow submission order, not completion order"
    );
}

/// Test the first failing request aborts the whole batch
#[test]
fn test_first_failure_aborts_the_batch() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/probe")
            .json_body_partial(r#"{"index": 0}"#);
        then.status(500)
            .header("content-type", "application/json")
            .json_body(json!({"message": "worker crashed"}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/probe");
        then.status(200).json_body(json!({"index": 1}));
    });

    let requests: Vec<RequestData> = (0..2)
        .map(|index| indexed_request(server.url("/probe"), index))
        .collect();
    let error = execute_requests_packages(&requests, RequestMethod::Post, 2).unwrap_err();

    match error {
        client::ClientError::Call {
            status_code,
            api_message,
        } => {
            assert_eq!(status_code, 500);
            assert_eq!(api_message, "worker crashed");
        }
        other => panic!("Expected Call error, got {other:?}"),
    }
}
