use crate::errors::{ClientError, Result};
use crate::requests::RequestData;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::thread;

/// HTTP verb used for a batch of request packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
}

/// A successfully received (2xx) response body with its content type.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// True when the server answered with raw image bytes (a visualisation)
    /// instead of a JSON prediction.
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|content_type| content_type.starts_with("image/"))
    }
}

/// Execute request packages on worker threads bounded by the concurrency
/// ceiling.
///
/// Results come back in package order regardless of completion order. The
/// first transport or HTTP failure is propagated; nothing is retried.
pub fn execute_requests_packages(
    requests_data: &[RequestData],
    request_method: RequestMethod,
    max_concurrent_requests: usize,
) -> Result<Vec<ApiResponse>> {
    let client = reqwest::blocking::Client::new();
    let limit = max_concurrent_requests.max(1);
    tracing::debug!(
        packages = requests_data.len(),
        limit,
        "Dispatching request packages on worker threads"
    );
    let mut responses = Vec::with_capacity(requests_data.len());
    for wave in requests_data.chunks(limit) {
        let results: Vec<Result<ApiResponse>> = thread::scope(|scope| {
            let client = &client;
            let handles: Vec<_> = wave
                .iter()
                .map(|request_data| {
                    scope.spawn(move || execute_request(client, request_data, request_method))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        for result in results {
            responses.push(result?);
        }
    }
    Ok(responses)
}

/// Execute request packages as cooperatively scheduled tasks bounded by the
/// concurrency ceiling. Same ordering and failure semantics as the blocking
/// executor.
pub async fn execute_requests_packages_async(
    http: &reqwest::Client,
    requests_data: &[RequestData],
    request_method: RequestMethod,
    max_concurrent_requests: usize,
) -> Result<Vec<ApiResponse>> {
    let limit = max_concurrent_requests.max(1);
    tracing::debug!(
        packages = requests_data.len(),
        limit,
        "Dispatching request packages as buffered tasks"
    );
    stream::iter(
        requests_data
            .iter()
            .map(|request_data| execute_request_async(http, request_data, request_method)),
    )
    .buffered(limit)
    .try_collect()
    .await
}

/// Execute one request outside of any package batch (registry and auxiliary
/// endpoints), with the same error translation as the package executors.
pub(crate) fn execute_single(
    request_data: &RequestData,
    request_method: RequestMethod,
) -> Result<ApiResponse> {
    let client = reqwest::blocking::Client::new();
    execute_request(&client, request_data, request_method)
}

pub(crate) async fn execute_single_async(
    http: &reqwest::Client,
    request_data: &RequestData,
    request_method: RequestMethod,
) -> Result<ApiResponse> {
    execute_request_async(http, request_data, request_method).await
}

fn execute_request(
    client: &reqwest::blocking::Client,
    request_data: &RequestData,
    request_method: RequestMethod,
) -> Result<ApiResponse> {
    let mut builder = match request_method {
        RequestMethod::Get => client.get(&request_data.url),
        RequestMethod::Post => client.post(&request_data.url),
    };
    if !request_data.parameters.is_empty() {
        builder = builder.query(&request_data.parameters);
    }
    if let Some(payload) = &request_data.payload {
        builder = builder.json(payload);
    }
    if let Some(body) = &request_data.body {
        builder = builder
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
    }
    let response = builder.send()?;
    let status = response.status().as_u16();
    let content_type = header_value(response.headers().get(CONTENT_TYPE));
    let body = response.bytes()?.to_vec();
    translate_response(status, content_type, body)
}

async fn execute_request_async(
    http: &reqwest::Client,
    request_data: &RequestData,
    request_method: RequestMethod,
) -> Result<ApiResponse> {
    let mut builder = match request_method {
        RequestMethod::Get => http.get(&request_data.url),
        RequestMethod::Post => http.post(&request_data.url),
    };
    if !request_data.parameters.is_empty() {
        builder = builder.query(&request_data.parameters);
    }
    if let Some(payload) = &request_data.payload {
        builder = builder.json(payload);
    }
    if let Some(body) = &request_data.body {
        builder = builder
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone());
    }
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let content_type = header_value(response.headers().get(CONTENT_TYPE));
    let body = response.bytes().await?.to_vec();
    translate_response(status, content_type, body)
}

fn header_value(value: Option<&reqwest::header::HeaderValue>) -> Option<String> {
    value.and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Map a received response to [`ApiResponse`] or a typed call error.
///
/// Non-2xx statuses with a JSON body yield the API `message` field; any other
/// body is surfaced verbatim.
fn translate_response(
    status: u16,
    content_type: Option<String>,
    body: Vec<u8>,
) -> Result<ApiResponse> {
    if (200..300).contains(&status) {
        return Ok(ApiResponse { content_type, body });
    }
    let is_json = content_type
        .as_deref()
        .is_some_and(|ct| ct.contains("application/json"));
    let api_message = if is_json {
        serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(|payload| {
                payload
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned())
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };
    Err(ClientError::Call {
        status_code: status,
        api_message,
    })
}
