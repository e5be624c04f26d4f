//! In-memory transport for tests and examples
//!
//! Answers from a route table instead of the network, records every request
//! and can add latency so that concurrent callers overlap.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{HttpRequest, HttpResponse, Method, Transport, REGISTRY_MEDIA_TYPE};
use crate::error::Result;

/// A request as seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    /// URL path, without scheme and host
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug)]
struct Route {
    method: Method,
    path: String,
    response: HttpResponse,
}

#[derive(Debug)]
struct MockState {
    routes: Vec<Route>,
    default_response: HttpResponse,
    requests: Vec<RecordedRequest>,
}

/// A no-network [`Transport`]
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Option<Duration>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A mock answering every unrouted request with an empty 200
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                routes: Vec::new(),
                default_response: HttpResponse {
                    status: 200,
                    content_type: Some(REGISTRY_MEDIA_TYPE.to_string()),
                    body: Vec::new(),
                },
                requests: Vec::new(),
            }),
            latency: None,
        }
    }

    /// Delay every response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Response for requests no route matches
    pub fn with_default(self, status: u16, body: serde_json::Value) -> Self {
        self.lock().default_response = HttpResponse::json(status, &body);
        self
    }

    /// Answer `method path` with a JSON body. Later routes shadow earlier ones.
    pub fn on(&self, method: Method, path: &str, status: u16, body: serde_json::Value) {
        self.on_response(method, path, HttpResponse::json(status, &body));
    }

    /// Answer `method path` with a raw response
    pub fn on_response(&self, method: Method, path: &str, response: HttpResponse) {
        self.lock().routes.push(Route {
            method,
            path: path.to_string(),
            response,
        });
    }

    /// Every request sent so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.lock().requests.last().cloned()
    }

    /// Total number of requests sent
    pub fn call_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Number of requests sent to `method path`
    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn url_path(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match without_scheme.find('/') {
        Some(idx) => without_scheme[idx..].to_string(),
        None => "/".to_string(),
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let path = url_path(&request.url);
        let response = {
            let mut state = self.lock();
            state.requests.push(RecordedRequest {
                method: request.method,
                url: request.url.clone(),
                path: path.clone(),
                headers: request.headers.clone(),
                body: request.json(),
            });
            state
                .routes
                .iter()
                .rev()
                .find(|r| r.method == request.method && r.path == path)
                .map(|r| r.response.clone())
                .unwrap_or_else(|| state.default_response.clone())
        };

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(response)
    }
}
