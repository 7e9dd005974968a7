//! HTTP client abstraction for callback requests.
//!
//! The `CallbackClient` trait keeps the dispatcher independent of reqwest so resolution logic can
//! be tested with a recording mock.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::approval::error::TransportErrorKind;
use crate::approval::types::CallbackMethod;

/// A fully built callback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackRequest {
    pub method: CallbackMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// Response from a callback endpoint, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Executes callback requests.
#[async_trait]
pub trait CallbackClient: Send + Sync {
    /// Send the request and return the response, or why none was received.
    ///
    /// HTTP error statuses are not failures at this level.
    async fn execute(&self, request: &CallbackRequest) -> Result<CallbackResponse, TransportFailure>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

#[derive(Clone)]
pub struct ReqwestCallbackClient {
    client: reqwest::Client,
}

impl ReqwestCallbackClient {
    pub fn new() -> anyhow::Result<Self> {
        // Already installed when running the binary; tests and embedders rely on this call
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create callback HTTP client: {}", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackClient for ReqwestCallbackClient {
    #[tracing::instrument(skip_all, fields(method = %request.method, host = request.url.host_str().unwrap_or_default()))]
    async fn execute(&self, request: &CallbackRequest) -> Result<CallbackResponse, TransportFailure> {
        let method = match request.method {
            CallbackMethod::Get => reqwest::Method::GET,
            CallbackMethod::Post => reqwest::Method::POST,
            CallbackMethod::Put => reqwest::Method::PUT,
            CallbackMethod::Delete => reqwest::Method::DELETE,
        };

        let mut req = self.client.request(method, request.url.clone()).timeout(request.timeout);
        for (name, value) in &request.headers {
            req = req.header(name, value);
        }
        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        let response = req.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;

        tracing::debug!(status = status, response_len = body.len(), "Callback request completed");

        Ok(CallbackResponse { status, body })
    }
}

fn classify(error: reqwest::Error) -> TransportFailure {
    let kind = if error.is_timeout() {
        TransportErrorKind::Timeout
    } else if error.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    // Drop the URL so logs and responses don't echo query strings
    TransportFailure::new(kind, error.without_url().to_string())
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockCallbackClient;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    /// Records every request and answers from a queue of canned results.
    ///
    /// Once the queue is empty every call gets `200` with an empty body.
    #[derive(Clone, Default)]
    pub struct MockCallbackClient {
        responses: Arc<Mutex<VecDeque<Result<CallbackResponse, TransportFailure>>>>,
        calls: Arc<Mutex<Vec<CallbackRequest>>>,
    }

    impl MockCallbackClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_response(&self, status: u16, body: impl Into<String>) {
            self.responses.lock().push_back(Ok(CallbackResponse {
                status,
                body: body.into(),
            }));
        }

        pub fn push_failure(&self, failure: TransportFailure) {
            self.responses.lock().push_back(Err(failure));
        }

        pub fn calls(&self) -> Vec<CallbackRequest> {
            self.calls.lock().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl CallbackClient for MockCallbackClient {
        async fn execute(&self, request: &CallbackRequest) -> Result<CallbackResponse, TransportFailure> {
            self.calls.lock().push(request.clone());
            self.responses.lock().pop_front().unwrap_or(Ok(CallbackResponse {
                status: 200,
                body: String::new(),
            }))
        }
    }
}
