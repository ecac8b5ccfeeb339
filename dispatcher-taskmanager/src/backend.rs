//! The compute backend: an opaque request→response service the task manager
//! submits work to. Modeled as a capability trait rather than the original's
//! single hard-coded vLLM process manager, per the REDESIGN FLAG in
//! `DESIGN.md` — grounded on
//! `examples/original_source/dispatcher/taskmanager/backend/base.py`'s
//! `BackendManager` ABC shape (`process`, `is_healthy`), with the vLLM
//! subprocess lifecycle
//! (`examples/original_source/dispatcher/taskmanager/backend/vllm.py`)
//! dropped as out of scope per spec.md §1.

use std::time::Duration;

use async_trait::async_trait;
use dispatcher_common::backend::{Request, Response};
use dispatcher_common::DispatcherError;
use serde_json::json;

/// Capability set a compute backend must provide. Implementors are shared
/// across worker slots, so `process` takes `&self`.
#[async_trait]
pub trait BackendManager: Send + Sync {
    async fn process(&self, request: Request) -> Response;

    async fn healthcheck(&self) -> bool;
}

/// An in-memory backend for tests and the file-mode demo: answers every
/// request with a deterministic, inspectable transform of its content, with
/// optional simulated latency and failures. Grounded on
/// `examples/original_source/tests/taskmanager/mocks.py`'s
/// `MockBackendManager`.
pub struct MockBackend {
    delay: Duration,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendManager for MockBackend {
    async fn process(&self, request: Request) -> Response {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let prompt = request
            .content
            .get("messages")
            .and_then(|m| m.as_array())
            .and_then(|msgs| msgs.last())
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("");
        let content = json!({
            "choices": [{"message": {"role": "assistant", "content": format!("mock-response-to:{prompt}")}}]
        });
        Response::success(content, request.context)
    }

    async fn healthcheck(&self) -> bool {
        true
    }
}

/// A generic OpenAI-chat-completion-shaped HTTP backend, used for talking to
/// any real inference endpoint that exposes that convention without hard
/// wiring to one vendor. `request.content` is posted verbatim as the JSON
/// body.
pub struct HttpBackend {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            request_timeout,
        }
    }
}

#[async_trait]
impl BackendManager for HttpBackend {
    async fn process(&self, request: Request) -> Response {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.http.post(&url).json(&request.content).send(),
        )
        .await;

        match outcome {
            Err(_) => Response::from_error(
                DispatcherError::BackendRequest("request timed out".to_string()).to_string(),
                request.context,
            ),
            Ok(Err(err)) => Response::from_error(
                DispatcherError::BackendRequest(err.to_string()).to_string(),
                request.context,
            ),
            Ok(Ok(resp)) => match resp.error_for_status() {
                Err(err) => Response::from_error(
                    DispatcherError::BackendRequest(err.to_string()).to_string(),
                    request.context,
                ),
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(body) => Response::success(body, request.context),
                    Err(err) => Response::from_error(
                        DispatcherError::BackendRequest(format!("failed to parse response: {err}"))
                            .to_string(),
                        request.context,
                    ),
                },
            },
        }
    }

    async fn healthcheck(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        self.http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_backend_echoes_last_message() {
        let backend = MockBackend::new();
        let req = Request::new(json!({"messages": [{"role": "user", "content": "hi"}]}));
        let resp = backend.process(req).await;
        assert!(resp.is_success());
        assert_eq!(resp.get_text(), "mock-response-to:hi");
    }

    #[tokio::test]
    async fn mock_backend_is_always_healthy() {
        assert!(MockBackend::new().healthcheck().await);
    }
}
