//! Request/response shapes exchanged between a [`Task`](../../dispatcher-taskmanager)
//! and a backend. Grounded on
//! `examples/original_source/dispatcher/taskmanager/backend/request.py`.

use serde_json::Value;

/// A single call to the backend: an arbitrary JSON payload (e.g. a
/// chat-completion body), plus optional caller context carried through
/// untouched for the task to use when the response comes back.
#[derive(Debug, Clone)]
pub struct Request {
    pub content: Value,
    pub context: Option<Value>,
}

impl Request {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            context: None,
        }
    }

    pub fn with_context(content: Value, context: Value) -> Self {
        Self {
            content,
            context: Some(context),
        }
    }
}

/// The backend's answer to a [`Request`]: either a JSON payload, or an
/// error message if the backend call failed.
#[derive(Debug, Clone)]
pub struct Response {
    pub content: Option<Value>,
    pub error: Option<String>,
    pub context: Option<Value>,
}

impl Response {
    pub fn success(content: Value, context: Option<Value>) -> Self {
        Self {
            content: Some(content),
            error: None,
            context,
        }
    }

    pub fn from_error(error: impl Into<String>, context: Option<Value>) -> Self {
        Self {
            content: None,
            error: Some(error.into()),
            context,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.content.is_some()
    }

    /// Extract the generated text from a chat-completion or
    /// text-completion shaped response, the two conventions the reference
    /// backends produce. Returns an empty string if the shape is
    /// unrecognised or the response is an error, matching the original's
    /// lenient `get_text()`.
    pub fn get_text(&self) -> String {
        let Some(content) = &self.content else {
            return String::new();
        };
        content
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| {
                choice
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .or_else(|| choice.get("text"))
            })
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_chat_completion_text() {
        let resp = Response::success(
            json!({"choices": [{"message": {"content": "hello"}}]}),
            None,
        );
        assert_eq!(resp.get_text(), "hello");
        assert!(resp.is_success());
    }

    #[test]
    fn extracts_text_completion_text() {
        let resp = Response::success(json!({"choices": [{"text": "hi"}]}), None);
        assert_eq!(resp.get_text(), "hi");
    }

    #[test]
    fn error_response_is_not_success() {
        let resp = Response::from_error("boom", None);
        assert!(!resp.is_success());
        assert_eq!(resp.get_text(), "");
    }
}
