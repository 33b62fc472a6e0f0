//! Agent-level streaming events.
//!
//! `StreamEvent` is what the agent loop hands to the gateway: text deltas for
//! the user, plus the reserved `trace`, `error` and `end` events.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use toolwright_core::error::ProviderError;
use toolwright_security::{redact_text, redact_value};
use toolwright_telemetry::TraceRecord;

/// Events emitted by the agent during one streamed turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// User-visible text.
    Delta(String),
    /// Diagnostic records of the turn, sent once before `End`.
    Trace(Vec<TraceRecord>),
    /// The turn failed; always followed by `End`.
    Error(ClientError),
    End,
}

impl StreamEvent {
    /// SSE event name; deltas go out as unnamed `data:` frames.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Delta(_) => None,
            Self::Trace(_) => Some("trace"),
            Self::Error(_) => Some("error"),
            Self::End => Some("end"),
        }
    }
}

/// Sanitized error payload of the `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

impl ClientError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: redact_text(&message.into()),
            code: None,
            status: None,
            inner: None,
            req_id: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_req_id(mut self, req_id: impl Into<String>) -> Self {
        self.req_id = Some(req_id.into());
        self
    }

    /// Client view of a model-client failure.
    ///
    /// When the provider answered with an error document
    /// (`{"error": {"code", "message", "innererror"}}`) its code, message and
    /// inner details win over the generic ones.
    pub fn from_provider(err: &ProviderError, req_id: &str) -> Self {
        let body = match err {
            ProviderError::ApiError { message, .. } => serde_json::from_str::<Value>(message).ok(),
            _ => None,
        };
        let detail = body
            .as_ref()
            .map(|b| b.get("error").unwrap_or(b))
            .filter(|d| d.is_object());

        let code = detail
            .and_then(|d| d.get("code"))
            .and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| err.code().to_string());
        let message = detail
            .and_then(|d| d.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        let inner = detail
            .and_then(|d| d.get("innererror").or_else(|| d.get("details")))
            .cloned()
            .map(|mut v| {
                redact_value(&mut v);
                v
            });

        let mut client = Self::new(message)
            .with_code(code)
            .with_status(err.status().unwrap_or(500))
            .with_req_id(req_id);
        client.inner = inner;
        client
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{code}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invalid_request_wire_shape() {
        let err = ClientError::new("Prompt is required")
            .with_code("invalid_request")
            .with_status(400);
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"message":"Prompt is required","code":"invalid_request","status":400}"#
        );
    }

    #[test]
    fn event_names() {
        assert_eq!(StreamEvent::Delta("x".into()).event_name(), None);
        assert_eq!(StreamEvent::Trace(vec![]).event_name(), Some("trace"));
        assert_eq!(StreamEvent::Error(ClientError::new("x")).event_name(), Some("error"));
        assert_eq!(StreamEvent::End.event_name(), Some("end"));
    }

    #[test]
    fn provider_error_document_is_unwrapped() {
        let err = ProviderError::ApiError {
            status_code: 400,
            message: json!({"error": {
                "code": "content_filter",
                "message": "Filtered",
                "innererror": {"code": "ResponsibleAIPolicyViolation", "api_key": "sk-live"}
            }})
            .to_string(),
        };
        let client = ClientError::from_provider(&err, "req-1");
        assert_eq!(client.code.as_deref(), Some("content_filter"));
        assert_eq!(client.message, "Filtered");
        assert_eq!(client.status, Some(400));
        assert_eq!(client.req_id.as_deref(), Some("req-1"));
        let inner = client.inner.unwrap();
        assert_eq!(inner["code"], "ResponsibleAIPolicyViolation");
        assert_eq!(inner["api_key"], "***");
    }

    #[test]
    fn plain_provider_errors_keep_generic_code() {
        let err = ProviderError::Network("connect failed: Bearer abc.def".into());
        let client = ClientError::from_provider(&err, "req-2");
        assert_eq!(client.code.as_deref(), Some("provider_network_error"));
        assert_eq!(client.status, Some(500));
        assert!(!client.message.contains("abc.def"));
        assert!(client.inner.is_none());

        let json = serde_json::to_value(&client).unwrap();
        assert_eq!(json["reqId"], "req-2");
    }
}
