//! Natural-language understanding boundary.
//!
//! Defines the [`NluClient`] trait and the interpretation it returns. The
//! only implementation is [`api_ai::ApiAiClient`], which talks to the
//! API.ai (Dialogflow v1) `query` endpoint.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::request::Parameters;

pub mod api_ai;

/// A structured interpretation of freeform text.
#[derive(Debug, Clone, PartialEq)]
pub struct NluResponse {
    /// Matched intent name.
    pub intent: Option<String>,
    /// Action configured on the intent.
    pub action: Option<String>,
    /// Extracted entities, blank values included.
    pub parameters: Parameters,
    /// The full interpretation as returned by the service.
    pub raw: Value,
}

/// Errors returned by NLU clients.
#[derive(Debug, thiserror::Error)]
pub enum NluError {
    /// HTTP transport failure.
    #[error("nlu request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("nlu response parse error: {0}")]
    Parse(String),
    /// The service responded with an error status.
    #[error("nlu returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitised response body.
        body: String,
    },
    /// The service reported an error inside a 200 response.
    #[error("nlu query failed with code {code}: {error_type}")]
    Query {
        /// Status code from the response envelope.
        code: u16,
        /// Error type from the response envelope.
        error_type: String,
    },
}

/// Interprets freeform text for a user session.
#[async_trait]
pub trait NluClient: Send + Sync {
    /// Interpret `text` within `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`NluError`] on transport, status or parse failure.
    async fn query(&self, session_id: &str, text: &str) -> Result<NluResponse, NluError>;
}

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `NluError::Request` on transport failure, `NluError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, NluError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(NluError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    if let Ok(regex) = Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]{8,}") {
        sanitized = regex.replace_all(&sanitized, "Bearer [REDACTED]").into_owned();
    }
    if let Ok(regex) = Regex::new(r"\b[a-f0-9]{32}\b") {
        sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}
