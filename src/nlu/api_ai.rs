//! API.ai (Dialogflow v1) client using the `/query` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{check_http_response, NluClient, NluError, NluResponse};
use crate::request::Parameters;

/// Default API base URL.
pub const DEFAULT_API_AI_URL: &str = "https://api.api.ai/v1";

/// Protocol version pinned by the `v` query parameter.
pub const API_VERSION: &str = "20150910";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Query request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Text to interpret.
    pub query: String,
    /// Conversation session.
    pub session_id: String,
    /// Agent language.
    pub lang: String,
}

/// Query response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    /// Interpretation.
    pub result: Option<Value>,
    /// Status envelope.
    pub status: QueryStatus,
}

/// Status envelope of a query response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStatus {
    /// HTTP-like status code.
    pub code: u16,
    /// `success` or an error category.
    #[serde(default)]
    pub error_type: String,
}

/// The fields of `result` this crate reads.
#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    parameters: Option<Parameters>,
    #[serde(default)]
    metadata: Option<QueryMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryMetadata {
    #[serde(default)]
    intent_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// API.ai query client.
#[derive(Clone)]
pub struct ApiAiClient {
    /// Base URL, without trailing slash.
    #[doc(hidden)]
    pub base_url: String,
    /// Agent language.
    #[doc(hidden)]
    pub language: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ApiAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiAiClient")
            .field("base_url", &self.base_url)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl ApiAiClient {
    /// Create a client for `base_url` authenticated with a client access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: String,
        language: String,
        timeout: Duration,
    ) -> Result<Self, NluError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            language,
            token,
            client,
        })
    }
}

#[async_trait]
impl NluClient for ApiAiClient {
    async fn query(&self, session_id: &str, text: &str) -> Result<NluResponse, NluError> {
        let url = format!("{}/query", self.base_url);
        let body = build_request(session_id, text, &self.language);
        let response = self
            .client
            .post(&url)
            .query(&[("v", API_VERSION)])
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        let raw = check_http_response(response).await?;
        let parsed = parse_response(&raw)?;
        debug!(
            session_id,
            intent = parsed.intent.as_deref().unwrap_or(""),
            action = parsed.action.as_deref().unwrap_or(""),
            "nlu query interpreted"
        );
        Ok(parsed)
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a query request body.
#[doc(hidden)]
pub fn build_request(session_id: &str, text: &str, language: &str) -> QueryRequest {
    QueryRequest {
        query: text.to_owned(),
        session_id: session_id.to_owned(),
        lang: language.to_owned(),
    }
}

/// Parse a query response body into an [`NluResponse`].
///
/// Empty intent or action names are treated as absent.
///
/// # Errors
///
/// Returns [`NluError::Parse`] for malformed bodies and [`NluError::Query`]
/// when the status envelope reports a failure.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<NluResponse, NluError> {
    let response: QueryResponse =
        serde_json::from_str(body).map_err(|e| NluError::Parse(e.to_string()))?;

    if response.status.code != 200 {
        return Err(NluError::Query {
            code: response.status.code,
            error_type: response.status.error_type,
        });
    }

    let raw = response
        .result
        .ok_or_else(|| NluError::Parse("response has no result".to_owned()))?;
    let result: QueryResult =
        QueryResult::deserialize(&raw).map_err(|e| NluError::Parse(e.to_string()))?;

    Ok(NluResponse {
        intent: result
            .metadata
            .and_then(|m| m.intent_name)
            .filter(|s| !s.is_empty()),
        action: result.action.filter(|s| !s.is_empty()),
        parameters: result.parameters.unwrap_or_default(),
        raw,
    })
}
