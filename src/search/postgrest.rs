//! Thin PostgREST client shared by the similarity and metadata stores.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::ConfigError;

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
pub const STATEMENT_TIMEOUT_CODE: &str = "57014";

#[derive(Clone)]
pub struct PostgrestClient {
    client: Client,
    base_url: String,
}

/// Error body PostgREST returns for failed requests.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiError {
    /// Parses an error body, keeping the raw text as the message when it is not JSON.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ApiError {
            message: Some(body.trim().to_string()).filter(|m| !m.is_empty()),
            ..Default::default()
        })
    }

    pub fn is_statement_timeout(&self) -> bool {
        self.code.as_deref() == Some(STATEMENT_TIMEOUT_CODE)
    }

    pub fn describe(&self, status: StatusCode) -> String {
        let mut out = format!("{status}");
        if let Some(code) = &self.code {
            out.push_str(&format!(" [{code}]"));
        }
        if let Some(message) = &self.message {
            out.push_str(&format!(": {message}"));
        }
        if let Some(hint) = &self.hint {
            out.push_str(&format!(" (hint: {hint})"));
        }
        out
    }
}

impl PostgrestClient {
    /// Builds a client that authenticates with a service key.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::MissingCredential(
                crate::config::STORE_API_KEY_ENV,
            ));
        }

        let invalid_key = |_| ConfigError::Invalid("store API key contains invalid characters".into());

        let mut headers = HeaderMap::new();
        headers.insert("apikey", HeaderValue::from_str(api_key).map_err(invalid_key)?);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(invalid_key)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ConfigError::Invalid(format!("failed to build store client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn rpc(&self, function: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/rpc/{function}", self.base_url);
        log::debug!("POST {url}");
        self.client.post(url)
    }

    pub fn table(&self, table: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{table}", self.base_url);
        log::debug!("GET {url}");
        self.client.get(url)
    }
}

/// Formats ids for a PostgREST `in.(...)` filter.
pub fn in_filter(ids: &[i64]) -> String {
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}
