//! User-editable application settings, shared by device and companion.

use serde::{Deserialize, Serialize};
use url::Url;

/// Where readings are pushed and how the push authenticates.
///
/// Serialized in camelCase (`apiEndpoint`, `authToken`) both on the wire and
/// in the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    /// URL that receives `POST`ed reports.
    pub api_endpoint: String,
    /// Bearer token sent in the `Authorization` header.
    pub auth_token: String,
}

/// A partial update, as sent by `UPDATE_SETTINGS`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl AppSettings {
    pub fn new(api_endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            api_endpoint: api_endpoint.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Parses the endpoint, accepting only http and https URLs.
    pub fn endpoint_url(&self) -> Option<Url> {
        Url::parse(self.api_endpoint.trim())
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
    }

    /// True once an http(s) endpoint has been set.
    pub fn is_configured(&self) -> bool {
        self.endpoint_url().is_some()
    }

    /// True if a non-blank token is present.
    pub fn has_token(&self) -> bool {
        !self.auth_token.trim().is_empty()
    }

    /// Applies a patch, returning true if anything changed.
    pub fn apply(&mut self, patch: SettingsPatch) -> bool {
        let before = self.clone();
        if let Some(endpoint) = patch.api_endpoint {
            self.api_endpoint = endpoint;
        }
        if let Some(token) = patch.auth_token {
            self.auth_token = token;
        }
        *self != before
    }

    /// Copy with the token masked, for logs.
    pub fn redacted(&self) -> Self {
        Self {
            api_endpoint: self.api_endpoint.clone(),
            auth_token: if self.has_token() {
                "***".to_string()
            } else {
                String::new()
            },
        }
    }
}
