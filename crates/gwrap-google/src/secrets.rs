//! Registered-application client secrets.
//!
//! Google requires every installed application to present its own OAuth
//! client ID and secret before an authorization flow can run. They come from
//! the JSON file downloaded from the Cloud Console.

use std::fmt;
use std::path::Path;

use gwrap_core::{ApiError, ApiResult};
use serde::Deserialize;

/// OAuth 2.0 client identifier and secret of the registered application.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientSecrets {
    /// The OAuth 2.0 client ID.
    pub client_id: String,
    /// The OAuth 2.0 client secret.
    pub client_secret: String,
}

// Keeps the secret out of logs.
impl fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Layout of the Cloud Console `client_secret.json` file.
///
/// Desktop clients carry an `installed` section, web clients a `web` one;
/// some tools (gcloud) write the two fields flat at the root.
#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<SecretsSection>,
    web: Option<SecretsSection>,
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretsSection {
    client_id: String,
    client_secret: String,
}

impl ClientSecrets {
    /// Creates client secrets from their two parts.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Loads client secrets from a Cloud Console JSON file.
    ///
    /// # Errors
    ///
    /// A missing or unreadable file is a configuration error: no
    /// authorization flow can run without it.
    pub fn from_file(path: impl AsRef<Path>) -> ApiResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ApiError::configuration(format!(
                "client secret file {} is not readable: {}",
                path.display(),
                e
            ))
            .with_source(e)
        })?;
        Self::from_json(&content)
    }

    /// Parses client secrets from the JSON content of a secrets file.
    pub fn from_json(json: &str) -> ApiResult<Self> {
        let file: ClientSecretsFile = serde_json::from_str(json).map_err(|e| {
            ApiError::configuration(format!("failed to parse client secret JSON: {}", e))
        })?;

        if let Some(section) = file.installed.or(file.web) {
            return Self::new(section.client_id, section.client_secret).validated();
        }

        match (file.client_id, file.client_secret) {
            (Some(id), Some(secret)) => Self::new(id, secret).validated(),
            _ => Err(ApiError::configuration(
                "client secret file must contain an 'installed' or 'web' section, \
                 or 'client_id'/'client_secret' at root level",
            )),
        }
    }

    /// Checks that both parts are present.
    pub fn validate(&self) -> ApiResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(ApiError::configuration("client_id is required"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ApiError::configuration("client_secret is required"));
        }
        Ok(())
    }

    fn validated(self) -> ApiResult<Self> {
        self.validate()?;
        Ok(self)
    }
}
