//! OAuth credentials and their on-disk store.
//!
//! One store file holds the credentials of every scope, keyed by the scope
//! string, so the mail, drive and calendar clients can share it without
//! overwriting each other's tokens.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use gwrap_core::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Seconds shaved off the provider's lifetime so tokens are refreshed early.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token material granting access to one permission scope.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The access token sent as a bearer token.
    pub access_token: String,

    /// The refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// When the access token expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes the provider granted.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Set once the provider refused a refresh; the credential is then unusable.
    #[serde(default)]
    pub revoked: bool,

    /// When the tokens were last obtained or refreshed.
    pub last_refresh: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("revoked", &self.revoked)
            .field("last_refresh", &self.last_refresh)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Creates a credential from token endpoint data.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.map(expiry_from_now),
            scopes,
            revoked: false,
            last_refresh: Utc::now(),
        }
    }

    /// Returns true if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now() >= expires_at,
            None => false,
        }
    }

    /// Returns true if an expired access token can be renewed without the user.
    pub fn can_refresh(&self) -> bool {
        !self.revoked && self.refresh_token.is_some()
    }

    /// Returns true if the access token can be used right now.
    pub fn is_usable(&self) -> bool {
        !self.revoked && !self.is_expired()
    }

    /// Returns true if the provider granted the given scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Returns a copy carrying a refreshed access token.
    ///
    /// The provider may rotate the refresh token; the old one is kept otherwise.
    #[must_use]
    pub fn refreshed(
        &self,
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at: expires_in_secs.map(expiry_from_now),
            scopes: self.scopes.clone(),
            revoked: false,
            last_refresh: Utc::now(),
        }
    }
}

fn expiry_from_now(secs: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(secs) - Duration::seconds(EXPIRY_MARGIN_SECS)
}

/// Serialized layout of the store file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    credentials: BTreeMap<String, Credential>,
}

/// File-backed credential store.
///
/// Nothing is read until [`CredentialStore::load`] is called. Writes replace
/// the file atomically (temp file then rename) with owner-only permissions.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, Credential>,
}

impl CredentialStore {
    /// Creates a store backed by the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Loads the store from disk.
    ///
    /// Returns Ok(false) when there is no file. An undecodable file is
    /// ignored (and overwritten on the next save) rather than failing.
    pub fn load(&mut self) -> ApiResult<bool> {
        if !self.path.exists() {
            debug!("no credential store at {:?}", self.path);
            self.entries.clear();
            return Ok(false);
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            ApiError::io(format!("failed to read credential store: {}", e)).with_source(e)
        })?;

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(file) => {
                info!(
                    "loaded {} credential(s) from {:?}",
                    file.credentials.len(),
                    self.path
                );
                self.entries = file.credentials;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "credential store {:?} could not be decoded, ignoring it: {}",
                    self.path, e
                );
                self.entries.clear();
                Ok(false)
            }
        }
    }

    /// Writes the store to disk.
    pub fn save(&self) -> ApiResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                ApiError::io(format!("failed to create credential directory: {}", e))
                    .with_source(e)
            })?;
        }

        let file = StoreFile {
            credentials: self.entries.clone(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|e| {
            ApiError::io(format!("failed to serialize credentials: {}", e)).with_source(e)
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &content).map_err(|e| {
            ApiError::io(format!("failed to write credential store: {}", e)).with_source(e)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600));
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            ApiError::io(format!("failed to replace credential store: {}", e)).with_source(e)
        })?;

        debug!("saved credentials to {:?}", self.path);
        Ok(())
    }

    /// Removes every credential, in memory and on disk.
    pub fn clear(&mut self) -> ApiResult<()> {
        self.entries.clear();
        if self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| {
                ApiError::io(format!("failed to remove credential store: {}", e)).with_source(e)
            })?;
            info!("cleared credentials from {:?}", self.path);
        }
        Ok(())
    }

    /// Returns the stored credential for a scope.
    pub fn get(&self, scope: &str) -> Option<&Credential> {
        self.entries.get(scope)
    }

    /// Stores a credential for a scope and writes the store to disk.
    pub fn put(&mut self, scope: &str, credential: Credential) -> ApiResult<()> {
        self.entries.insert(scope.to_string(), credential);
        self.save()
    }

    /// Marks the credential of a scope as revoked and writes the store.
    ///
    /// Returns false when nothing was stored for the scope.
    pub fn revoke(&mut self, scope: &str) -> ApiResult<bool> {
        match self.entries.get_mut(scope) {
            Some(credential) => {
                credential.revoked = true;
                self.save()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the store path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
