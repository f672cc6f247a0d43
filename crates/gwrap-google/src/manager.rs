//! Credential acquisition.
//!
//! [`CredentialManager`] answers one question for the service clients: give
//! me a credential for this scope. It checks, in order, the in-process cache,
//! the on-disk store (refreshing expired tokens), and finally runs the
//! injected [`AuthorizationFlow`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use gwrap_core::{ApiError, ApiResult};
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStore};
use crate::oauth::{AuthorizationFlow, AuthorizationRequest, LoopbackFlow};
use crate::secrets::ClientSecrets;
use crate::settings::Settings;

/// Obtains, caches and persists credentials per permission scope.
pub struct CredentialManager {
    store: CredentialStore,
    store_loaded: bool,
    secrets_path: PathBuf,
    secrets: Option<ClientSecrets>,
    flow: Box<dyn AuthorizationFlow>,
    cache: HashMap<String, Arc<Credential>>,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("store", &self.store.path())
            .field("secrets_path", &self.secrets_path)
            .field("cached_scopes", &self.cache.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CredentialManager {
    /// Creates a manager that authorizes through the browser loopback flow.
    ///
    /// # Errors
    ///
    /// Fails if the flow's HTTP client cannot be built.
    pub fn new(settings: &Settings) -> ApiResult<Self> {
        let flow = LoopbackFlow::from_settings(settings)?;
        Ok(Self::with_flow(settings, Box::new(flow)))
    }

    /// Creates a manager with a caller-supplied authorization flow.
    pub fn with_flow(settings: &Settings, flow: Box<dyn AuthorizationFlow>) -> Self {
        Self {
            store: CredentialStore::new(&settings.credential_store_path),
            store_loaded: false,
            secrets_path: settings.client_secret_path.clone(),
            secrets: None,
            flow,
            cache: HashMap::new(),
        }
    }

    /// Uses these client secrets instead of reading the secrets file.
    #[must_use]
    pub fn with_client_secrets(mut self, secrets: ClientSecrets) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Returns a credential for `scope`.
    ///
    /// Repeated calls within the process return the same shared credential
    /// without running the flow again, for as long as it stays usable.
    ///
    /// # Errors
    ///
    /// - authorization error for an empty scope or a denied flow
    /// - configuration error when the flow must run and no client secrets
    ///   are available
    /// - I/O error when the store cannot be read or written
    pub fn acquire(&mut self, scope: &str, application_name: &str) -> ApiResult<Arc<Credential>> {
        if scope.trim().is_empty() {
            return Err(ApiError::authorization("permission scope must not be empty"));
        }

        if let Some(cached) = self.cache.get(scope)
            && cached.is_usable()
        {
            debug!("using cached credential for {}", scope);
            return Ok(Arc::clone(cached));
        }

        let credential = match self.load_stored(scope)? {
            Some(credential) => credential,
            None => self.authorize(scope, application_name)?,
        };

        let credential = Arc::new(credential);
        self.cache.insert(scope.to_string(), Arc::clone(&credential));
        Ok(credential)
    }

    /// Forgets the credential of `scope` so the next acquire runs the flow.
    ///
    /// The stored copy is marked revoked rather than deleted.
    pub fn invalidate(&mut self, scope: &str) -> ApiResult<()> {
        self.cache.remove(scope);
        self.ensure_store_loaded()?;
        if self.store.revoke(scope)? {
            info!("invalidated stored credential for {}", scope);
        }
        Ok(())
    }

    /// Forgets every credential, cached and stored.
    pub fn clear(&mut self) -> ApiResult<()> {
        self.cache.clear();
        self.store.clear()?;
        self.store_loaded = true;
        Ok(())
    }

    /// Returns the credential store.
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    fn ensure_store_loaded(&mut self) -> ApiResult<()> {
        if !self.store_loaded {
            self.store.load()?;
            self.store_loaded = true;
        }
        Ok(())
    }

    /// Returns a usable stored credential, refreshing it when needed.
    fn load_stored(&mut self, scope: &str) -> ApiResult<Option<Credential>> {
        self.ensure_store_loaded()?;

        let Some(stored) = self.store.get(scope).cloned() else {
            debug!("no stored credential for {}", scope);
            return Ok(None);
        };

        if stored.revoked {
            debug!("stored credential for {} was revoked", scope);
            return Ok(None);
        }
        if !stored.scopes.is_empty() && !stored.has_scope(scope) {
            debug!("stored credential does not grant {}", scope);
            return Ok(None);
        }
        if stored.is_usable() {
            debug!("using stored credential for {}", scope);
            return Ok(Some(stored));
        }
        if !stored.can_refresh() {
            debug!("stored credential for {} expired without a refresh token", scope);
            return Ok(None);
        }

        info!("access token for {} expired, refreshing", scope);
        let secrets = self.client_secrets()?;
        match self.flow.refresh(&secrets, &stored) {
            Ok(refreshed) => {
                self.store.put(scope, refreshed.clone())?;
                Ok(Some(refreshed))
            }
            Err(e) if e.is_authorization() => {
                warn!("refresh refused for {}, authorization required: {}", scope, e);
                self.store.revoke(scope)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn authorize(&mut self, scope: &str, application_name: &str) -> ApiResult<Credential> {
        let secrets = self.client_secrets()?;
        info!("authorizing {} for {}", application_name, scope);

        let request = AuthorizationRequest::new(scope, application_name);
        let mut credential = self.flow.authorize(&secrets, &request)?;
        if credential.scopes.is_empty() {
            credential.scopes.push(scope.to_string());
        }

        self.store.put(scope, credential.clone())?;
        info!("stored credential for {} in {:?}", scope, self.store.path());
        Ok(credential)
    }

    fn client_secrets(&mut self) -> ApiResult<ClientSecrets> {
        if let Some(secrets) = &self.secrets {
            return Ok(secrets.clone());
        }
        let secrets = ClientSecrets::from_file(&self.secrets_path)?;
        self.secrets = Some(secrets.clone());
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeFlow;
    use chrono::{Duration, Utc};
    use gwrap_core::ApiErrorCode;

    const SCOPE: &str = "https://www.googleapis.com/auth/calendar";

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        Settings::default()
            .with_client_secret_path(dir.path().join("client_secret.json"))
            .with_credential_store_path(dir.path().join("credentials.json"))
    }

    fn manager(settings: &Settings, flow: &FakeFlow) -> CredentialManager {
        CredentialManager::with_flow(settings, Box::new(flow.clone()))
            .with_client_secrets(ClientSecrets::new("id", "secret"))
    }

    #[test]
    fn acquire_twice_returns_identical_credential() {
        let dir = tempfile::tempdir().unwrap();
        let flow = FakeFlow::granting("token-1");
        let mut manager = manager(&settings_in(&dir), &flow);

        let first = manager.acquire(SCOPE, "App").unwrap();
        let second = manager.acquire(SCOPE, "App").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(flow.authorize_calls(), 1);
        assert_eq!(flow.requests()[0], AuthorizationRequest::new(SCOPE, "App"));
    }

    #[test]
    fn acquire_persists_and_reuses_stored_credential() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);

        let flow = FakeFlow::granting("persisted");
        manager(&settings, &flow).acquire(SCOPE, "App").unwrap();
        assert!(settings.credential_store_path.exists());

        let second_flow = FakeFlow::granting("unused");
        let credential = manager(&settings, &second_flow).acquire(SCOPE, "App").unwrap();
        assert_eq!(credential.access_token, "persisted");
        assert_eq!(second_flow.authorize_calls(), 0);
    }

    #[test]
    fn scopes_are_stored_independently() {
        let dir = tempfile::tempdir().unwrap();
        let flow = FakeFlow::granting("t");
        let mut manager = manager(&settings_in(&dir), &flow);

        manager.acquire(SCOPE, "App").unwrap();
        manager.acquire("https://www.googleapis.com/auth/drive", "App").unwrap();

        assert_eq!(flow.authorize_calls(), 2);
        assert!(manager.store().get(SCOPE).is_some());
        assert!(manager.store().get("https://www.googleapis.com/auth/drive").is_some());
    }

    #[test]
    fn empty_scope_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let flow = FakeFlow::granting("t");
        let err = manager(&settings_in(&dir), &flow).acquire("  ", "App").unwrap_err();

        assert_eq!(err.code(), ApiErrorCode::Authorization);
        assert_eq!(flow.authorize_calls(), 0);
    }

    #[test]
    fn missing_client_secrets_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let flow = FakeFlow::granting("t");
        let mut manager = CredentialManager::with_flow(&settings_in(&dir), Box::new(flow.clone()));

        let err = manager.acquire(SCOPE, "App").unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Configuration);
        assert_eq!(flow.authorize_calls(), 0);
    }

    #[test]
    fn client_secrets_are_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        std::fs::write(
            &settings.client_secret_path,
            r#"{"installed": {"client_id": "file-id", "client_secret": "file-secret"}}"#,
        )
        .unwrap();

        let flow = FakeFlow::granting("t");
        let mut manager = CredentialManager::with_flow(&settings, Box::new(flow.clone()));
        manager.acquire(SCOPE, "App").unwrap();
        assert_eq!(flow.authorize_calls(), 1);
    }

    #[test]
    fn denied_flow_is_authorization_error_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let flow = FakeFlow::denying();
        let mut manager = manager(&settings_in(&dir), &flow);

        let err = manager.acquire(SCOPE, "App").unwrap_err();
        assert_eq!(err.code(), ApiErrorCode::Authorization);
        assert_eq!(flow.authorize_calls(), 1);
        assert!(manager.store().get(SCOPE).is_none());
    }

    fn store_expired(settings: &Settings, refresh_token: Option<&str>) {
        let mut expired = Credential::new(
            "stale",
            refresh_token.map(str::to_string),
            Some(3600),
            vec![SCOPE.to_string()],
        );
        expired.expires_at = Some(Utc::now() - Duration::minutes(5));
        CredentialStore::new(&settings.credential_store_path)
            .put(SCOPE, expired)
            .unwrap();
    }

    #[test]
    fn expired_credential_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        store_expired(&settings, Some("refresh"));

        let flow = FakeFlow::granting("fresh");
        let credential = manager(&settings, &flow).acquire(SCOPE, "App").unwrap();

        assert_eq!(credential.access_token, "fresh");
        assert_eq!(credential.refresh_token.as_deref(), Some("refresh"));
        assert_eq!(flow.refresh_calls(), 1);
        assert_eq!(flow.authorize_calls(), 0);

        let mut store = CredentialStore::new(&settings.credential_store_path);
        store.load().unwrap();
        assert_eq!(store.get(SCOPE).unwrap().access_token, "fresh");
    }

    #[test]
    fn refused_refresh_falls_back_to_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        store_expired(&settings, Some("refresh"));

        let flow = FakeFlow::granting("new").refusing_refresh();
        let credential = manager(&settings, &flow).acquire(SCOPE, "App").unwrap();

        assert_eq!(credential.access_token, "new");
        assert_eq!(flow.refresh_calls(), 1);
        assert_eq!(flow.authorize_calls(), 1);
    }

    #[test]
    fn expired_credential_without_refresh_token_reauthorizes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        store_expired(&settings, None);

        let flow = FakeFlow::granting("new");
        manager(&settings, &flow).acquire(SCOPE, "App").unwrap();
        assert_eq!(flow.refresh_calls(), 0);
        assert_eq!(flow.authorize_calls(), 1);
    }

    #[test]
    fn stored_credential_for_other_scope_reauthorizes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        CredentialStore::new(&settings.credential_store_path)
            .put(
                SCOPE,
                Credential::new(
                    "narrow",
                    None,
                    Some(3600),
                    vec!["https://www.googleapis.com/auth/calendar.readonly".to_string()],
                ),
            )
            .unwrap();

        let flow = FakeFlow::granting("full");
        let credential = manager(&settings, &flow).acquire(SCOPE, "App").unwrap();
        assert_eq!(credential.access_token, "full");
        assert_eq!(flow.authorize_calls(), 1);
    }

    #[test]
    fn clear_removes_store_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let flow = FakeFlow::granting("t");
        let mut manager = manager(&settings, &flow);

        manager.acquire(SCOPE, "App").unwrap();
        manager.clear().unwrap();
        assert!(!settings.credential_store_path.exists());
        assert!(manager.store().get(SCOPE).is_none());

        manager.acquire(SCOPE, "App").unwrap();
        assert_eq!(flow.authorize_calls(), 2);
    }

    #[test]
    fn invalidate_forces_new_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let flow = FakeFlow::granting("t");
        let mut manager = manager(&settings, &flow);

        let first = manager.acquire(SCOPE, "App").unwrap();
        manager.invalidate(SCOPE).unwrap();
        let second = manager.acquire(SCOPE, "App").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(flow.authorize_calls(), 2);
        assert!(!manager.store().get(SCOPE).unwrap().revoked);
    }
}
