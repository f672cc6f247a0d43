//! OAuth 2.0 authorization flows.
//!
//! [`AuthorizationFlow`] is the seam between [`CredentialManager`] and the
//! user-facing part of authorization. [`LoopbackFlow`] is the production
//! implementation: the Authorization Code flow with PKCE and a loopback
//! redirect, as Google recommends for installed applications.
//!
//! 1. Generate a code verifier and its SHA-256 challenge
//! 2. Bind a local HTTP listener on a port from the configured range
//! 3. Open the browser (or print the URL) on Google's consent page
//! 4. Google redirects to the listener with the authorization code
//! 5. Exchange the code (with the verifier) for access and refresh tokens
//!
//! [`CredentialManager`]: crate::CredentialManager

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gwrap_core::{ApiError, ApiResult};
use rand::Rng as _;
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::credential::Credential;
use crate::secrets::ClientSecrets;
use crate::settings::Settings;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Code verifier length in bytes, before base64 encoding.
const CODE_VERIFIER_LENGTH: usize = 32;

/// How long the loopback listener waits for the browser redirect.
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// What an authorization flow is asked to obtain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// The permission scope to request.
    pub scope: String,
    /// Human-readable application name, sent as the user agent.
    pub application_name: String,
}

impl AuthorizationRequest {
    /// Creates a request for one scope.
    pub fn new(scope: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            application_name: application_name.into(),
        }
    }
}

/// Obtains and renews credentials on behalf of the credential manager.
///
/// Production code uses [`LoopbackFlow`]; tests substitute a fake so no
/// browser or network is involved.
pub trait AuthorizationFlow {
    /// Runs the interactive authorization for a scope.
    ///
    /// # Errors
    ///
    /// Fails with an authorization error when the user denies or cancels.
    fn authorize(
        &self,
        secrets: &ClientSecrets,
        request: &AuthorizationRequest,
    ) -> ApiResult<Credential>;

    /// Exchanges the refresh token of an expired credential for a new one.
    ///
    /// # Errors
    ///
    /// Fails with an authorization error when the provider refuses the
    /// refresh token.
    fn refresh(&self, secrets: &ClientSecrets, credential: &Credential) -> ApiResult<Credential>;
}

/// Authorization Code + PKCE flow with a loopback redirect.
#[derive(Debug)]
pub struct LoopbackFlow {
    http_client: Client,
    port_range: (u16, u16),
    open_browser: bool,
    callback_timeout: Duration,
}

impl LoopbackFlow {
    /// Creates a flow from the workspace settings.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_settings(settings: &Settings) -> ApiResult<Self> {
        let http_client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| {
                ApiError::service_unavailable(format!("failed to create HTTP client: {}", e))
                    .with_source(e)
            })?;

        Ok(Self {
            http_client,
            port_range: settings.loopback_port_range,
            open_browser: settings.open_browser,
            callback_timeout: CALLBACK_TIMEOUT,
        })
    }

    /// Overrides how long to wait for the browser redirect.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Posts a form to the token endpoint and decodes the answer.
    fn token_request(
        &self,
        params: &[(&str, &str)],
        user_agent: Option<&str>,
        what: &str,
    ) -> ApiResult<TokenResponse> {
        let mut request = self.http_client.post(GOOGLE_TOKEN_URL).form(params);
        if let Some(agent) = user_agent {
            request = request.header(USER_AGENT, agent);
        }

        let response = request.send().map_err(|e| {
            ApiError::remote(format!("{} request failed: {}", what, e)).with_source(e)
        })?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            ApiError::remote(format!("failed to read token response: {}", e)).with_source(e)
        })?;

        if !status.is_success() {
            // 400/401 from the token endpoint means the grant itself was refused.
            let err = if status.is_client_error() {
                ApiError::authorization(format!("{} refused: {}", what, body))
            } else {
                ApiError::remote(format!("{} failed: {}", what, body))
            };
            return Err(err.with_status(status.as_u16()));
        }

        serde_json::from_str(&body).map_err(|e| {
            ApiError::invalid_response(format!("invalid token response: {}", e)).with_source(e)
        })
    }

    /// Tries to bind a TCP listener on an available port in the range.
    fn bind_loopback_server(&self) -> ApiResult<(TcpListener, u16)> {
        let (first, last) = self.port_range;
        for port in first..=last {
            if let Ok(listener) = TcpListener::bind(("127.0.0.1", port)) {
                debug!("bound loopback server on port {}", port);
                return Ok((listener, port));
            }
        }
        Err(ApiError::configuration(format!(
            "no available loopback port in range {}-{}",
            first, last
        )))
    }

    /// Waits for the redirect and extracts the authorization code and state.
    fn wait_for_callback(&self, listener: TcpListener) -> ApiResult<(String, String)> {
        let (tx, rx) = mpsc::channel();

        // The listener blocks on accept; the handler thread lets us time out.
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        if let Some(result) = handle_callback(stream) {
                            let _ = tx.send(result);
                            return;
                        }
                    }
                    Err(e) => error!("failed to accept connection: {}", e),
                }
            }
        });

        match rx.recv_timeout(self.callback_timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ApiError::authorization(
                "timed out waiting for the authorization redirect",
            )),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ApiError::authorization(
                "authorization listener stopped before a redirect arrived",
            )),
        }
    }

    fn present_consent_url(&self, auth_url: &str) {
        if self.open_browser {
            info!("opening browser for authorization");
            match open::that(auth_url) {
                Ok(()) => return,
                Err(e) => warn!("failed to open browser: {}", e),
            }
        }
        eprintln!("\nOpen this URL in your browser to authorize access:\n\n{}\n", auth_url);
    }
}

impl AuthorizationFlow for LoopbackFlow {
    fn authorize(
        &self,
        secrets: &ClientSecrets,
        request: &AuthorizationRequest,
    ) -> ApiResult<Credential> {
        let pkce = PkceFlow::new();
        let (listener, port) = self.bind_loopback_server()?;
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);

        let auth_url = pkce.build_auth_url(&secrets.client_id, &redirect_uri, &request.scope);
        debug!("authorization URL: {}", auth_url);
        self.present_consent_url(&auth_url);

        let (code, received_state) = self.wait_for_callback(listener)?;
        if received_state != pkce.state {
            return Err(ApiError::authorization(
                "authorization state mismatch, redirect rejected",
            ));
        }

        info!("received authorization code, exchanging for tokens");
        let params = [
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("code", code.as_str()),
            ("code_verifier", pkce.verifier.as_str()),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
        ];
        let response =
            self.token_request(&params, Some(&request.application_name), "token exchange")?;

        let scopes = response.granted_scopes(&request.scope);
        Ok(Credential::new(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            scopes,
        ))
    }

    fn refresh(&self, secrets: &ClientSecrets, credential: &Credential) -> ApiResult<Credential> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| ApiError::authorization("credential has no refresh token"))?;

        let params = [
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let response = self.token_request(&params, None, "token refresh")?;

        info!("refreshed access token");
        Ok(credential.refreshed(
            response.access_token,
            response.refresh_token,
            response.expires_in,
        ))
    }
}

/// Handles one request on the loopback listener.
///
/// Returns None for requests that are not the OAuth redirect (favicon, probes).
fn handle_callback(mut stream: TcpStream) -> Option<ApiResult<(String, String)>> {
    let mut request_line = String::new();
    BufReader::new(&stream).read_line(&mut request_line).ok()?;

    // GET /callback?code=...&state=... HTTP/1.1
    let mut parts = request_line.split_whitespace();
    if parts.next() != Some("GET") {
        return None;
    }
    let target = parts.next()?;
    let query = parse_callback_target(target)?;

    let body = if query.error.is_some() || query.code.is_none() {
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Authorization failed</h1>\
        <p>You can close this window.</p></body></html>"
    } else {
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Authorization complete</h1>\
        <p>You can close this window.</p></body></html>"
    };
    let _ = stream.write_all(body.as_bytes());
    let _ = stream.flush();

    Some(query.into_result())
}

/// Query parameters of the OAuth redirect.
#[derive(Debug, Default, PartialEq, Eq)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackQuery {
    fn into_result(self) -> ApiResult<(String, String)> {
        if let Some(error) = self.error {
            return Err(ApiError::authorization(format!(
                "authorization denied: {}",
                error
            )));
        }
        match self.code {
            Some(code) => Ok((code, self.state.unwrap_or_default())),
            None => Err(ApiError::authorization(
                "missing authorization code in redirect",
            )),
        }
    }
}

/// Parses the request target of the redirect; None if it is another path.
fn parse_callback_target(target: &str) -> Option<CallbackQuery> {
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != "/callback" {
        return None;
    }

    let mut parsed = CallbackQuery::default();
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_default();
        match key {
            "code" => parsed.code = Some(value),
            "state" => parsed.state = Some(value),
            "error" => parsed.error = Some(value),
            _ => {}
        }
    }
    Some(parsed)
}

/// PKCE verifier, challenge and CSRF state (RFC 7636).
#[derive(Debug)]
pub struct PkceFlow {
    /// The code verifier (high-entropy random string).
    pub verifier: String,
    /// SHA-256 of the verifier, base64url encoded.
    pub challenge: String,
    /// Random state echoed back by the redirect.
    pub state: String,
}

impl PkceFlow {
    /// Creates a flow with a random verifier and state.
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        let challenge = Self::compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: random_token(16),
        }
    }

    fn compute_challenge(verifier: &str) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
    }

    /// Builds the Google consent page URL for one scope.
    ///
    /// Offline access is requested so a refresh token comes back.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, scope: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&\
            code_challenge={}&code_challenge_method=S256&state={}&\
            access_type=offline&prompt=consent",
            GOOGLE_AUTH_URL,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(&self.challenge),
            urlencoding::encode(&self.state),
        )
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

fn random_token(len: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    /// Scopes the provider reports as granted, or the requested one.
    fn granted_scopes(&self, requested: &str) -> Vec<String> {
        match self.scope.as_deref() {
            Some(granted) if !granted.trim().is_empty() => {
                granted.split_whitespace().map(str::to_owned).collect()
            }
            _ => vec![requested.to_string()],
        }
    }
}
