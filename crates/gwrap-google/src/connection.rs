//! Authenticated connection handles.
//!
//! A [`Connection`] is bound to one service/version pair and one credential.
//! Requests go out through a [`Transport`]; the production transport is a
//! blocking reqwest client sending the access token as a bearer token, and
//! tests plug in a scripted one.

use std::time::Duration;

use gwrap_core::{ApiError, ApiResult, Page, PageCollector};
use rand::Rng as _;
use reqwest::Method;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use crate::credential::Credential;
use crate::scope::ServiceScope;
use crate::settings::Settings;

/// Body of an outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Value),
    /// JSON metadata followed by raw media, sent as `multipart/related`.
    Related {
        metadata: Value,
        media: Vec<u8>,
        media_type: String,
    },
}

/// One REST call against a service.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    /// Creates a request without query or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a JSON body.
    #[must_use]
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    /// Sets a metadata + media body.
    #[must_use]
    pub fn with_related(
        mut self,
        metadata: Value,
        media: Vec<u8>,
        media_type: impl Into<String>,
    ) -> Self {
        self.body = RequestBody::Related {
            metadata,
            media,
            media_type: media_type.into(),
        };
        self
    }

    /// Returns the value of a query parameter.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sends requests and decodes their JSON answers.
pub trait Transport: Send + Sync {
    /// Executes a request.
    ///
    /// An empty response body decodes to `Value::Null`.
    fn execute(&self, request: &ApiRequest) -> ApiResult<Value>;
}

/// Transport over a blocking reqwest client.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    access_token: String,
    service: &'static str,
}

impl HttpTransport {
    pub fn new(client: Client, access_token: impl Into<String>, service: &'static str) -> Self {
        Self {
            client,
            access_token: access_token.into(),
            service,
        }
    }

    fn remote_error(&self, message: String) -> ApiError {
        ApiError::remote(message).with_service(self.service)
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: &ApiRequest) -> ApiResult<Value> {
        debug!("{} {}", request.method, request.url);

        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .bearer_auth(&self.access_token)
            .query(&request.query);

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Related {
                metadata,
                media,
                media_type,
            } => {
                let boundary = random_boundary();
                let body = related_body(&boundary, metadata, media, media_type)?;
                builder
                    .header(
                        CONTENT_TYPE,
                        format!("multipart/related; boundary={}", boundary),
                    )
                    .body(body)
            }
        };

        let response = builder.send().map_err(|e| {
            self.remote_error(format!("{} {} failed: {}", request.method, request.url, e))
                .with_source(e)
        })?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            self.remote_error(format!("failed to read response: {}", e))
                .with_source(e)
        })?;

        if !status.is_success() {
            return Err(self
                .remote_error(format!(
                    "{} {} returned {}: {}",
                    request.method,
                    request.url,
                    status,
                    provider_message(&body)
                ))
                .with_status(status.as_u16()));
        }

        trace!("response body: {}", body);
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| {
            ApiError::invalid_response(format!("failed to decode response: {}", e))
                .with_service(self.service)
                .with_source(e)
        })
    }
}

/// Extracts `error.message` from a provider error payload, or returns it raw.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

fn random_boundary() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..24)
        .map(|_| char::from(b'a' + rng.random_range(0..26u8)))
        .collect();
    format!("gwrap_{}", suffix)
}

/// Builds a `multipart/related` body: a JSON metadata part then the media part.
pub(crate) fn related_body(
    boundary: &str,
    metadata: &Value,
    media: &[u8],
    media_type: &str,
) -> ApiResult<Vec<u8>> {
    let metadata = serde_json::to_string(metadata).map_err(|e| {
        ApiError::invalid_response(format!("failed to encode metadata: {}", e)).with_source(e)
    })?;

    let mut body = Vec::with_capacity(media.len() + metadata.len() + 256);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: {t}\r\n\r\n",
            b = boundary,
            m = metadata,
            t = media_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body)
}

/// An authenticated handle to one service/version pair.
pub struct Connection {
    scope: ServiceScope,
    transport: Box<dyn Transport>,
    collector: PageCollector,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("scope", &self.scope)
            .field("collector", &self.collector)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(scope: ServiceScope, transport: Box<dyn Transport>, collector: PageCollector) -> Self {
        Self {
            scope,
            transport,
            collector,
        }
    }

    /// Returns the service this connection talks to.
    pub fn scope(&self) -> ServiceScope {
        self.scope
    }

    /// Returns the REST URL of a resource path.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.scope.base_url(), path.trim_start_matches('/'))
    }

    /// Returns the media upload URL of a resource path.
    pub fn upload_url(&self, path: &str) -> ApiResult<String> {
        let base = self.scope.upload_base_url().ok_or_else(|| {
            ApiError::configuration(format!("{} does not accept media uploads", self.scope))
        })?;
        Ok(format!("{}/{}", base, path.trim_start_matches('/')))
    }

    /// Executes a request and returns the raw JSON answer.
    pub fn execute(&self, request: &ApiRequest) -> ApiResult<Value> {
        self.transport.execute(request)
    }

    /// Executes a request and decodes the answer.
    pub fn call<T: DeserializeOwned>(&self, request: &ApiRequest) -> ApiResult<T> {
        let value = self.execute(request)?;
        decode(self.scope, value)
    }

    /// Collects every item of a paginated listing.
    ///
    /// Each page is a GET on `request` plus `pageToken`; items are read from
    /// the `items_field` array and the continuation from `nextPageToken`.
    pub fn list<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        items_field: &str,
    ) -> ApiResult<Vec<T>> {
        self.collector.collect(|token| {
            let mut page_request = request.clone();
            if let Some(token) = token {
                page_request = page_request.with_query("pageToken", token);
            }

            let mut value = self.execute(&page_request)?;
            let items = match value.get_mut(items_field).map(Value::take) {
                Some(Value::Null) | None => Vec::new(),
                Some(items) => decode(self.scope, items)?,
            };
            let next = value
                .get("nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_owned);

            Ok(Page {
                items,
                next_page_token: next,
            })
        })
    }
}

fn decode<T: DeserializeOwned>(scope: ServiceScope, value: Value) -> ApiResult<T> {
    serde_json::from_value(value).map_err(|e| {
        ApiError::invalid_response(format!("unexpected response shape: {}", e))
            .with_service(scope.api_name())
            .with_source(e)
    })
}

/// Opens connection handles for a credential.
pub trait Connector {
    /// Opens a handle to the service, authenticated with `credential`.
    ///
    /// # Errors
    ///
    /// Fails with a service unavailable error when no handle can be built.
    fn open(
        &self,
        scope: ServiceScope,
        credential: &Credential,
        application_name: &str,
    ) -> ApiResult<Connection>;
}

/// Connector producing [`HttpTransport`] connections.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    timeout: Duration,
    collector: PageCollector,
}

impl HttpConnector {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.timeout(),
            collector: settings.page_collector(),
        }
    }
}

impl Connector for HttpConnector {
    fn open(
        &self,
        scope: ServiceScope,
        credential: &Credential,
        application_name: &str,
    ) -> ApiResult<Connection> {
        if credential.revoked {
            return Err(ApiError::authorization("credential has been revoked")
                .with_service(scope.api_name()));
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(application_name)
            .build()
            .map_err(|e| {
                ApiError::service_unavailable(format!("failed to open {} connection: {}", scope, e))
                    .with_service(scope.api_name())
                    .with_source(e)
            })?;

        debug!("opened {} connection for {}", scope, application_name);
        let transport = HttpTransport::new(client, &credential.access_token, scope.api_name());
        Ok(Connection::new(scope, Box::new(transport), self.collector))
    }
}
