//! Error types for Google API wrapper operations.
//!
//! Every failure surfaced by this workspace is an [`ApiError`] tagged with an
//! [`ApiErrorCode`]. Nothing is caught or retried internally: errors travel
//! unmodified to the immediate caller.

use std::fmt;
use thiserror::Error;

/// The category of an API error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// Credential missing, invalid, refused or the authorization flow was denied.
    Authorization,
    /// The provider reported a failure during a call (transport or HTTP status).
    RemoteService,
    /// Missing or invalid local configuration, e.g. no client-secret file.
    Configuration,
    /// A connection handle to the service could not be opened.
    ServiceUnavailable,
    /// The provider answered with a payload that could not be decoded.
    InvalidResponse,
    /// Local file I/O failed (upload source, credential store).
    Io,
}

impl ApiErrorCode {
    /// Returns a stable, machine-friendly name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorization => "authorization_error",
            Self::RemoteService => "remote_service_error",
            Self::Configuration => "configuration_error",
            Self::ServiceUnavailable => "service_unavailable",
            Self::InvalidResponse => "invalid_response",
            Self::Io => "io_error",
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error raised while authorizing against or calling a hosted service.
#[derive(Debug, Error)]
pub struct ApiError {
    code: ApiErrorCode,
    message: String,
    /// The service that generated this error (e.g., "gmail", "drive").
    service: Option<String>,
    /// HTTP status reported by the provider, when there was one.
    status: Option<u16>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ApiError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ApiErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            service: None,
            status: None,
            source: None,
        }
    }

    /// Creates an authorization error.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Authorization, message)
    }

    /// Creates a remote service error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::RemoteService, message)
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Configuration, message)
    }

    /// Creates a service unavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::ServiceUnavailable, message)
    }

    /// Creates an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::InvalidResponse, message)
    }

    /// Creates a local I/O error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ApiErrorCode::Io, message)
    }

    /// Sets the service name for this error.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the HTTP status reported by the provider.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ApiErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the service name, if set.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Returns the HTTP status, if the provider answered with one.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns true for credential problems that a new authorization may fix.
    pub fn is_authorization(&self) -> bool {
        self.code == ApiErrorCode::Authorization
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref service) = self.service {
            write!(f, "[{}] ", service)?;
        }
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(status) = self.status {
            write!(f, " (HTTP {})", status)?;
        }
        Ok(())
    }
}

/// A specialized Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
