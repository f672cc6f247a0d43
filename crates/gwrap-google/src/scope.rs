//! The hosted services this crate can talk to.

use std::fmt;

/// A hosted Google service together with the permission scope it needs.
///
/// Each variant fixes the OAuth scope requested for the service, the
/// API name/version pair the connection targets, and the application name
/// used when the caller does not supply one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceScope {
    /// Gmail v1, send-only access.
    Mail,
    /// Google Drive v3, full file access.
    Drive,
    /// Google Calendar v3, read/write access.
    Calendar,
}

impl ServiceScope {
    /// Returns the OAuth scope requested for this service.
    pub fn scope(&self) -> &'static str {
        match self {
            Self::Mail => "https://www.googleapis.com/auth/gmail.send",
            Self::Drive => "https://www.googleapis.com/auth/drive",
            Self::Calendar => "https://www.googleapis.com/auth/calendar",
        }
    }

    /// Returns the API name.
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Mail => "gmail",
            Self::Drive => "drive",
            Self::Calendar => "calendar",
        }
    }

    /// Returns the API version.
    pub fn version(&self) -> &'static str {
        match self {
            Self::Mail => "v1",
            Self::Drive => "v3",
            Self::Calendar => "v3",
        }
    }

    /// Returns the REST base URL for the service/version pair.
    pub fn base_url(&self) -> &'static str {
        match self {
            Self::Mail => "https://gmail.googleapis.com/gmail/v1",
            Self::Drive => "https://www.googleapis.com/drive/v3",
            Self::Calendar => "https://www.googleapis.com/calendar/v3",
        }
    }

    /// Returns the media upload base URL, for services that accept uploads.
    pub fn upload_base_url(&self) -> Option<&'static str> {
        match self {
            Self::Drive => Some("https://www.googleapis.com/upload/drive/v3"),
            Self::Mail | Self::Calendar => None,
        }
    }

    /// Returns the application name used when the caller gives none.
    pub fn default_application_name(&self) -> &'static str {
        match self {
            Self::Mail => "Mail Sender",
            Self::Drive => "Google Drive Accesser",
            Self::Calendar => "Google Calendar API Wrapper",
        }
    }
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.api_name(), self.version())
    }
}
