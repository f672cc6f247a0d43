//! Convenience clients for Gmail, Google Drive and Google Calendar.
//!
//! Each client asks a [`CredentialManager`] for a credential in its scope,
//! opens a [`Connection`] through a [`Connector`], and exposes a few
//! one-shot or paginated operations.
//!
//! ```no_run
//! use gwrap_google::{CalendarClient, CredentialManager, EventQuery, HttpConnector, Settings};
//!
//! # fn main() -> gwrap_core::ApiResult<()> {
//! let settings = Settings::load()?;
//! let mut manager = CredentialManager::new(&settings)?;
//! let connector = HttpConnector::from_settings(&settings);
//!
//! let calendar = CalendarClient::connect(None, &mut manager, &connector)?;
//! for event in calendar.list_events(&EventQuery::new())? {
//!     println!("{}", event.summary);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod credential;
pub mod manager;
pub mod oauth;
pub mod scope;
pub mod secrets;
pub mod services;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ApiRequest, Connection, Connector, HttpConnector, HttpTransport, RequestBody, Transport};
pub use credential::{Credential, CredentialStore};
pub use manager::CredentialManager;
pub use oauth::{AuthorizationFlow, AuthorizationRequest, LoopbackFlow, PkceFlow};
pub use scope::ServiceScope;
pub use secrets::ClientSecrets;
pub use services::{
    CalendarClient, CalendarEntry, DriveClient, DriveFile, EventQuery, EventTime, MailClient,
    ServiceClient, SimplifiedEvent,
};
pub use settings::Settings;
