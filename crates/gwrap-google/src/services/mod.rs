//! Service clients.
//!
//! Every client wraps a [`ServiceClient`]: one scope, one application name
//! and exactly one connection handle.

mod calendar;
mod drive;
mod mail;

pub use calendar::{CalendarClient, CalendarEntry, EventQuery, EventTime, SimplifiedEvent};
pub use drive::{DriveClient, DriveFile};
pub use mail::MailClient;

use gwrap_core::ApiResult;
use tracing::info;

use crate::connection::{Connection, Connector};
use crate::manager::CredentialManager;
use crate::scope::ServiceScope;

/// An authenticated client for one hosted service.
#[derive(Debug)]
pub struct ServiceClient {
    scope: ServiceScope,
    application_name: String,
    connection: Connection,
}

impl ServiceClient {
    /// Acquires a credential for the service scope and opens a connection.
    ///
    /// When `application_name` is None the service's default name is used.
    ///
    /// # Errors
    ///
    /// Propagates authorization and configuration errors from the manager,
    /// and service unavailable errors from the connector.
    pub fn connect(
        scope: ServiceScope,
        application_name: Option<&str>,
        manager: &mut CredentialManager,
        connector: &dyn Connector,
    ) -> ApiResult<Self> {
        let application_name = application_name
            .unwrap_or(scope.default_application_name())
            .to_string();

        let credential = manager.acquire(scope.scope(), &application_name)?;
        let connection = connector.open(scope, &credential, &application_name)?;

        Ok(Self {
            scope,
            application_name,
            connection,
        })
    }

    /// Discards the current credential and connection and authorizes again.
    ///
    /// On failure the previous connection is kept.
    pub fn reauthorize(
        &mut self,
        manager: &mut CredentialManager,
        connector: &dyn Connector,
    ) -> ApiResult<()> {
        info!("re-authorizing {}", self.scope);
        manager.invalidate(self.scope.scope())?;
        let credential = manager.acquire(self.scope.scope(), &self.application_name)?;
        self.connection = connector.open(self.scope, &credential, &self.application_name)?;
        Ok(())
    }

    pub fn scope(&self) -> ServiceScope {
        self.scope
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}
