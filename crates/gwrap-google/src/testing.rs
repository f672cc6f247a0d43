//! Fakes standing in for the browser flow and the network in unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use gwrap_core::{ApiError, ApiResult, PageCollector};
use serde_json::Value;

use crate::connection::{ApiRequest, Connection, Connector, Transport};
use crate::credential::Credential;
use crate::oauth::{AuthorizationFlow, AuthorizationRequest};
use crate::scope::ServiceScope;
use crate::secrets::ClientSecrets;

/// Transport answering from a queue of canned responses and recording requests.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<ApiResult<Value>>>>,
    requests: Arc<Mutex<Vec<ApiRequest>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, value: Value) -> Self {
        self.responses.lock().unwrap().push_back(Ok(value));
        self
    }

    pub fn fail(self, error: ApiError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: &ApiRequest) -> ApiResult<Value> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::remote("no scripted response left")))
    }
}

/// Connector handing out connections over a shared [`ScriptedTransport`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    pub transport: ScriptedTransport,
    opened: Arc<Mutex<Vec<(ServiceScope, String, String)>>>,
    unavailable: bool,
}

impl FakeConnector {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Returns (scope, access token, application name) per opened connection.
    pub fn opened(&self) -> Vec<(ServiceScope, String, String)> {
        self.opened.lock().unwrap().clone()
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        scope: ServiceScope,
        credential: &Credential,
        application_name: &str,
    ) -> ApiResult<Connection> {
        if self.unavailable {
            return Err(ApiError::service_unavailable("service discovery failed"));
        }
        self.opened.lock().unwrap().push((
            scope,
            credential.access_token.clone(),
            application_name.to_string(),
        ));
        Ok(Connection::new(
            scope,
            Box::new(self.transport.clone()),
            PageCollector::new(),
        ))
    }
}

#[derive(Default)]
struct FlowState {
    authorize_calls: usize,
    refresh_calls: usize,
    requests: Vec<AuthorizationRequest>,
}

/// Authorization flow that grants or denies without user interaction.
#[derive(Clone)]
pub struct FakeFlow {
    token: Option<String>,
    refuse_refresh: bool,
    state: Arc<Mutex<FlowState>>,
}

impl FakeFlow {
    /// Grants every request with a credential carrying `token`.
    pub fn granting(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            refuse_refresh: false,
            state: Arc::default(),
        }
    }

    /// Denies every request as a user closing the consent page would.
    pub fn denying() -> Self {
        Self {
            token: None,
            refuse_refresh: true,
            state: Arc::default(),
        }
    }

    pub fn refusing_refresh(mut self) -> Self {
        self.refuse_refresh = true;
        self
    }

    pub fn authorize_calls(&self) -> usize {
        self.state.lock().unwrap().authorize_calls
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn requests(&self) -> Vec<AuthorizationRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

impl AuthorizationFlow for FakeFlow {
    fn authorize(
        &self,
        _secrets: &ClientSecrets,
        request: &AuthorizationRequest,
    ) -> ApiResult<Credential> {
        let mut state = self.state.lock().unwrap();
        state.authorize_calls += 1;
        state.requests.push(request.clone());

        match &self.token {
            Some(token) => Ok(Credential::new(
                token.clone(),
                Some("refresh".to_string()),
                Some(3600),
                vec![request.scope.clone()],
            )),
            None => Err(ApiError::authorization("authorization denied: access_denied")),
        }
    }

    fn refresh(&self, _secrets: &ClientSecrets, credential: &Credential) -> ApiResult<Credential> {
        self.state.lock().unwrap().refresh_calls += 1;
        match (&self.token, self.refuse_refresh) {
            (Some(token), false) => Ok(credential.refreshed(token.clone(), None, Some(3600))),
            _ => Err(ApiError::authorization("token refresh refused: invalid_grant")),
        }
    }
}
