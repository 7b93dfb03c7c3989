//! Scripted in-memory GraphQL server shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use taskboard_client::operations::Operation;
use taskboard_client::shared::{GraphQlResponse, TransportError};
use taskboard_client::{
    Credentials, MemoryStore, OutgoingRequest, Session, SyncClient, Transport,
};

pub const ACCESS: &str = "access-1";
pub const REFRESH: &str = "refresh-1";
pub const ROTATED: &str = "access-2";

type Handler = Box<dyn Fn(&Operation) -> GraphQlResponse + Send + Sync>;

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub name: &'static str,
    pub variables: Value,
    pub authorization: Option<String>,
}

/// How the server answers the refresh mutation.
#[derive(Debug, Clone)]
pub enum RefreshMode {
    Rotate { access: String, refresh: Option<String> },
    Reject(String),
    /// The refresh request never reaches the server.
    Fail(TransportError),
    /// Answers with data that carries no access token.
    Malformed,
}

pub struct FakeServer {
    state: Mutex<ServerState>,
    handler: Handler,
}

struct ServerState {
    valid_token: String,
    refresh: RefreshMode,
    refresh_delay: Duration,
    delays: HashMap<&'static str, Duration>,
    refresh_calls: usize,
    requests: Vec<Recorded>,
}

impl FakeServer {
    /// Accepts `ACCESS` and rotates to `ROTATED` on refresh.
    pub fn new(handler: impl Fn(&Operation) -> GraphQlResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState {
                valid_token: ACCESS.to_string(),
                refresh: RefreshMode::Rotate {
                    access: ROTATED.to_string(),
                    refresh: Some("refresh-2".to_string()),
                },
                refresh_delay: Duration::ZERO,
                delays: HashMap::new(),
                refresh_calls: 0,
                requests: Vec::new(),
            }),
            handler: Box::new(handler),
        })
    }

    /// Simulate the access token expiring server-side.
    pub fn expire_access_token(&self) {
        self.state.lock().unwrap().valid_token = "nothing-valid".to_string();
    }

    pub fn set_valid_token(&self, token: &str) {
        self.state.lock().unwrap().valid_token = token.to_string();
    }

    pub fn set_refresh(&self, mode: RefreshMode) {
        self.state.lock().unwrap().refresh = mode;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().unwrap().refresh_delay = delay;
    }

    pub fn set_delay(&self, operation: &'static str, delay: Duration) {
        self.state.lock().unwrap().delays.insert(operation, delay);
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().unwrap().refresh_calls
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.name == operation)
            .count()
    }

    fn refresh_response(&self) -> Result<GraphQlResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.refresh_calls += 1;
        match state.refresh.clone() {
            RefreshMode::Rotate { access, refresh } => {
                state.valid_token = access.clone();
                Ok(GraphQlResponse::ok(json!({
                    "refreshToken": {
                        "token": access,
                        "refreshToken": refresh,
                        "refreshExpiresIn": 604800,
                    }
                })))
            }
            RefreshMode::Reject(message) => Ok(GraphQlResponse::error(message)),
            RefreshMode::Fail(error) => Err(error),
            RefreshMode::Malformed => Ok(GraphQlResponse::ok(json!({
                "refreshToken": { "refreshToken": "refresh-2" }
            }))),
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: &OutgoingRequest) -> Result<GraphQlResponse, TransportError> {
        let name = request.operation.name;
        let (delay, refresh_delay) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(Recorded {
                name,
                variables: request.operation.variables.clone(),
                authorization: request.authorization.clone(),
            });
            (state.delays.get(name).copied(), state.refresh_delay)
        };

        if request.operation.is_refresh() {
            if !refresh_delay.is_zero() {
                tokio::time::sleep(refresh_delay).await;
            }
            return self.refresh_response();
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        // Sent without a bearer token.
        if name == "Login" || name == "VerifyToken" {
            return Ok((self.handler)(&request.operation));
        }

        let expected = format!("Bearer {}", self.state.lock().unwrap().valid_token);
        if request.authorization.as_deref() != Some(expected.as_str()) {
            return Ok(GraphQlResponse::error("Signature has expired"));
        }
        Ok((self.handler)(&request.operation))
    }
}

pub fn logged_in_session() -> Session {
    let session = Session::restore(Arc::new(MemoryStore::new()));
    session.login(Credentials {
        access_token: ACCESS.to_string(),
        refresh_token: REFRESH.to_string(),
    });
    session
}

pub fn client(server: &Arc<FakeServer>, session: Session) -> SyncClient {
    let transport: Arc<dyn Transport> = server.clone();
    SyncClient::new(transport, session, "Bearer")
}

pub fn project_json(id: &str, name: &str, status: &str) -> Value {
    json!({
        "__typename": "ProjectType",
        "id": id,
        "name": name,
        "description": "",
        "status": status,
        "dueDate": null,
        "createdAt": "2024-05-01T10:00:00Z",
    })
}

pub fn task_json(id: &str, title: &str, status: &str) -> Value {
    json!({
        "__typename": "TaskType",
        "id": id,
        "title": title,
        "description": "",
        "status": status,
        "dueDate": null,
        "createdAt": "2024-05-01T10:00:00Z",
        "assignee": null,
    })
}
