//! Transport decorator attaching the session's access token.

use std::sync::Arc;

use taskboard_shared::{GraphQlResponse, TransportError};

use crate::operations::Operation;
use crate::session::Session;
use crate::transport::{OutgoingRequest, Transport};

/// Result of an authorized send, tagged with the access token it carried.
pub struct Authorized {
    pub token: Option<String>,
    pub result: Result<GraphQlResponse, TransportError>,
}

#[derive(Clone)]
pub struct AuthTransport {
    inner: Arc<dyn Transport>,
    session: Session,
    scheme: String,
}

impl AuthTransport {
    pub fn new(inner: Arc<dyn Transport>, session: Session, scheme: impl Into<String>) -> Self {
        Self {
            inner,
            session,
            scheme: scheme.into(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The undecorated transport, for calls that must not carry a token.
    pub fn raw(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    pub async fn send_operation(&self, operation: &Operation) -> Authorized {
        let token = self.session.access_token();
        let request = OutgoingRequest {
            operation: operation.clone(),
            authorization: token.as_ref().map(|t| format!("{} {}", self.scheme, t)),
        };
        let result = self.inner.send(&request).await;
        Authorized { token, result }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::operations;
    use crate::session::Credentials;
    use crate::storage::MemoryStore;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: &OutgoingRequest) -> Result<GraphQlResponse, TransportError> {
            self.seen.lock().unwrap().push(request.authorization.clone());
            Ok(GraphQlResponse::ok(serde_json::json!({})))
        }
    }

    #[tokio::test]
    async fn attaches_token_with_configured_scheme() {
        let recorder = Arc::new(Recorder::default());
        let session = Session::restore(Arc::new(MemoryStore::new()));
        session.login(Credentials {
            access_token: "abc".to_string(),
            refresh_token: "r".to_string(),
        });
        let auth = AuthTransport::new(recorder.clone(), session, "JWT");

        let sent = auth.send_operation(&operations::list_projects()).await;
        assert_eq!(sent.token.as_deref(), Some("abc"));
        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[Some("JWT abc".to_string())]
        );
    }

    #[tokio::test]
    async fn anonymous_without_session() {
        let recorder = Arc::new(Recorder::default());
        let session = Session::restore(Arc::new(MemoryStore::new()));
        let auth = AuthTransport::new(recorder.clone(), session, "Bearer");

        let sent = auth.send_operation(&operations::list_projects()).await;
        assert!(sent.result.is_ok());
        assert_eq!(sent.token, None);
        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[None]);
    }
}
