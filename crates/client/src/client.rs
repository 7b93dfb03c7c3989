//! Sync client: the entry point tying transport, refresh coordination and
//! the normalized cache together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use taskboard_shared::{
    AuthFailure, LoginPayload, SyncError, SyncResult, TokenPayload, TransportError, User,
};

use crate::auth::AuthTransport;
use crate::cache::{Entity, EntityKey, EntityKind, Fields, NormalizedCache, QueryData, QueryKey};
use crate::classify::{classify, Classified};
use crate::config::ClientConfig;
use crate::coordinator::RefreshCoordinator;
use crate::operations::{self, Operation};
use crate::session::{Credentials, Session};
use crate::storage::{CredentialStore, FileStore, StorageError};
use crate::transport::{HttpTransport, OutgoingRequest, Transport};

type SharedFetch = Shared<BoxFuture<'static, SyncResult<QueryData>>>;

/// An optimistic mutation: the request, the entity it speculatively
/// changes, and the list query a newly created entity should join.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub operation: Operation,
    pub target: EntityKey,
    pub patch: Fields,
    pub append_to: Option<QueryKey>,
}

#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    raw: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    cache: NormalizedCache,
    inflight: Mutex<HashMap<QueryKey, (u64, SharedFetch)>>,
    next_fetch: AtomicU64,
}

impl SyncClient {
    pub fn new(transport: Arc<dyn Transport>, session: Session, auth_scheme: &str) -> Self {
        let auth = AuthTransport::new(Arc::clone(&transport), session, auth_scheme);
        Self {
            inner: Arc::new(ClientInner {
                raw: transport,
                coordinator: RefreshCoordinator::new(auth),
                cache: NormalizedCache::new(),
                inflight: Mutex::new(HashMap::new()),
                next_fetch: AtomicU64::new(0),
            }),
        }
    }

    /// HTTP client with credentials persisted under the configured directory.
    pub fn from_config(config: &ClientConfig) -> Result<Self, StorageError> {
        let store: Arc<dyn CredentialStore> = match &config.storage_dir {
            Some(dir) => Arc::new(FileStore::new(dir)),
            None => Arc::new(FileStore::in_config_dir()?),
        };
        let session = Session::restore(store);
        let transport = Arc::new(HttpTransport::from_config(config));
        Ok(Self::new(transport, session, &config.auth_scheme))
    }

    pub fn cache(&self) -> &NormalizedCache {
        &self.inner.cache
    }

    pub fn session(&self) -> &Session {
        self.inner.coordinator.session()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.inner.coordinator
    }

    /// Register the redirect-to-login hook.
    pub fn on_reauth(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.inner.coordinator.on_reauth(hook);
    }

    /// Run an operation with auth recovery, bypassing the cache.
    pub async fn execute(&self, operation: Operation) -> SyncResult<Value> {
        self.inner.coordinator.execute(operation).await
    }

    /// Cached data for a query, if any.
    pub fn cached(&self, operation: &Operation) -> SyncResult<Option<QueryData>> {
        self.inner.cache.read_data(&operation.query_key())
    }

    /// Fetch a query from the network and store it. Concurrent fetches of
    /// the same query key share one request and one result.
    pub async fn fetch(&self, operation: &Operation) -> SyncResult<QueryData> {
        let key = operation.query_key();
        let (id, fut) = {
            let mut inflight = self.inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some((id, fut)) => {
                    crate::log_debug!("joining in-flight {}", key);
                    (*id, fut.clone())
                }
                None => {
                    let id = self.inner.next_fetch.fetch_add(1, Ordering::Relaxed);
                    let client = self.clone();
                    let operation = operation.clone();
                    let fut = async move {
                        let data = client.inner.coordinator.execute(operation.clone()).await?;
                        client.store(&operation, &data)
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key.clone(), (id, fut.clone()));
                    (id, fut)
                }
            }
        };

        let result = fut.await;

        let mut inflight = self.inner.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if inflight.get(&key).is_some_and(|(current, _)| *current == id) {
            inflight.remove(&key);
        }
        result
    }

    /// Normalize a query response into the cache and read it back.
    fn store(&self, operation: &Operation, data: &Value) -> SyncResult<QueryData> {
        let key = operation.query_key();
        let result = operation.extract(data).ok_or_else(|| malformed(operation, "missing result"))?;
        let cache = &self.inner.cache;

        match (operation.entity, result) {
            (Some(kind), Value::Array(items)) => {
                let entities = items
                    .iter()
                    .map(|item| Entity::from_value(kind, item))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| malformed(operation, "list item without id"))?;
                cache.write_query(key.clone(), entities);
            }
            (Some(kind), value @ Value::Object(_)) => {
                let entity = Entity::from_value(kind, value)
                    .ok_or_else(|| malformed(operation, "entity without id"))?;
                cache.write_single(key.clone(), entity);
            }
            (_, value) => cache.write_opaque(key.clone(), value.clone()),
        }

        cache.read_data(&key)?.ok_or_else(|| {
            SyncError::CacheConsistency(format!("{key} vanished right after being written"))
        })
    }

    /// Apply the optimistic patch, send the mutation, then commit or roll
    /// back. The network half runs on its own task, so dropping the returned
    /// future never strands optimistic state.
    pub async fn mutate(&self, plan: MutationPlan) -> SyncResult<Entity> {
        let MutationPlan {
            operation,
            target,
            patch,
            append_to,
        } = plan;
        let cache = &self.inner.cache;
        let token = cache.optimistic_patch(target, patch);
        if let Some(list) = &append_to {
            cache.append_to_query(list, token.key());
        }

        let client = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = client
                .inner
                .coordinator
                .execute(operation.clone())
                .await
                .and_then(|data| entity_from(&operation, &data));
            let cache = &client.inner.cache;
            match outcome {
                Ok(server) => {
                    let key = cache.commit(token, server.clone());
                    Ok(cache.entity(&key).unwrap_or(server))
                }
                Err(e) => {
                    crate::log_debug!("{} failed, rolling back: {}", operation.name, e);
                    cache.rollback(token);
                    Err(e)
                }
            }
        });

        handle.await.unwrap_or_else(|e| {
            crate::log_error!("mutation task aborted: {}", e);
            Err(SyncError::CacheConsistency(format!("mutation task aborted: {e}")))
        })
    }

    /// Log in and persist both tokens. The login request is always sent
    /// without credentials so a stale token cannot interfere.
    pub async fn login(&self, email: &str, password: &str) -> SyncResult<User> {
        let operation = operations::login(email, password);
        let data = self.send_anonymous(&operation).await?;
        let payload: LoginPayload = operation
            .extract(&data)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| malformed(&operation, "login payload"))?;

        self.session().login(Credentials {
            access_token: payload.token,
            refresh_token: payload.refresh_token,
        });
        self.inner.coordinator.reset();

        if let Some(user) = data
            .get("tokenAuth")
            .and_then(|auth| auth.get("user"))
            .and_then(|user| Entity::from_value(EntityKind::User, user))
        {
            self.inner.cache.write_single(operations::me().query_key(), user);
        }
        crate::log_info!("logged in as {}", payload.user.email);
        Ok(payload.user)
    }

    /// Forget credentials and every cached record.
    pub fn logout(&self) {
        self.session().logout();
        self.inner.coordinator.reset();
        self.inner.cache.clear();
        crate::log_info!("logged out");
    }

    /// Ask the server to validate a token and return its claims.
    pub async fn verify_token(&self, token: &str) -> SyncResult<TokenPayload> {
        let operation = operations::verify_token(token);
        let data = self.send_anonymous(&operation).await?;
        operation
            .extract(&data)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| malformed(&operation, "token payload"))
    }

    /// Verify the session's current access token.
    pub async fn verify_session(&self) -> SyncResult<TokenPayload> {
        let token = self
            .session()
            .access_token()
            .ok_or(SyncError::Auth(AuthFailure::Unauthenticated))?;
        self.verify_token(&token).await
    }

    async fn send_anonymous(&self, operation: &Operation) -> SyncResult<Value> {
        let result = self
            .inner
            .raw
            .send(&OutgoingRequest::anonymous(operation.clone()))
            .await;
        match classify(result) {
            Classified::Data(data) => Ok(data),
            Classified::Auth(failure) => Err(SyncError::Auth(failure)),
            Classified::Failed(e) => Err(e),
        }
    }
}

fn malformed(operation: &Operation, what: &str) -> SyncError {
    SyncError::Transport(TransportError::MalformedResponse(format!(
        "{}: {what}",
        operation.name
    )))
}

fn entity_from(operation: &Operation, data: &Value) -> SyncResult<Entity> {
    let kind = operation
        .entity
        .ok_or_else(|| malformed(operation, "operation has no entity kind"))?;
    operation
        .extract(data)
        .and_then(|value| Entity::from_value(kind, value))
        .ok_or_else(|| malformed(operation, "missing entity"))
}
