//! Token refresh coordination.
//!
//! Operations that fail authentication are parked behind a single refresh
//! request. When the refresh succeeds every parked operation is resubmitted
//! once with the new token, dispatched in the order it was parked. When it
//! fails the session is cleared, every parked operation fails with
//! [`SyncError::SessionExpired`], and the re-authentication hook fires once.
//!
//! ```text
//!            auth failure, refresh token present
//!   ┌──────┐ ───────────────────────────────────▶ ┌────────────┐
//!   │ Idle │                                      │ Refreshing │ ◀── further auth failures queue here
//!   └──────┘ ◀─────────────────────────────────── └────────────┘
//!      │              refresh succeeded                 │
//!      │ auth failure, no credentials                   │ refresh failed
//!      ▼                                                ▼
//!   ┌────────────────────────────────────────────────────────┐
//!   │                    FailedTerminal                      │
//!   └────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures_util::future::join_all;
use serde_json::Value;
use taskboard_shared::{AuthFailure, RefreshPayload, SyncError, SyncResult};
use tokio::sync::oneshot;

use crate::auth::AuthTransport;
use crate::classify::{classify, Classified};
use crate::operations::{self, Operation};
use crate::session::Session;
use crate::transport::OutgoingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    FailedTerminal,
}

struct Parked {
    operation: Operation,
    reply: oneshot::Sender<SyncResult<Value>>,
}

enum State {
    Idle,
    Refreshing { queue: Vec<Parked> },
    FailedTerminal,
}

type ReauthHook = Arc<dyn Fn() + Send + Sync>;

/// What to do with an operation that just failed authentication.
enum Recovery {
    Wait(oneshot::Receiver<SyncResult<Value>>),
    Replay,
    Terminal { notify: bool },
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    auth: AuthTransport,
    state: Mutex<State>,
    on_reauth: RwLock<Option<ReauthHook>>,
}

impl RefreshCoordinator {
    pub fn new(auth: AuthTransport) -> Self {
        Self {
            inner: Arc::new(Inner {
                auth,
                state: Mutex::new(State::Idle),
                on_reauth: RwLock::new(None),
            }),
        }
    }

    /// Register the redirect-to-login hook.
    pub fn on_reauth(&self, hook: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.on_reauth.write() {
            *slot = Some(Arc::new(hook));
        }
    }

    pub fn state(&self) -> RefreshState {
        match &*self.inner.lock_state() {
            State::Idle => RefreshState::Idle,
            State::Refreshing { .. } => RefreshState::Refreshing,
            State::FailedTerminal => RefreshState::FailedTerminal,
        }
    }

    pub fn session(&self) -> &Session {
        self.inner.auth.session()
    }

    /// Leave `FailedTerminal` after a fresh login.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        if matches!(*state, State::FailedTerminal) {
            *state = State::Idle;
        }
    }

    /// Send `operation` with the current token, recovering from an expired
    /// or invalid token by refreshing it. Returns the response `data`.
    pub async fn execute(&self, operation: Operation) -> SyncResult<Value> {
        let sent = self.inner.auth.send_operation(&operation).await;
        let failure = match classify(sent.result) {
            Classified::Data(data) => return Ok(data),
            Classified::Failed(e) => return Err(e),
            Classified::Auth(failure) => failure,
        };

        // The refresh call never triggers a refresh of its own.
        if operation.is_refresh() {
            return Err(SyncError::Auth(failure));
        }

        match self.inner.plan_recovery(&operation, sent.token.as_deref()) {
            Recovery::Wait(rx) => rx.await.unwrap_or_else(|_| {
                Err(SyncError::SessionExpired(AuthFailure::RefreshRejected(
                    "refresh aborted".to_string(),
                )))
            }),
            Recovery::Replay => self.inner.replay(&operation).await,
            Recovery::Terminal { notify } => {
                if notify {
                    crate::log_warn!("{} failed authentication with no session", operation.name);
                    self.inner.trigger_reauth();
                }
                Err(SyncError::SessionExpired(failure))
            }
        }
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn plan_recovery(self: &Arc<Self>, operation: &Operation, token_used: Option<&str>) -> Recovery {
        let mut state = self.lock_state();

        if let State::Refreshing { queue } = &mut *state {
            let (reply, rx) = oneshot::channel();
            queue.push(Parked {
                operation: operation.clone(),
                reply,
            });
            return Recovery::Wait(rx);
        }

        let Some(credentials) = self.auth.session().credentials() else {
            let notify = !matches!(*state, State::FailedTerminal);
            *state = State::FailedTerminal;
            drop(state);
            self.auth.session().clear();
            return Recovery::Terminal { notify };
        };

        // Sent with a token that has since been rotated.
        if token_used != Some(credentials.access_token.as_str()) {
            return Recovery::Replay;
        }

        let (reply, rx) = oneshot::channel();
        *state = State::Refreshing {
            queue: vec![Parked {
                operation: operation.clone(),
                reply,
            }],
        };
        drop(state);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.run_refresh(credentials.refresh_token).await;
        });
        Recovery::Wait(rx)
    }

    async fn run_refresh(self: Arc<Self>, refresh_token: String) {
        crate::log_info!("access token rejected; refreshing");
        let operation = operations::refresh_token(&refresh_token);
        let result = self
            .auth
            .raw()
            .send(&OutgoingRequest::anonymous(operation.clone()))
            .await;

        let outcome = match classify(result) {
            Classified::Data(data) => operation
                .extract(&data)
                .cloned()
                .and_then(|v| serde_json::from_value::<RefreshPayload>(v).ok())
                .ok_or_else(|| AuthFailure::RefreshRejected("malformed refresh payload".to_string())),
            Classified::Auth(failure) => Err(AuthFailure::RefreshRejected(failure.to_string())),
            Classified::Failed(e) => Err(AuthFailure::RefreshRejected(e.to_string())),
        };

        match outcome {
            Ok(payload) => {
                self.auth.session().rotate(payload.token, payload.refresh_token);
                let queue = self.finish(State::Idle);
                crate::log_info!(
                    "access token refreshed; replaying {} queued operation(s)",
                    queue.len()
                );
                let replays = queue.into_iter().map(|parked| {
                    let inner = Arc::clone(&self);
                    async move {
                        let result = inner.replay(&parked.operation).await;
                        let _ = parked.reply.send(result);
                    }
                });
                join_all(replays).await;
            }
            Err(failure) => {
                crate::log_warn!("token refresh failed: {}", failure);
                self.auth.session().clear();
                let queue = self.finish(State::FailedTerminal);
                for parked in queue {
                    let _ = parked
                        .reply
                        .send(Err(SyncError::SessionExpired(failure.clone())));
                }
                self.trigger_reauth();
            }
        }
    }

    /// Leave `Refreshing`, handing back everything parked behind it.
    fn finish(&self, next: State) -> Vec<Parked> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, next) {
            State::Refreshing { queue } => queue,
            _ => Vec::new(),
        }
    }

    /// Resubmit once with the current token. A second auth failure is final.
    async fn replay(&self, operation: &Operation) -> SyncResult<Value> {
        crate::log_debug!("replaying {}", operation.name);
        let sent = self.auth.send_operation(operation).await;
        match classify(sent.result) {
            Classified::Data(data) => Ok(data),
            Classified::Failed(e) => Err(e),
            Classified::Auth(failure) => Err(SyncError::Auth(failure)),
        }
    }

    fn trigger_reauth(&self) {
        let hook = self.on_reauth.read().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook();
        }
    }
}
