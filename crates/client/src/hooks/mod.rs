//! Operation hooks: the unit UI code works with.
//!
//! A [`QueryHook`] binds one query to `{data, loading, error}` state and
//! follows cache changes to any entity it lists. A [`MutationHook`] applies
//! optimistic patches, serialising edits to the same fields of the same
//! entity. The domain hooks bundle both per screen.

mod comments;
mod mutation;
mod projects;
mod query;
mod tasks;

use serde_json::Value;
use taskboard_shared::{SyncError, TransportError};
use thiserror::Error;

use crate::cache::{Entity, Fields};

pub use comments::CommentsHook;
pub use mutation::MutationHook;
pub use projects::ProjectsHook;
pub use query::{QueryHook, QueryState};
pub use tasks::TasksHook;

/// A failed hook call: the typed cause plus the message to show the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HookError {
    pub message: String,
    #[source]
    pub source: SyncError,
}

impl HookError {
    pub fn new(source: SyncError, fallback: &str) -> Self {
        Self {
            message: source.user_message(fallback),
            source,
        }
    }

    pub fn requires_login(&self) -> bool {
        self.source.requires_login()
    }
}

pub type HookResult<T> = Result<T, HookError>;

fn malformed(e: serde_json::Error, fallback: &str) -> HookError {
    HookError::new(
        SyncError::Transport(TransportError::MalformedResponse(e.to_string())),
        fallback,
    )
}

/// Decode a settled mutation result into its model type.
pub(crate) fn decode_entity<T: serde::de::DeserializeOwned>(
    entity: &Entity,
    fallback: &str,
) -> HookResult<T> {
    entity.decode().map_err(|e| malformed(e, fallback))
}

/// Cache fields from a `json!` object literal.
pub(crate) fn object_fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

/// Serialise a patch struct into cache fields.
pub(crate) fn patch_fields<T: serde::Serialize>(patch: &T) -> Fields {
    match serde_json::to_value(patch) {
        Ok(Value::Object(map)) => map,
        _ => Fields::new(),
    }
}
