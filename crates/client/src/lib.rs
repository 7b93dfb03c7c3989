//! Taskboard client - GraphQL data-sync core
//!
//! Sends operations to the taskboard GraphQL API, recovers from expired
//! access tokens with a single shared refresh, and keeps a normalized cache
//! that the operation hooks read from and patch optimistically.

pub mod logging;

pub mod auth;
pub mod cache;
pub mod classify;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod hooks;
pub mod operations;
pub mod session;
pub mod storage;
pub mod transport;

pub use auth::AuthTransport;
pub use cache::{Entity, EntityKey, EntityKind, NormalizedCache, QueryData, QueryKey, RollbackToken};
pub use client::{MutationPlan, SyncClient};
pub use config::{ClientConfig, ConfigError};
pub use coordinator::{RefreshCoordinator, RefreshState};
pub use hooks::{CommentsHook, HookError, MutationHook, ProjectsHook, QueryHook, QueryState, TasksHook};
pub use operations::Operation;
pub use session::{Credentials, Session};
pub use storage::{CredentialStore, FileStore, MemoryStore, StorageError};
pub use transport::{HttpTransport, OutgoingRequest, Transport};

pub use taskboard_shared as shared;
