use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use taskboard_shared::{SyncError, TransportError};
use tokio::sync::watch;

use crate::cache::{QueryData, QueryKey};
use crate::client::SyncClient;
use crate::operations::Operation;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<SyncError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Reactive binding of one query to local state.
///
/// Dropping the hook unsubscribes it; mutations it started still settle in
/// the cache.
pub struct QueryHook<T> {
    client: SyncClient,
    operation: Operation,
    key: QueryKey,
    changes: watch::Receiver<u64>,
    state: QueryState<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueryHook<T> {
    /// Subscribe to `operation` and seed state from the cache.
    pub fn new(client: &SyncClient, operation: Operation) -> Self {
        let key = operation.query_key();
        let changes = client.cache().subscribe(&key);
        let mut hook = Self {
            client: client.clone(),
            operation,
            key,
            changes,
            state: QueryState::default(),
            _marker: PhantomData,
        };
        hook.sync_from_cache();
        hook
    }

    pub fn state(&self) -> &QueryState<T> {
        &self.state
    }

    pub fn data(&self) -> Option<&T> {
        self.state.data.as_ref()
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Cache-and-network: show cached data at once, then re-read the cache
    /// once the network result is stored. Edits that land between the store
    /// and this hook resuming are kept.
    pub async fn fetch(&mut self) -> &QueryState<T> {
        self.sync_from_cache();
        self.state.loading = true;

        let result = self.client.fetch(&self.operation).await;
        self.changes.mark_unchanged();
        self.state.loading = false;
        match result {
            Ok(_) => {
                self.state.error = None;
                self.sync_from_cache();
            }
            Err(e) => {
                crate::log_debug!("{} failed: {}", self.key, e);
                self.state.error = Some(e);
            }
        }
        &self.state
    }

    /// Wait until any entity this query lists changes, then re-read it.
    /// Returns `false` once the cache has gone away.
    pub async fn changed(&mut self) -> bool {
        if self.changes.changed().await.is_err() {
            return false;
        }
        self.changes.mark_unchanged();
        self.sync_from_cache();
        true
    }

    /// Re-read the cached record without touching the network.
    pub fn sync_from_cache(&mut self) {
        match self.client.cache().read_data(&self.key) {
            Ok(Some(data)) => match decode(&data) {
                Ok(value) => self.state.data = Some(value),
                Err(e) => self.state.error = Some(e),
            },
            Ok(None) => self.state.data = None,
            Err(e) => self.state.error = Some(e),
        }
    }
}

fn decode<T: DeserializeOwned>(data: &QueryData) -> Result<T, SyncError> {
    data.decode()
        .map_err(|e| SyncError::Transport(TransportError::MalformedResponse(e.to_string())))
}
