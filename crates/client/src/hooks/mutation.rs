use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use taskboard_shared::SyncResult;

use super::{decode_entity, HookError, HookResult};

use crate::cache::{Entity, EntityKey};
use crate::client::{MutationPlan, SyncClient};

type EditKey = (EntityKey, BTreeSet<String>);

/// Runs optimistic mutations. Two calls through the same hook that patch
/// the same fields of the same entity run one after the other; the later
/// one wins.
pub struct MutationHook {
    client: SyncClient,
    edits: Mutex<HashMap<EditKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl MutationHook {
    pub fn new(client: &SyncClient) -> Self {
        Self {
            client: client.clone(),
            edits: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute(&self, plan: MutationPlan) -> SyncResult<Entity> {
        let edit: EditKey = (plan.target.clone(), plan.patch.keys().cloned().collect());
        let lock = {
            let mut edits = self.edits.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(edits.entry(edit.clone()).or_default())
        };

        let guard = lock.lock().await;
        let result = self.client.mutate(plan).await;
        drop(guard);

        // Forget idle edit slots so the map does not grow with every entity.
        let mut edits = self.edits.lock().unwrap_or_else(|e| e.into_inner());
        if edits
            .get(&edit)
            .is_some_and(|slot| Arc::strong_count(slot) == 2 && slot.try_lock().is_ok())
        {
            edits.remove(&edit);
        }
        result
    }

    /// Execute and decode the settled entity, mapping failures to a
    /// user-facing message.
    pub async fn run<T: DeserializeOwned>(&self, plan: MutationPlan, fallback: &str) -> HookResult<T> {
        let op = plan.operation.name;
        let entity = self.execute(plan).await.map_err(|e| {
            let err = HookError::new(e, fallback);
            crate::log_warn!("{} failed: {}", op, err.message);
            err
        })?;
        decode_entity(&entity, fallback)
    }

    /// Number of distinct edits currently tracked.
    pub fn pending_edits(&self) -> usize {
        self.edits.lock().map(|edits| edits.len()).unwrap_or(0)
    }
}
