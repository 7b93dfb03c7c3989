use chrono::Utc;
use serde_json::{json, Value};
use taskboard_shared::{SyncError, TaskComment};

use super::{object_fields, HookError, HookResult, MutationHook, QueryHook, QueryState};
use crate::cache::{EntityKey, EntityKind};
use crate::client::{MutationPlan, SyncClient};
use crate::operations;

pub struct CommentsHook {
    client: SyncClient,
    task_id: String,
    query: QueryHook<Vec<TaskComment>>,
    mutations: MutationHook,
}

impl CommentsHook {
    pub fn new(client: &SyncClient, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self {
            client: client.clone(),
            query: QueryHook::new(client, operations::list_task_comments(&task_id)),
            mutations: MutationHook::new(client),
            task_id,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn state(&self) -> &QueryState<Vec<TaskComment>> {
        self.query.state()
    }

    pub fn comments(&self) -> Vec<TaskComment> {
        self.query.data().cloned().unwrap_or_default()
    }

    pub fn loading(&self) -> bool {
        self.query.state().loading
    }

    pub fn error(&self) -> Option<HookError> {
        self.query
            .state()
            .error
            .clone()
            .map(|e| HookError::new(e, "Failed to load comments"))
    }

    pub async fn fetch(&mut self) -> &QueryState<Vec<TaskComment>> {
        self.query.fetch().await
    }

    pub async fn changed(&mut self) -> bool {
        self.query.changed().await
    }

    pub async fn add_comment(&self, content: &str) -> HookResult<TaskComment> {
        let plan = MutationPlan {
            operation: operations::add_task_comment(&self.task_id, content),
            target: EntityKey::placeholder(EntityKind::Comment),
            patch: object_fields(json!({
                "content": content,
                "createdAt": Utc::now(),
                "author": Value::Null,
            })),
            append_to: Some(self.query.key().clone()),
        };
        self.mutations.run(plan, "Failed to add comment").await
    }

    pub async fn update_comment(&self, id: &str, content: &str) -> HookResult<TaskComment> {
        const FALLBACK: &str = "Failed to update comment";
        let target = self
            .client
            .cache()
            .resolve(&EntityKey::new(EntityKind::Comment, id));
        if target.is_placeholder() {
            return Err(HookError::new(
                SyncError::validation("Comment is still being posted"),
                FALLBACK,
            ));
        }
        let plan = MutationPlan {
            operation: operations::update_task_comment(&target.id, content),
            target,
            patch: object_fields(json!({ "content": content })),
            append_to: None,
        };
        self.mutations.run(plan, FALLBACK).await
    }
}
