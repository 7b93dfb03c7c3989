use chrono::{NaiveDate, NaiveTime};
use serde_json::{json, Value};
use taskboard_shared::{CreateTaskInput, SyncError, Task, TaskPatch, TaskStatus};

use super::{object_fields, patch_fields, HookError, HookResult, MutationHook, QueryHook, QueryState};
use crate::cache::{EntityKey, EntityKind};
use crate::client::{MutationPlan, SyncClient};
use crate::operations;

/// Tasks of one project.
pub struct TasksHook {
    client: SyncClient,
    project_id: String,
    query: QueryHook<Vec<Task>>,
    mutations: MutationHook,
}

impl TasksHook {
    pub fn new(client: &SyncClient, project_id: impl Into<String>) -> Self {
        let project_id = project_id.into();
        Self {
            client: client.clone(),
            query: QueryHook::new(client, operations::list_tasks(&project_id)),
            mutations: MutationHook::new(client),
            project_id,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn state(&self) -> &QueryState<Vec<Task>> {
        self.query.state()
    }

    pub fn tasks(&self) -> Vec<Task> {
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
            .map(|e| HookError::new(e, "Failed to load tasks"))
    }

    pub async fn fetch(&mut self) -> &QueryState<Vec<Task>> {
        self.query.fetch().await
    }

    pub async fn changed(&mut self) -> bool {
        self.query.changed().await
    }

    pub async fn create_task(&self, input: &CreateTaskInput) -> HookResult<Task> {
        let status = input.status.clone().unwrap_or(TaskStatus::Todo);
        let plan = MutationPlan {
            operation: operations::create_task(&self.project_id, input),
            target: EntityKey::placeholder(EntityKind::Task),
            patch: object_fields(json!({
                "title": input.title,
                "description": input.description.as_deref().unwrap_or(""),
                "status": status.as_str(),
                "dueDate": input.due_date.map(stored_due_date),
                "assignee": Value::Null,
            })),
            append_to: Some(self.query.key().clone()),
        };
        self.mutations.run(plan, "Failed to create task").await
    }

    /// The assignee is only known once the server answers, so an assignee
    /// change is sent but not applied optimistically.
    pub async fn update_task(&self, id: &str, patch: &TaskPatch) -> HookResult<Task> {
        const FALLBACK: &str = "Failed to update task";
        let target = self
            .client
            .cache()
            .resolve(&EntityKey::new(EntityKind::Task, id));
        if target.is_placeholder() {
            return Err(HookError::new(
                SyncError::validation("Task is still being created"),
                FALLBACK,
            ));
        }
        let optimistic = TaskPatch {
            assignee_email: None,
            due_date: None,
            ..patch.clone()
        };
        let mut fields = patch_fields(&optimistic);
        if let Some(date) = patch.due_date {
            fields.insert("dueDate".to_string(), stored_due_date(date));
        }
        let plan = MutationPlan {
            operation: operations::update_task(&target.id, patch),
            target,
            patch: fields,
            append_to: None,
        };
        self.mutations.run(plan, FALLBACK).await
    }
}

/// Tasks store a timestamp; a due date set through a mutation lands at
/// midnight UTC.
fn stored_due_date(date: NaiveDate) -> Value {
    json!(date.and_time(NaiveTime::MIN).and_utc())
}
