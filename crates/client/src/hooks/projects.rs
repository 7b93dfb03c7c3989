use serde_json::{json, Value};
use taskboard_shared::{Project, ProjectPatch, ProjectStats, ProjectStatus, SyncError};

use super::{malformed, object_fields, patch_fields, HookError, HookResult, MutationHook, QueryHook, QueryState};
use crate::cache::{EntityKey, EntityKind};
use crate::client::{MutationPlan, SyncClient};
use crate::operations;

/// Project list with create and update.
pub struct ProjectsHook {
    client: SyncClient,
    query: QueryHook<Vec<Project>>,
    mutations: MutationHook,
}

impl ProjectsHook {
    pub fn new(client: &SyncClient) -> Self {
        Self {
            client: client.clone(),
            query: QueryHook::new(client, operations::list_projects()),
            mutations: MutationHook::new(client),
        }
    }

    pub fn state(&self) -> &QueryState<Vec<Project>> {
        self.query.state()
    }

    /// Projects with a missing description normalised to empty.
    pub fn projects(&self) -> Vec<Project> {
        self.query
            .data()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|mut p| {
                p.description.get_or_insert_with(String::new);
                p
            })
            .collect()
    }

    pub fn loading(&self) -> bool {
        self.query.state().loading
    }

    pub fn error(&self) -> Option<HookError> {
        self.query
            .state()
            .error
            .clone()
            .map(|e| HookError::new(e, "Failed to load projects"))
    }

    pub async fn fetch(&mut self) -> &QueryState<Vec<Project>> {
        self.query.fetch().await
    }

    pub async fn changed(&mut self) -> bool {
        self.query.changed().await
    }

    /// The project appears in the list at once under a placeholder id and
    /// takes the server id when the mutation settles.
    pub async fn create_project(&self, name: &str, description: Option<&str>) -> HookResult<Project> {
        let plan = MutationPlan {
            operation: operations::create_project(name, description),
            target: EntityKey::placeholder(EntityKind::Project),
            patch: object_fields(json!({
                "name": name,
                "description": description.unwrap_or(""),
                "status": ProjectStatus::Active.as_str(),
                "dueDate": Value::Null,
            })),
            append_to: Some(operations::list_projects().query_key()),
        };
        self.mutations.run(plan, "Failed to create project").await
    }

    pub async fn update_project(&self, id: &str, patch: &ProjectPatch) -> HookResult<Project> {
        const FALLBACK: &str = "Failed to update project";
        let target = self
            .client
            .cache()
            .resolve(&EntityKey::new(EntityKind::Project, id));
        if target.is_placeholder() {
            return Err(HookError::new(
                SyncError::validation("Project is still being created"),
                FALLBACK,
            ));
        }
        let plan = MutationPlan {
            operation: operations::update_project(&target.id, patch),
            target,
            patch: patch_fields(patch),
            append_to: None,
        };
        self.mutations.run(plan, FALLBACK).await
    }

    pub async fn stats(&self, project_id: &str) -> HookResult<ProjectStats> {
        const FALLBACK: &str = "Failed to load project stats";
        let data = self
            .client
            .fetch(&operations::project_stats(project_id))
            .await
            .map_err(|e| HookError::new(e, FALLBACK))?;
        data.decode().map_err(|e| malformed(e, FALLBACK))
    }
}
