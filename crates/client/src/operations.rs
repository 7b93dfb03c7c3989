//! Named GraphQL operations consumed from the taskboard API.

use serde_json::{json, Map, Value};
use taskboard_shared::{CreateTaskInput, GraphQlRequest, ProjectPatch, ProjectStatus, TaskPatch};

use crate::cache::{EntityKind, QueryKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

/// A named operation with bound variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: &'static str,
    pub kind: OperationKind,
    pub document: &'static str,
    pub variables: Value,
    /// Top-level field of `data` holding the result.
    pub root: &'static str,
    /// Field inside the root object holding the entity (mutation payloads).
    pub payload: Option<&'static str>,
    /// Kind of the entity (or entities) the result denotes.
    pub entity: Option<EntityKind>,
}

impl Operation {
    pub fn to_request(&self) -> GraphQlRequest {
        GraphQlRequest {
            operation_name: self.name.to_string(),
            query: self.document.to_string(),
            variables: self.variables.clone(),
        }
    }

    pub fn query_key(&self) -> QueryKey {
        QueryKey::new(self.name, &self.variables)
    }

    pub fn is_refresh(&self) -> bool {
        self.name == REFRESH_TOKEN_NAME
    }

    /// Locate this operation's result inside a response `data` object.
    pub fn extract<'a>(&self, data: &'a Value) -> Option<&'a Value> {
        let root = data.get(self.root)?;
        match self.payload {
            Some(field) => root.get(field),
            None => Some(root),
        }
    }
}

macro_rules! user_fields {
    () => {
        "id email organization { id name }"
    };
}

macro_rules! project_fields {
    () => {
        "id name description status dueDate createdAt"
    };
}

macro_rules! task_fields {
    () => {
        "id title description status dueDate createdAt assignee { id email isActive }"
    };
}

macro_rules! comment_fields {
    () => {
        "id content createdAt author { id email }"
    };
}

pub const REFRESH_TOKEN_NAME: &str = "RefreshToken";

const LOGIN: &str = concat!(
    "mutation Login($email: String!, $password: String!) { tokenAuth(email: $email, password: $password) { token refreshToken user { ",
    user_fields!(),
    " } } }"
);
const REFRESH_TOKEN: &str = "mutation RefreshToken($refreshToken: String!) { refreshToken(refreshToken: $refreshToken) { token refreshToken refreshExpiresIn } }";
const VERIFY_TOKEN: &str =
    "mutation VerifyToken($token: String!) { verifyToken(token: $token) { payload } }";
const ME: &str = concat!("query Me { me { ", user_fields!(), " } }");

const GET_PROJECTS: &str = concat!("query GetProjects { projects { ", project_fields!(), " } }");
const GET_PROJECT: &str = concat!(
    "query GetProject($id: ID!) { project(id: $id) { ",
    project_fields!(),
    " } }"
);
const GET_PROJECT_STATS: &str = "query GetProjectStats($projectId: ID!) { projectStats(projectId: $projectId) { totalTasks completedTasks completionRate } }";
const CREATE_PROJECT: &str = concat!(
    "mutation CreateProject($name: String!, $description: String, $status: String) { createProject(name: $name, description: $description, status: $status) { project { ",
    project_fields!(),
    " } } }"
);
const UPDATE_PROJECT: &str = concat!(
    "mutation UpdateProject($id: ID!, $name: String, $description: String, $status: String, $dueDate: Date) { updateProject(id: $id, name: $name, description: $description, status: $status, dueDate: $dueDate) { project { ",
    project_fields!(),
    " } } }"
);

const GET_TASKS: &str = concat!(
    "query GetTasks($projectId: ID!) { tasks(projectId: $projectId) { ",
    task_fields!(),
    " } }"
);
const GET_TASK: &str = concat!("query GetTask($id: ID!) { task(id: $id) { ", task_fields!(), " } }");
const CREATE_TASK: &str = concat!(
    "mutation CreateTask($projectId: ID!, $title: String!, $description: String, $status: String, $assigneeEmail: String, $dueDate: Date) { createTask(projectId: $projectId, title: $title, description: $description, status: $status, assigneeEmail: $assigneeEmail, dueDate: $dueDate) { task { ",
    task_fields!(),
    " } } }"
);
const UPDATE_TASK: &str = concat!(
    "mutation UpdateTask($id: ID!, $title: String, $description: String, $status: String, $assigneeEmail: String, $dueDate: Date) { updateTask(id: $id, title: $title, description: $description, status: $status, assigneeEmail: $assigneeEmail, dueDate: $dueDate) { task { ",
    task_fields!(),
    " } } }"
);

const GET_TASK_COMMENTS: &str = concat!(
    "query GetTaskComments($taskId: ID!) { taskComments(taskId: $taskId) { ",
    comment_fields!(),
    " } }"
);
const ADD_TASK_COMMENT: &str = concat!(
    "mutation AddTaskComment($taskId: ID!, $content: String!) { addTaskComment(taskId: $taskId, content: $content) { comment { ",
    comment_fields!(),
    " } } }"
);
const UPDATE_TASK_COMMENT: &str = concat!(
    "mutation UpdateTaskComment($id: ID!, $content: String!) { updateTaskComment(id: $id, content: $content) { comment { ",
    comment_fields!(),
    " } } }"
);

fn query(
    name: &'static str,
    document: &'static str,
    variables: Value,
    root: &'static str,
    entity: Option<EntityKind>,
) -> Operation {
    Operation {
        name,
        kind: OperationKind::Query,
        document,
        variables,
        root,
        payload: None,
        entity,
    }
}

fn mutation(
    name: &'static str,
    document: &'static str,
    variables: Value,
    root: &'static str,
    payload: Option<&'static str>,
    entity: Option<EntityKind>,
) -> Operation {
    Operation {
        name,
        kind: OperationKind::Mutation,
        document,
        variables,
        root,
        payload,
        entity,
    }
}

/// Merge `id` into a serialised patch object.
fn with_id(id: &str, patch: Value) -> Value {
    let mut vars = match patch {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    vars.insert("id".to_string(), Value::String(id.to_string()));
    Value::Object(vars)
}

// --- Accounts ---

pub fn login(email: &str, password: &str) -> Operation {
    mutation(
        "Login",
        LOGIN,
        json!({ "email": email, "password": password }),
        "tokenAuth",
        None,
        None,
    )
}

pub fn refresh_token(refresh_token: &str) -> Operation {
    mutation(
        REFRESH_TOKEN_NAME,
        REFRESH_TOKEN,
        json!({ "refreshToken": refresh_token }),
        "refreshToken",
        None,
        None,
    )
}

pub fn verify_token(token: &str) -> Operation {
    mutation(
        "VerifyToken",
        VERIFY_TOKEN,
        json!({ "token": token }),
        "verifyToken",
        Some("payload"),
        None,
    )
}

pub fn me() -> Operation {
    query("Me", ME, json!({}), "me", Some(EntityKind::User))
}

// --- Projects ---

pub fn list_projects() -> Operation {
    query(
        "GetProjects",
        GET_PROJECTS,
        json!({}),
        "projects",
        Some(EntityKind::Project),
    )
}

pub fn project(id: &str) -> Operation {
    query(
        "GetProject",
        GET_PROJECT,
        json!({ "id": id }),
        "project",
        Some(EntityKind::Project),
    )
}

pub fn project_stats(project_id: &str) -> Operation {
    query(
        "GetProjectStats",
        GET_PROJECT_STATS,
        json!({ "projectId": project_id }),
        "projectStats",
        None,
    )
}

pub fn create_project(name: &str, description: Option<&str>) -> Operation {
    mutation(
        "CreateProject",
        CREATE_PROJECT,
        json!({
            "name": name,
            "description": description,
            "status": ProjectStatus::Active.as_str(),
        }),
        "createProject",
        Some("project"),
        Some(EntityKind::Project),
    )
}

pub fn update_project(id: &str, patch: &ProjectPatch) -> Operation {
    mutation(
        "UpdateProject",
        UPDATE_PROJECT,
        with_id(id, serde_json::to_value(patch).unwrap_or(Value::Null)),
        "updateProject",
        Some("project"),
        Some(EntityKind::Project),
    )
}

// --- Tasks ---

pub fn list_tasks(project_id: &str) -> Operation {
    query(
        "GetTasks",
        GET_TASKS,
        json!({ "projectId": project_id }),
        "tasks",
        Some(EntityKind::Task),
    )
}

pub fn task(id: &str) -> Operation {
    query(
        "GetTask",
        GET_TASK,
        json!({ "id": id }),
        "task",
        Some(EntityKind::Task),
    )
}

pub fn create_task(project_id: &str, input: &CreateTaskInput) -> Operation {
    let mut vars = match serde_json::to_value(input) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    vars.insert("projectId".to_string(), Value::String(project_id.to_string()));
    mutation(
        "CreateTask",
        CREATE_TASK,
        Value::Object(vars),
        "createTask",
        Some("task"),
        Some(EntityKind::Task),
    )
}

pub fn update_task(id: &str, patch: &TaskPatch) -> Operation {
    mutation(
        "UpdateTask",
        UPDATE_TASK,
        with_id(id, serde_json::to_value(patch).unwrap_or(Value::Null)),
        "updateTask",
        Some("task"),
        Some(EntityKind::Task),
    )
}

// --- Comments ---

pub fn list_task_comments(task_id: &str) -> Operation {
    query(
        "GetTaskComments",
        GET_TASK_COMMENTS,
        json!({ "taskId": task_id }),
        "taskComments",
        Some(EntityKind::Comment),
    )
}

pub fn add_task_comment(task_id: &str, content: &str) -> Operation {
    mutation(
        "AddTaskComment",
        ADD_TASK_COMMENT,
        json!({ "taskId": task_id, "content": content }),
        "addTaskComment",
        Some("comment"),
        Some(EntityKind::Comment),
    )
}

pub fn update_task_comment(id: &str, content: &str) -> Operation {
    mutation(
        "UpdateTaskComment",
        UPDATE_TASK_COMMENT,
        json!({ "id": id, "content": content }),
        "updateTaskComment",
        Some("comment"),
        Some(EntityKind::Comment),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_project_flattens_patch_into_variables() {
        let op = update_project(
            "12",
            &ProjectPatch {
                status: Some(ProjectStatus::Completed),
                ..Default::default()
            },
        );
        assert_eq!(op.variables, json!({ "id": "12", "status": "COMPLETED" }));
        assert_eq!(op.kind, OperationKind::Mutation);
    }

    #[test]
    fn task_due_date_is_sent_as_a_calendar_date() {
        let due = chrono::NaiveDate::from_ymd_opt(2025, 1, 1);
        let create = create_task(
            "3",
            &CreateTaskInput {
                title: "Ship".to_string(),
                due_date: due,
                ..Default::default()
            },
        );
        assert_eq!(create.variables["dueDate"], "2025-01-01");
        assert_eq!(create.variables["projectId"], "3");

        let update = update_task(
            "8",
            &TaskPatch {
                due_date: due,
                ..Default::default()
            },
        );
        assert_eq!(update.variables, json!({ "id": "8", "dueDate": "2025-01-01" }));
    }

    #[test]
    fn extract_follows_payload_field() {
        let op = add_task_comment("4", "hi");
        let data = json!({ "addTaskComment": { "comment": { "id": "9", "content": "hi" } } });
        assert_eq!(op.extract(&data).unwrap()["id"], "9");
    }

    #[test]
    fn documents_embed_field_selections() {
        assert!(list_tasks("1").document.contains("assignee { id email isActive }"));
        assert!(refresh_token("r").is_refresh());
        assert!(!list_projects().is_refresh());
    }

    #[test]
    fn query_key_distinguishes_variables() {
        assert_ne!(list_tasks("1").query_key(), list_tasks("2").query_key());
        assert_eq!(list_tasks("1").query_key(), list_tasks("1").query_key());
    }
}
