//! Shared data models for the taskboard GraphQL API.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// --- Status enums ---

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProjectStatus {
    Active,
    Completed,
    Archived,
    /// A status string this client does not know about yet.
    Other(String),
}

impl ProjectStatus {
    pub fn as_str(&self) -> &str {
        match self {
            ProjectStatus::Active => "ACTIVE",
            ProjectStatus::Completed => "COMPLETED",
            ProjectStatus::Archived => "ARCHIVED",
            ProjectStatus::Other(s) => s,
        }
    }
}

impl From<&str> for ProjectStatus {
    fn from(s: &str) -> Self {
        match s {
            "ACTIVE" => ProjectStatus::Active,
            "COMPLETED" => ProjectStatus::Completed,
            "ARCHIVED" => ProjectStatus::Archived,
            other => ProjectStatus::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
            TaskStatus::Other(s) => s,
        }
    }
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "TODO" => TaskStatus::Todo,
            "IN_PROGRESS" => TaskStatus::InProgress,
            "DONE" => TaskStatus::Done,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(<$ty>::from(s.as_str()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum_serde!(ProjectStatus);
string_enum_serde!(TaskStatus);

// --- Accounts ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub organization: Option<Organization>,
}

/// Lightweight user reference embedded in tasks and comments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub is_active: Option<bool>,
}

// --- Projects ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: ProjectStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Partial update for a project. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub completion_rate: f64,
}

// --- Tasks ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assignee: Option<UserRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    /// Mutations take a calendar date even though tasks store a timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_email: Option<String>,
    /// Mutations take a calendar date even though tasks store a timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
}

// --- Comments ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskComment {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub author: Option<UserRef>,
}

// --- Auth payloads ---

/// Result of the `tokenAuth` login mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginPayload {
    pub token: String,
    pub refresh_token: String,
    pub user: User,
}

/// Result of the `refreshToken` mutation. The refresh token is only present
/// when the server rotates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

/// Decoded claims returned by `verifyToken`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(default)]
    pub email: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub orig_iat: Option<i64>,
}

impl TokenPayload {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_survives_roundtrip() {
        let status: ProjectStatus = serde_json::from_str("\"ON_HOLD\"").unwrap();
        assert_eq!(status, ProjectStatus::Other("ON_HOLD".to_string()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"ON_HOLD\"");
    }

    #[test]
    fn task_decodes_from_wire_shape() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "7",
            "title": "Write docs",
            "description": "",
            "status": "IN_PROGRESS",
            "dueDate": null,
            "assignee": { "id": "3", "email": "a@b.c", "isActive": true }
        }))
        .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assignee.unwrap().email, "a@b.c");
        assert!(task.created_at.is_none());
    }

    #[test]
    fn patch_omits_absent_fields() {
        let patch = ProjectPatch {
            status: Some(ProjectStatus::Completed),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            serde_json::json!({ "status": "COMPLETED" })
        );
    }
}
