//! GraphQL wire envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of an outgoing GraphQL POST.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlRequest {
    pub operation_name: String,
    pub query: String,
    #[serde(default)]
    pub variables: Value,
}

/// Body of a GraphQL response. A response may carry both partial data and
/// errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl GraphQlResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![GraphQlError::new(message)],
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<ErrorExtensions>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.extensions = Some(ErrorExtensions {
            code: Some(code.into()),
        });
        self
    }

    /// Structured error code, if the server supplied one.
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.code.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_error_with_extensions() {
        let resp: GraphQlResponse = serde_json::from_str(
            r#"{"data":null,"errors":[{"message":"nope","path":["projects"],"extensions":{"code":"UNAUTHENTICATED"}}]}"#,
        )
        .unwrap();
        assert!(resp.has_errors());
        assert_eq!(resp.errors[0].code(), Some("UNAUTHENTICATED"));
        assert!(resp.data.is_none());
    }

    #[test]
    fn request_uses_camel_case_operation_name() {
        let req = GraphQlRequest {
            operation_name: "GetProjects".to_string(),
            query: "query GetProjects { projects { id } }".to_string(),
            variables: serde_json::json!({}),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["operationName"], "GetProjects");
    }
}
