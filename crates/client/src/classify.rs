//! Maps raw transport results onto the error taxonomy.
//!
//! Structured `extensions.code` values win. Servers that only report auth
//! failures as text are matched against known messages, which is a heuristic:
//! a server changing its wording degrades auth failures into validation errors.

use serde_json::Value;
use taskboard_shared::{AuthFailure, GraphQlError, GraphQlResponse, SyncError, TransportError};

/// A transport result after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Data(Value),
    Auth(AuthFailure),
    Failed(SyncError),
}

const EXPIRED_MESSAGES: &[&str] = &["signature has expired", "token expired", "token has expired"];
const INVALID_MESSAGES: &[&str] = &["invalid token", "error decoding signature"];
const UNAUTHENTICATED_MESSAGES: &[&str] = &["unauthenticated", "authentication credentials were not provided"];

/// Classify one GraphQL error as an authentication failure, if it is one.
pub fn auth_failure(error: &GraphQlError) -> Option<AuthFailure> {
    match error.code() {
        Some("UNAUTHENTICATED") => return Some(AuthFailure::Unauthenticated),
        Some("TOKEN_EXPIRED") => return Some(AuthFailure::Expired),
        Some("INVALID_TOKEN") => return Some(AuthFailure::Invalid),
        _ => {}
    }

    let message = error.message.to_lowercase();
    let matches = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
    if matches(EXPIRED_MESSAGES) {
        Some(AuthFailure::Expired)
    } else if matches(INVALID_MESSAGES) {
        Some(AuthFailure::Invalid)
    } else if matches(UNAUTHENTICATED_MESSAGES) {
        Some(AuthFailure::Unauthenticated)
    } else {
        None
    }
}

pub fn classify(result: Result<GraphQlResponse, TransportError>) -> Classified {
    let response = match result {
        Ok(response) => response,
        Err(TransportError::ServerError { status: 401, .. }) => {
            return Classified::Auth(AuthFailure::Unauthenticated)
        }
        Err(e) => return Classified::Failed(SyncError::Transport(e)),
    };

    if response.has_errors() {
        if let Some(failure) = response.errors.iter().find_map(auth_failure) {
            return Classified::Auth(failure);
        }
        let message = response
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let code = response
            .errors
            .iter()
            .find_map(|e| e.code().map(str::to_string));
        return Classified::Failed(SyncError::Validation { message, code });
    }

    match response.data {
        Some(data) if !data.is_null() => Classified::Data(data),
        _ => Classified::Failed(SyncError::Transport(TransportError::MalformedResponse(
            "response carried neither data nor errors".to_string(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn structured_code_takes_precedence() {
        let err = GraphQlError::new("whatever").with_code("TOKEN_EXPIRED");
        assert_eq!(auth_failure(&err), Some(AuthFailure::Expired));
    }

    #[test]
    fn message_heuristics_cover_jwt_wording() {
        assert_eq!(
            auth_failure(&GraphQlError::new("Signature has expired")),
            Some(AuthFailure::Expired)
        );
        assert_eq!(
            auth_failure(&GraphQlError::new("Error decoding signature")),
            Some(AuthFailure::Invalid)
        );
        assert_eq!(
            auth_failure(&GraphQlError::new("Invalid token")),
            Some(AuthFailure::Invalid)
        );
    }

    #[test]
    fn authorization_errors_are_not_auth_failures() {
        assert_eq!(auth_failure(&GraphQlError::new("Unauthorized")), None);
        assert_eq!(auth_failure(&GraphQlError::new("Not found or unauthorized")), None);
        let classified = classify(Ok(GraphQlResponse::error("Unauthorized")));
        assert!(matches!(
            classified,
            Classified::Failed(SyncError::Validation { .. })
        ));
    }

    #[test]
    fn http_401_is_unauthenticated() {
        let classified = classify(Err(TransportError::ServerError {
            status: 401,
            body: String::new(),
        }));
        assert_eq!(classified, Classified::Auth(AuthFailure::Unauthenticated));
    }

    #[test]
    fn other_transport_errors_pass_through() {
        let err = TransportError::NetworkUnavailable("refused".to_string());
        assert_eq!(
            classify(Err(err.clone())),
            Classified::Failed(SyncError::Transport(err))
        );
    }

    #[test]
    fn validation_messages_are_joined() {
        let resp = GraphQlResponse {
            data: None,
            errors: vec![
                GraphQlError::new("Assignee not found in your organization").with_code("BAD_INPUT"),
                GraphQlError::new("title is required"),
            ],
        };
        assert_eq!(
            classify(Ok(resp)),
            Classified::Failed(SyncError::Validation {
                message: "Assignee not found in your organization, title is required".to_string(),
                code: Some("BAD_INPUT".to_string()),
            })
        );
    }

    #[test]
    fn empty_response_is_malformed() {
        assert!(matches!(
            classify(Ok(GraphQlResponse::default())),
            Classified::Failed(SyncError::Transport(TransportError::MalformedResponse(_)))
        ));
        assert_eq!(
            classify(Ok(GraphQlResponse::ok(json!({ "projects": [] })))),
            Classified::Data(json!({ "projects": [] }))
        );
    }
}
