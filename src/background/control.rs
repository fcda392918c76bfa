//! Runtime control messages.
//!
//! `{ "action": "updateHeaders" }` forces an immediate rotation and is
//! answered with `{ "success": true }` or `{ "success": false, "error": ... }`.
//! Messages with any other action are not answered.

use serde::{Deserialize, Serialize};

use super::rotation::RotationTask;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ControlRequest {
    UpdateHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// `None` for anything that is not a known control request.
pub fn parse_request(message: &serde_json::Value) -> Option<ControlRequest> {
    ControlRequest::deserialize(message).ok()
}

pub async fn handle_control<T: RotationTask + ?Sized>(request: ControlRequest, task: &T) -> ControlResponse {
    match request {
        ControlRequest::UpdateHeaders => match task.rotate().await {
            Ok(()) => ControlResponse::ok(),
            Err(e) => ControlResponse::failure(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_action() {
        assert_eq!(
            parse_request(&json!({ "action": "updateHeaders" })),
            Some(ControlRequest::UpdateHeaders)
        );
    }

    #[test]
    fn test_unknown_messages_ignored() {
        assert_eq!(parse_request(&json!({ "action": "reboot" })), None);
        assert_eq!(parse_request(&json!("updateHeaders")), None);
        assert_eq!(parse_request(&json!({})), None);
    }

    #[test]
    fn test_response_shape() {
        assert_eq!(serde_json::to_value(ControlResponse::ok()).unwrap(), json!({ "success": true }));
        assert_eq!(
            serde_json::to_value(ControlResponse::failure("quota")).unwrap(),
            json!({ "success": false, "error": "quota" })
        );
    }
}
