//! Header rewrite rules in the declarative request-rule schema.
//!
//! ```json
//! { "id": 1, "priority": 1,
//!   "action": { "type": "modifyHeaders",
//!               "requestHeaders": [{ "header": "User-Agent", "operation": "set", "value": "..." }] },
//!   "condition": { "urlFilter": "*", "resourceTypes": ["main_frame", ...] } }
//! ```

use serde::{Deserialize, Serialize};

use crate::profile::HeaderProfile;

pub const USER_AGENT_RULE_ID: u32 = 1;
pub const ACCEPT_LANGUAGE_RULE_ID: u32 = 2;
pub const ACCEPT_RULE_ID: u32 = 3;

/// Rule ids owned by this engine; every update replaces exactly these.
pub const MANAGED_RULE_IDS: [u32; 3] = [USER_AGENT_RULE_ID, ACCEPT_LANGUAGE_RULE_ID, ACCEPT_RULE_ID];

/// Every request resource type, so the rules apply to all traffic.
pub const RESOURCE_TYPES: [&str; 15] = [
    "main_frame",
    "sub_frame",
    "stylesheet",
    "script",
    "image",
    "font",
    "object",
    "xmlhttprequest",
    "ping",
    "csp_report",
    "media",
    "websocket",
    "webtransport",
    "webbundle",
    "other",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub kind: ActionType,
    pub request_headers: Vec<HeaderModification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    ModifyHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderModification {
    pub header: String,
    pub operation: HeaderOperation,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HeaderOperation {
    Set,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<String>,
}

impl HeaderRule {
    /// A priority-1 rule setting `header` to `value` on every request.
    pub fn set_header(id: u32, header: &str, value: &str) -> Self {
        Self {
            id,
            priority: 1,
            action: RuleAction {
                kind: ActionType::ModifyHeaders,
                request_headers: vec![HeaderModification {
                    header: header.to_string(),
                    operation: HeaderOperation::Set,
                    value: value.to_string(),
                }],
            },
            condition: RuleCondition {
                url_filter: "*".to_string(),
                resource_types: RESOURCE_TYPES.iter().map(|t| t.to_string()).collect(),
            },
        }
    }

    /// `(header, value)` of the first modification, if any.
    pub fn header_value(&self) -> Option<(&str, &str)> {
        self.action
            .request_headers
            .first()
            .map(|m| (m.header.as_str(), m.value.as_str()))
    }
}

/// The three managed rules for a header profile.
pub fn rules_for(headers: &HeaderProfile) -> Vec<HeaderRule> {
    vec![
        HeaderRule::set_header(USER_AGENT_RULE_ID, "User-Agent", &headers.user_agent),
        HeaderRule::set_header(ACCEPT_LANGUAGE_RULE_ID, "Accept-Language", &headers.accept_language),
        HeaderRule::set_header(ACCEPT_RULE_ID, "Accept", &headers.accept),
    ]
}

/// Argument of a single `updateDynamicRules` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    pub remove_rule_ids: Vec<u32>,
    pub add_rules: Vec<HeaderRule>,
}

impl RuleUpdate {
    /// Remove the managed ids and add fresh rules for `headers`, atomically
    /// from the caller's point of view.
    pub fn replace_managed(headers: &HeaderProfile) -> Self {
        Self {
            remove_rule_ids: MANAGED_RULE_IDS.to_vec(),
            add_rules: rules_for(headers),
        }
    }
}
