//! Data Transfer Objects - request/response types for the API.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Request to evaluate a single rule by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRequest {
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    #[serde(default)]
    pub dims: HashMap<String, String>,
}

/// Request to evaluate every rule matching a path/method pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub path: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub dims: HashMap<String, String>,
}

/// Outcome of an allow/check evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowResponse {
    pub allowed: bool,
    pub remaining: i64,
    #[serde(rename = "retryAfterMs")]
    pub retry_after_ms: i64,
    pub reason: String,
}

/// Acknowledgement for rule create/update operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAck {
    pub status: String,
    #[serde(rename = "ruleId")]
    pub rule_id: String,
}

impl RuleAck {
    pub fn ok(rule_id: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            rule_id: rule_id.into(),
        }
    }
}
