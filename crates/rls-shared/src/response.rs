//! Error envelope returned by every non-2xx response.
//!
//! Codes follow the `<http status>000` scheme with dedicated variants for
//! rate-limit denials: `429000` generic, `429001` blacklist, `429002` quota.

use serde::{Deserialize, Serialize};

pub const CODE_BAD_REQUEST: u32 = 400_000;
pub const CODE_FORBIDDEN: u32 = 403_000;
pub const CODE_NOT_FOUND: u32 = 404_000;
pub const CODE_INTERNAL: u32 = 500_000;
pub const CODE_RATE_LIMIT: u32 = 429_000;
pub const CODE_RATE_BLACKLIST: u32 = 429_001;
pub const CODE_RATE_QUOTA: u32 = 429_002;

/// Extra context attached to an error envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<i64>,
    #[serde(rename = "ruleId", skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Standard error envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,
}

impl ErrorResponse {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.detail
            .get_or_insert_with(ErrorDetail::default)
            .reason = Some(reason.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.detail
            .get_or_insert_with(ErrorDetail::default)
            .rule_id = Some(rule_id.into());
        self
    }

    pub fn with_retry_after(mut self, secs: i64) -> Self {
        self.detail
            .get_or_insert_with(ErrorDetail::default)
            .retry_after = Some(secs);
        self
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(CODE_BAD_REQUEST, "Invalid request body").with_reason(reason)
    }

    pub fn not_found(rule_id: impl Into<String>) -> Self {
        Self::new(CODE_NOT_FOUND, "Rule not found").with_rule_id(rule_id)
    }

    pub fn forbidden(rule_id: impl Into<String>) -> Self {
        Self::new(CODE_FORBIDDEN, "Rule is disabled").with_rule_id(rule_id)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(CODE_INTERNAL, "Internal Server Error").with_reason(reason)
    }
}

/// Pick the denial code for a rate-limit reason string.
pub fn rate_limit_code(reason: &str) -> u32 {
    let reason = reason.to_ascii_lowercase();
    if reason.contains("blacklist") {
        CODE_RATE_BLACKLIST
    } else if reason.contains("quota_exceeded") {
        CODE_RATE_QUOTA
    } else {
        CODE_RATE_LIMIT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_code_selection() {
        assert_eq!(rate_limit_code("ip_in_blacklist_l2"), CODE_RATE_BLACKLIST);
        assert_eq!(rate_limit_code("quota_exceeded:hour"), CODE_RATE_QUOTA);
        assert_eq!(rate_limit_code("token_bucket_empty"), CODE_RATE_LIMIT);
    }

    #[test]
    fn test_detail_builders_accumulate() {
        let resp = ErrorResponse::new(CODE_RATE_LIMIT, "Too Many Requests")
            .with_reason("sliding_window_exceeded")
            .with_rule_id("r1")
            .with_retry_after(2);
        let detail = resp.detail.unwrap();
        assert_eq!(detail.reason.as_deref(), Some("sliding_window_exceeded"));
        assert_eq!(detail.rule_id.as_deref(), Some("r1"));
        assert_eq!(detail.retry_after, Some(2));
    }
}
