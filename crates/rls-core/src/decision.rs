//! The outcome every gate produces.

/// Verdict for a single request against one or more gates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Remaining budget after this request; informational.
    pub remaining: i64,
    /// Suggested client backoff. 0 means no hint.
    pub retry_after_ms: i64,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: &str) -> Self {
        Self {
            allowed: true,
            reason: reason.to_string(),
            ..Default::default()
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: reason.to_string(),
            ..Default::default()
        }
    }

    pub fn with_remaining(mut self, remaining: i64) -> Self {
        self.remaining = remaining;
        self
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: i64) -> Self {
        self.retry_after_ms = retry_after_ms;
        self
    }
}

/// Reason strings surfaced in decisions and wire responses.
pub mod reason {
    pub const ALLOWED: &str = "allowed";
    pub const NO_RULES: &str = "no_rules";
    pub const NO_ENABLED_RULES: &str = "no_enabled_rules";
    pub const FAIL_OPEN: &str = "fail_open";
    pub const FAIL_CLOSED: &str = "fail_closed";

    pub const SLIDING_ALLOWED: &str = "sliding_window_allowed";
    pub const SLIDING_EXCEEDED: &str = "sliding_window_exceeded";
    pub const TOKEN_ALLOWED: &str = "token_allowed";
    pub const TOKEN_EMPTY: &str = "token_bucket_empty";
    pub const LEAKY_ALLOWED: &str = "leaky_allowed";
    pub const LEAKY_FULL: &str = "leaky_bucket_full";

    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const CIRCUIT_OPEN_BY_RL_EXCEED: &str = "circuit_open_by_rl_exceed";
    pub const PROBE_DROPPED: &str = "probe_dropped";

    pub const IP_TEMP_BLACKLIST_L1: &str = "ip_in_temp_blacklist_l1";
    pub const IP_TEMP_BLACKLIST_L2: &str = "ip_in_temp_blacklist_l2";
    pub const IP_BLACKLIST_L1: &str = "ip_in_blacklist_l1";
    pub const IP_BLACKLIST_L2: &str = "ip_in_blacklist_l2";
    pub const IP_WHITELIST_L1: &str = "ip_in_whitelist_l1";
    pub const IP_WHITELIST_L2: &str = "ip_in_whitelist_l2";
    pub const TEMP_BLACKLIST_CHECK_FAILED: &str = "temp_blacklist_check_failed";
    pub const BLACKLIST_CHECK_FAILED: &str = "blacklist_check_failed";
    pub const WHITELIST_CHECK_FAILED: &str = "whitelist_check_failed";

    pub const INVALID_SCRIPT_RESPONSE: &str = "invalid_script_response";

    pub const QUOTA_OK: &str = "quota_ok";
    pub const QUOTA_EXCEEDED_PREFIX: &str = "quota_exceeded:";
    pub const QUOTA_INCR_FAILED: &str = "quota_incr_failed";
    pub const QUOTA_BREAKER_OPEN: &str = "circuit_breaker_open";
    pub const WARMUP_THROTTLED: &str = "warmup_throttled";
}
