//! Application configuration - YAML file with environment variables
//! expanded verbatim in the raw text before parsing.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use rls_core::engine::FailPolicy;
use rls_core::rule::Rule;
use rls_infra::repo::RedisConfig;
use rls_infra::rules::SourceSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {err}")]
    Read { path: String, err: String },
    #[error("failed to parse config {path}: {err}")]
    Parse { path: String, err: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub http_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisSettings {
    pub url: String,
    pub prefix: String,
    pub updates_channel: String,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub script_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            prefix: "pixiu:rls".to_string(),
            updates_channel: "pixiu_rls_updates".to_string(),
            connect_timeout_ms: 2_000,
            command_timeout_ms: 100,
            script_timeout_ms: 200,
        }
    }
}

impl RedisSettings {
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            prefix: self.prefix.clone(),
            updates_channel: self.updates_channel.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            script_timeout: Duration::from_millis(self.script_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub fail_policy: FailPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub redis: RedisSettings,
    pub features: Features,
    pub config_center: SourceSettings,
    pub bootstrap_rules: Vec<Rule>,
}

impl AppConfig {
    /// Load from a YAML file; missing file falls back to defaults so a dev
    /// instance starts without any setup.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_string(),
                    err: e.to_string(),
                })
            }
        };
        serde_yaml::from_str(&expand_env(&raw)).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            err: e.to_string(),
        })
    }
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// Unset variables expand to the empty string.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&env_or_empty(&name));
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(&next) if next == '_' || next.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&env_or_empty(&name));
            }
            _ => out.push('$'),
        }
    }
    out
}

fn env_or_empty(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_both_forms() {
        std::env::set_var("RLS_TEST_PREFIX", "svc:rls");
        assert_eq!(expand_env("prefix: ${RLS_TEST_PREFIX}"), "prefix: svc:rls");
        assert_eq!(expand_env("prefix: $RLS_TEST_PREFIX!"), "prefix: svc:rls!");
        assert_eq!(expand_env("unset: ${RLS_TEST_NOPE}"), "unset: ");
        assert_eq!(expand_env("cost: $5"), "cost: $5");
    }

    #[test]
    fn test_parse_full_config() {
        std::env::set_var("RLS_TEST_REDIS_URL", "redis://redis-prod:6379");
        let yaml = r#"
server:
  httpAddr: "0.0.0.0:9090"
redis:
  url: "${RLS_TEST_REDIS_URL}"
  prefix: "svc:rls"
features:
  failPolicy: fail-open
configCenter:
  addr: "http://nacos:8848"
  dataId: "rls-rules"
  failPolicy: fail-closed
bootstrapRules:
  - ruleId: default
    match: "*"
    algo: token_bucket
    windowMs: 1000
    limit: 100
    enabled: true
"#;
        let config: AppConfig = serde_yaml::from_str(&expand_env(yaml)).unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:9090");
        assert_eq!(config.redis.url, "redis://redis-prod:6379");
        assert_eq!(config.features.fail_policy, FailPolicy::FailOpen);
        assert!(config.config_center.enabled());
        assert_eq!(config.config_center.fail_policy, FailPolicy::FailClosed);
        assert_eq!(config.bootstrap_rules.len(), 1);
        assert_eq!(config.bootstrap_rules[0].limit, 100);
    }

    #[test]
    fn test_defaults_without_file() {
        let config = AppConfig::load("/definitely/not/there.yaml").unwrap();
        assert_eq!(config.redis.prefix, "pixiu:rls");
        assert_eq!(config.features.fail_policy, FailPolicy::FailClosed);
        assert!(!config.config_center.enabled());
    }
}
