//! Config-center rule source - HTTP pull of the full rule set.
//!
//! The payload may be a JSON list, a JSON `{"rules": [...]}` wrapper, or
//! YAML of either shape. The version is the `Content-MD5` response header
//! when present, else the MD5 of the body.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use rls_core::engine::FailPolicy;
use rls_core::ports::{RuleSource, RulesPayload, SourceError};
use rls_core::rule::Rule;

const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Config-center connection settings, straight from the YAML config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceSettings {
    /// Base address, e.g. `http://127.0.0.1:8848`. Empty disables polling.
    pub addr: String,
    pub namespace: String,
    pub group: String,
    pub data_id: String,
    pub username: String,
    pub password: String,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub fail_policy: FailPolicy,
    /// `json` | `yaml`; auto-detect when empty.
    pub format: String,
}

impl SourceSettings {
    pub fn enabled(&self) -> bool {
        !self.addr.is_empty() && !self.data_id.is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = if self.poll_interval_ms == 0 {
            5_000
        } else {
            self.poll_interval_ms
        };
        Duration::from_millis(ms)
    }
}

pub struct HttpRuleSource {
    settings: SourceSettings,
    client: reqwest::Client,
}

impl HttpRuleSource {
    pub fn new(settings: SourceSettings) -> Result<Self, SourceError> {
        let timeout = if settings.timeout_ms == 0 {
            Duration::from_secs(2)
        } else {
            Duration::from_millis(settings.timeout_ms)
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;
        Ok(Self { settings, client })
    }

    fn build_url(&self) -> Result<reqwest::Url, SourceError> {
        let base = format!(
            "{}/nacos/v1/cs/configs",
            self.settings.addr.trim_end_matches('/')
        );
        let mut url = reqwest::Url::parse(&base).map_err(|e| SourceError::Http(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("dataId", &self.settings.data_id);
            let group = if self.settings.group.is_empty() {
                DEFAULT_GROUP
            } else {
                &self.settings.group
            };
            query.append_pair("group", group);
            if !self.settings.namespace.is_empty() {
                query.append_pair("tenant", &self.settings.namespace);
            }
            if !self.settings.username.is_empty() {
                query.append_pair("username", &self.settings.username);
                query.append_pair("password", &self.settings.password);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl RuleSource for HttpRuleSource {
    async fn fetch(&self) -> Result<RulesPayload, SourceError> {
        if !self.settings.enabled() {
            return Err(SourceError::Disabled);
        }

        let response = self
            .client
            .get(self.build_url()?)
            .send()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        let status = response.status();
        let version_header = response
            .headers()
            .get("Content-MD5")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let version =
            version_header.unwrap_or_else(|| format!("{:x}", md5::compute(body.as_bytes())));
        let rules = parse_rules(&body, &self.settings.format)?;

        Ok(RulesPayload { rules, version })
    }
}

/// Decode a rules payload, trying JSON first then YAML unless a format is
/// forced.
pub fn parse_rules(raw: &str, format: &str) -> Result<Vec<Rule>, SourceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SourceError::Parse("empty rules payload".to_string()));
    }

    let format = format.trim().to_ascii_lowercase();

    if format == "json" || format.is_empty() {
        if let Some(rules) = try_parse_json(trimmed) {
            return Ok(rules);
        }
        if format == "json" {
            return Err(SourceError::Parse("invalid json rules payload".to_string()));
        }
    }

    if format == "yaml" || format.is_empty() {
        if let Some(rules) = try_parse_yaml(trimmed) {
            return Ok(rules);
        }
        if format == "yaml" {
            return Err(SourceError::Parse("invalid yaml rules payload".to_string()));
        }
    }

    Err(SourceError::Parse(format!(
        "unsupported rules payload format: {:?}",
        format
    )))
}

#[derive(Deserialize)]
struct Wrapper {
    rules: Vec<Rule>,
}

fn try_parse_json(raw: &str) -> Option<Vec<Rule>> {
    if let Ok(list) = serde_json::from_str::<Vec<Rule>>(raw) {
        return Some(list);
    }
    serde_json::from_str::<Wrapper>(raw).ok().map(|w| w.rules)
}

fn try_parse_yaml(raw: &str) -> Option<Vec<Rule>> {
    if let Ok(list) = serde_yaml::from_str::<Vec<Rule>>(raw) {
        return Some(list);
    }
    serde_yaml::from_str::<Wrapper>(raw).ok().map(|w| w.rules)
}
