//! Algorithm mux - routes a rule to its limiter by `rule.algo`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rls_core::decision::Decision;
use rls_core::ports::{LimitError, Limiter};
use rls_core::rule::{Algorithm, Rule};

pub struct LimiterMux {
    limiters: HashMap<Algorithm, Arc<dyn Limiter>>,
}

impl LimiterMux {
    pub fn new(limiters: HashMap<Algorithm, Arc<dyn Limiter>>) -> Self {
        assert!(!limiters.is_empty(), "limiter mux requires at least one limiter");
        Self { limiters }
    }
}

#[async_trait]
impl Limiter for LimiterMux {
    async fn allow(
        &self,
        rule: &Rule,
        dim_key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, LimitError> {
        let limiter = self
            .limiters
            .get(&rule.algo)
            .ok_or_else(|| LimitError::UnsupportedAlgorithm(rule.algo.as_str().to_string()))?;
        limiter.allow(rule, dim_key, now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Marker(&'static str);

    #[async_trait]
    impl Limiter for Marker {
        async fn allow(
            &self,
            _rule: &Rule,
            _dim_key: &str,
            _now: DateTime<Utc>,
        ) -> Result<Decision, LimitError> {
            Ok(Decision::allow(self.0))
        }
    }

    #[tokio::test]
    async fn test_routes_by_algo() {
        let mux = LimiterMux::new(HashMap::from([
            (
                Algorithm::TokenBucket,
                Arc::new(Marker("token")) as Arc<dyn Limiter>,
            ),
            (
                Algorithm::SlidingWindow,
                Arc::new(Marker("sliding")) as Arc<dyn Limiter>,
            ),
        ]));

        let mut rule = Rule {
            rule_id: "r".to_string(),
            algo: Algorithm::SlidingWindow,
            window_ms: 1000,
            limit: 1,
            enabled: true,
            ..Default::default()
        };
        let d = mux.allow(&rule, "k", Utc::now()).await.unwrap();
        assert_eq!(d.reason, "sliding");

        rule.algo = Algorithm::LeakyBucket;
        let err = mux.allow(&rule, "k", Utc::now()).await.unwrap_err();
        assert!(matches!(err, LimitError::UnsupportedAlgorithm(_)));
    }
}
