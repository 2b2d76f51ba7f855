//! Rule matching against the current route snapshot.

use std::sync::Arc;

use crate::rule::Rule;
use crate::snapshot::SnapshotCell;

use super::snapshot::RouteSnapshot;

/// The request attributes rule matching needs.
#[derive(Debug, Clone, Default)]
pub struct RequestCtx {
    pub path: String,
    pub method: String,
    /// Caller identity kind (`user`, `api_key`, `ip`); empty when unknown.
    pub client_kind: String,
}

/// Matches rules from a hot-swapped route snapshot.
#[derive(Debug, Default)]
pub struct Matcher {
    snap: SnapshotCell<RouteSnapshot>,
}

impl Matcher {
    pub fn new(initial: RouteSnapshot) -> Self {
        Self {
            snap: SnapshotCell::new(initial),
        }
    }

    /// Swap in a freshly-built index.
    pub fn replace(&self, snapshot: RouteSnapshot) {
        self.snap.replace(snapshot);
    }

    /// All matching rules ordered by priority desc, ties by rule id asc.
    pub fn match_rules(&self, ctx: &RequestCtx) -> Vec<Rule> {
        let snap: Arc<RouteSnapshot> = self.snap.load();
        let mut candidates: Vec<&Rule> = Vec::new();

        if !ctx.path.is_empty() {
            if let Some(rules) = snap.exact.get(&ctx.path) {
                candidates.extend(rules.iter());
            }
            snap.prefix.collect(&ctx.path, &mut candidates);
        }
        candidates.extend(snap.wildcard.iter());

        let mut matched: Vec<Rule> = candidates
            .into_iter()
            .filter(|r| r.enabled && matches_method(&r.methods, &ctx.method))
            .filter(|r| matches_client(&r.client, &ctx.client_kind))
            .cloned()
            .collect();

        matched.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        matched
    }
}

fn matches_method(methods: &[String], method: &str) -> bool {
    if methods.is_empty() {
        return true;
    }
    let method = method.trim();
    methods
        .iter()
        .any(|m| m.trim() == "*" || m.trim().eq_ignore_ascii_case(method))
}

fn matches_client(rule_client: &str, request_client: &str) -> bool {
    let rule_client = rule_client.trim();
    rule_client.is_empty() || rule_client.eq_ignore_ascii_case(request_client.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Algorithm;

    fn rule(id: &str, pattern: &str, priority: i32) -> Rule {
        Rule {
            rule_id: id.to_string(),
            match_path: pattern.to_string(),
            priority,
            algo: Algorithm::TokenBucket,
            window_ms: 1000,
            limit: 10,
            enabled: true,
            ..Default::default()
        }
    }

    fn matcher(rules: Vec<Rule>) -> Matcher {
        Matcher::new(RouteSnapshot::build(rules.iter()))
    }

    fn ctx(path: &str, method: &str) -> RequestCtx {
        RequestCtx {
            path: path.to_string(),
            method: method.to_string(),
            client_kind: String::new(),
        }
    }

    #[test]
    fn test_exact_prefix_and_wildcard_all_match() {
        let m = matcher(vec![
            rule("exact", "/api/login", 0),
            rule("prefix", "/api/*", 0),
            rule("any", "*", 0),
        ]);
        let ids: Vec<String> = m
            .match_rules(&ctx("/api/login", "GET"))
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, vec!["any", "exact", "prefix"]);
    }

    #[test]
    fn test_all_covering_prefixes_are_candidates() {
        let m = matcher(vec![
            rule("short", "/a*", 0),
            rule("long", "/a/b*", 0),
            rule("other", "/x*", 0),
        ]);
        let ids: Vec<String> = m
            .match_rules(&ctx("/a/b/c", "GET"))
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, vec!["long", "short"]);
    }

    #[test]
    fn test_priority_desc_then_rule_id_asc() {
        let m = matcher(vec![
            rule("b", "*", 1),
            rule("a", "*", 1),
            rule("c", "*", 9),
        ]);
        let ids: Vec<String> = m
            .match_rules(&ctx("/any", "GET"))
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_method_filter_is_case_insensitive() {
        let mut r = rule("post-only", "*", 0);
        r.methods = vec!["POST".to_string()];
        let m = matcher(vec![r]);
        assert_eq!(m.match_rules(&ctx("/x", "post")).len(), 1);
        assert!(m.match_rules(&ctx("/x", "GET")).is_empty());
    }

    #[test]
    fn test_star_method_matches_anything() {
        let mut r = rule("any-method", "*", 0);
        r.methods = vec!["*".to_string()];
        let m = matcher(vec![r]);
        assert_eq!(m.match_rules(&ctx("/x", "DELETE")).len(), 1);
    }

    #[test]
    fn test_client_kind_filter() {
        let mut r = rule("users", "*", 0);
        r.client = "user".to_string();
        let m = matcher(vec![r]);

        let mut c = ctx("/x", "GET");
        c.client_kind = "USER".to_string();
        assert_eq!(m.match_rules(&c).len(), 1);

        c.client_kind = "ip".to_string();
        assert!(m.match_rules(&c).is_empty());
    }

    #[test]
    fn test_disabled_rules_never_match() {
        let mut r = rule("off", "*", 0);
        r.enabled = false;
        let m = matcher(vec![r]);
        assert!(m.match_rules(&ctx("/x", "GET")).is_empty());
    }

    #[test]
    fn test_replace_swaps_index() {
        let m = matcher(vec![rule("old", "/api*", 0)]);
        assert_eq!(m.match_rules(&ctx("/api/x", "GET")).len(), 1);

        let next = vec![rule("new", "/other*", 0)];
        m.replace(RouteSnapshot::build(next.iter()));
        assert!(m.match_rules(&ctx("/api/x", "GET")).is_empty());
        assert_eq!(m.match_rules(&ctx("/other/x", "GET")).len(), 1);
    }
}
