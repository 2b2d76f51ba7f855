//! Immutable route index built from the enabled rules of a snapshot.

use std::collections::HashMap;

use crate::rule::Rule;

#[derive(Debug, Default)]
pub struct RouteSnapshot {
    pub(crate) exact: HashMap<String, Vec<Rule>>,
    pub(crate) prefix: TrieNode,
    pub(crate) wildcard: Vec<Rule>,
}

#[derive(Debug, Default)]
pub(crate) struct TrieNode {
    children: HashMap<char, TrieNode>,
    rules: Vec<Rule>,
}

impl TrieNode {
    fn insert(&mut self, prefix: &str, rule: Rule) {
        let mut node = self;
        for ch in prefix.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.rules.push(rule);
    }

    /// Collect rules at every node visited along the path, so every
    /// registered prefix of `path` contributes its rules.
    pub(crate) fn collect<'a>(&'a self, path: &str, out: &mut Vec<&'a Rule>) {
        let mut node = Some(self);
        for ch in path.chars() {
            let Some(current) = node else { break };
            out.extend(current.rules.iter());
            node = current.children.get(&ch);
        }
        if let Some(current) = node {
            out.extend(current.rules.iter());
        }
    }
}

impl RouteSnapshot {
    /// Index the enabled rules by match pattern.
    pub fn build<'a>(rules: impl Iterator<Item = &'a Rule>) -> Self {
        let mut snap = RouteSnapshot::default();
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            let pattern = rule.match_path.trim();
            if pattern.is_empty() || pattern == "*" {
                snap.wildcard.push(rule.clone());
            } else if let Some(prefix) = pattern.strip_suffix('*') {
                snap.prefix.insert(prefix, rule.clone());
            } else {
                snap.exact
                    .entry(pattern.to_string())
                    .or_default()
                    .push(rule.clone());
            }
        }
        snap
    }
}
