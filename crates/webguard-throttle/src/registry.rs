//! Operation-to-rules registry.
//!
//! Operations are named by stable identifiers (route names, handler paths).
//! A wrapper around an operation is recorded as a link from the wrapper to
//! the inner operation; declarations accumulate on the first operation in
//! the link graph that already owns a [`RuleSet`], so stacked declarations
//! separated by unrelated wrappers still end up in one set.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ThrottleResult;
use crate::rule::{RuleDeclaration, RuleSet};

/// Built once at startup, then shared read-only.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rule_sets: HashMap<String, RuleSet>,
    links: HashMap<String, Vec<String>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `wrapper` wraps `inner`.
    pub fn link(&mut self, wrapper: impl Into<String>, inner: impl Into<String>) -> &mut Self {
        let inner = inner.into();
        let targets = self.links.entry(wrapper.into()).or_default();
        if !targets.contains(&inner) {
            targets.push(inner);
        }
        self
    }

    /// Declare a rule on `operation`.
    ///
    /// # Errors
    /// Fails on a zero interval.
    pub fn declare(&mut self, operation: &str, declaration: RuleDeclaration) -> ThrottleResult<()> {
        let rule = declaration.into_rule(operation)?;
        let owner = self
            .find_owner(operation)
            .unwrap_or_else(|| operation.to_string());

        tracing::debug!(
            operation = %operation,
            owner = %owner,
            key = %rule.throttle_key,
            max_requests = rule.max_requests,
            interval_ms = rule.interval.as_millis() as u64,
            "Declared rate-limit rule"
        );

        self.rule_sets.entry(owner).or_default().add(rule);
        Ok(())
    }

    /// Rules reachable from `operation`, if any were declared in its lineage.
    pub fn resolve(&self, operation: &str) -> Option<&RuleSet> {
        self.find_owner(operation)
            .and_then(|owner| self.rule_sets.get(&owner))
    }

    pub fn len(&self) -> usize {
        self.rule_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rule_sets.is_empty()
    }

    // Breadth-first over links, nearest owner wins.
    fn find_owner(&self, operation: &str) -> Option<String> {
        let mut queue = VecDeque::from([operation]);
        let mut seen = HashSet::from([operation]);

        while let Some(current) = queue.pop_front() {
            if self.rule_sets.contains_key(current) {
                return Some(current.to_string());
            }
            for inner in self.links.get(current).into_iter().flatten() {
                if seen.insert(inner.as_str()) {
                    queue.push_back(inner);
                }
            }
        }
        None
    }
}
