//! Deduplicated rule storage with change-event emission.

use crate::error::{EnforceError, Result};
use crate::event::{Event, EventSink, SharedSink};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

/// Fingerprint of a rule's tokens; duplicate inserts collide here
fn fingerprint(tokens: &[String]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for token in tokens {
        token.hash(&mut hasher);
        // Separate tokens so ["ab","c"] and ["a","bc"] differ.
        0xffu8.hash(&mut hasher);
    }
    hasher.finish()
}

/// One definition key's rules, stored by fingerprint.
///
/// Insertion order is not observable across iterations. Mutations
/// notify subscribed sinks; duplicate adds and absent removes are
/// silent no-ops.
pub struct RuleTable {
    key: String,
    rules: HashMap<u64, Vec<String>>,
    sinks: Vec<SharedSink>,
}

impl std::fmt::Debug for RuleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleTable")
            .field("key", &self.key)
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl RuleTable {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            rules: HashMap::new(),
            sinks: Vec::new(),
        }
    }

    /// The owning definition key (`p`, `g2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of stored rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub(crate) fn subscribe(&mut self, sink: SharedSink) {
        self.sinks.push(sink);
    }

    fn emit(&self, event: Event) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    /// Insert a rule; false if an identical rule was already stored
    pub fn add(&mut self, tokens: &[String]) -> bool {
        let print = fingerprint(tokens);
        if self.rules.contains_key(&print) {
            return false;
        }
        self.rules.insert(print, tokens.to_vec());
        self.emit(Event::RuleAdded {
            key: self.key.clone(),
            rule: tokens.to_vec(),
        });
        true
    }

    /// Delete a rule; false if it was not stored
    pub fn remove(&mut self, tokens: &[String]) -> bool {
        let print = fingerprint(tokens);
        if self.rules.remove(&print).is_none() {
            return false;
        }
        self.emit(Event::RuleRemoved {
            key: self.key.clone(),
            rule: tokens.to_vec(),
        });
        true
    }

    /// Drop every rule
    pub fn clear(&mut self) {
        self.rules.clear();
        self.emit(Event::Cleared);
    }

    /// Visit rules in unspecified order; stop when the visitor
    /// returns false
    pub fn range(&self, visitor: &mut dyn FnMut(&[String]) -> bool) {
        for rule in self.rules.values() {
            if !visitor(rule) {
                break;
            }
        }
    }

    /// Distinct projection over the given column indices
    ///
    /// # Errors
    ///
    /// Fails when an index is out of range for a stored rule.
    pub fn get_distinct(&self, columns: &[usize]) -> Result<Vec<Vec<String>>> {
        let mut seen = BTreeSet::new();
        for rule in self.rules.values() {
            let mut projection = Vec::with_capacity(columns.len());
            for &column in columns {
                let token = rule.get(column).ok_or_else(|| {
                    EnforceError::shape(format!(
                        "column {column} out of range for a `{}` rule of {} tokens",
                        self.key,
                        rule.len()
                    ))
                })?;
                projection.push(token.clone());
            }
            seen.insert(projection);
        }
        Ok(seen.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rule(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    #[derive(Default)]
    struct Counter {
        added: AtomicUsize,
        removed: AtomicUsize,
        cleared: AtomicUsize,
    }

    impl EventSink for Counter {
        fn on_event(&self, event: &Event) {
            match event {
                Event::RuleAdded { .. } => self.added.fetch_add(1, Ordering::SeqCst),
                Event::RuleRemoved { .. } => self.removed.fetch_add(1, Ordering::SeqCst),
                Event::Cleared => self.cleared.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
        }
    }

    #[test]
    fn duplicate_add_is_silent_and_emits_once() {
        let counter = Arc::new(Counter::default());
        let mut table = RuleTable::new("p");
        table.subscribe(counter.clone());

        assert!(table.add(&rule(&["alice", "data1", "read"])));
        assert!(!table.add(&rule(&["alice", "data1", "read"])));
        assert_eq!(table.len(), 1);
        assert_eq!(counter.added.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn absent_remove_emits_nothing() {
        let counter = Arc::new(Counter::default());
        let mut table = RuleTable::new("p");
        table.subscribe(counter.clone());

        assert!(!table.remove(&rule(&["ghost", "data", "read"])));
        assert_eq!(counter.removed.load(Ordering::SeqCst), 0);

        table.add(&rule(&["alice", "data1", "read"]));
        assert!(table.remove(&rule(&["alice", "data1", "read"])));
        assert_eq!(counter.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn token_boundaries_affect_identity() {
        let mut table = RuleTable::new("p");
        assert!(table.add(&rule(&["ab", "c"])));
        assert!(table.add(&rule(&["a", "bc"])));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn range_stops_on_false() {
        let mut table = RuleTable::new("p");
        table.add(&rule(&["a"]));
        table.add(&rule(&["b"]));
        table.add(&rule(&["c"]));

        let mut seen = 0;
        table.range(&mut |_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn distinct_projection() {
        let mut table = RuleTable::new("p");
        table.add(&rule(&["alice", "data1", "read"]));
        table.add(&rule(&["alice", "data2", "read"]));
        table.add(&rule(&["bob", "data1", "write"]));

        let subjects = table.get_distinct(&[0]).unwrap();
        assert_eq!(subjects.len(), 2);
        assert!(table.get_distinct(&[7]).is_err());
    }

    #[test]
    fn clear_emits() {
        let counter = Arc::new(Counter::default());
        let mut table = RuleTable::new("g");
        table.subscribe(counter.clone());
        table.add(&rule(&["alice", "admin"]));
        table.clear();
        assert!(table.is_empty());
        assert_eq!(counter.cleared.load(Ordering::SeqCst), 1);
    }
}
