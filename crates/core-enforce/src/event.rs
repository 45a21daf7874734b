//! Rule-change events published by the model's rule tables.
//!
//! Each rule table notifies its registered sinks after a successful
//! mutation; the enforcer additionally publishes `Saved` / `Loaded`
//! after adapter round-trips. Sinks must be cheap and must not call
//! back into the table that raised the event.

use std::sync::Arc;

/// A change notification raised by a rule table or the enforcer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A rule was inserted; `key` is the definition key (`p`, `g`, ...)
    /// and `rule` the stored tokens without the key
    RuleAdded {
        /// Definition key of the owning table
        key: String,
        /// Rule tokens, key excluded
        rule: Vec<String>,
    },
    /// A rule was deleted
    RuleRemoved {
        /// Definition key of the owning table
        key: String,
        /// Rule tokens, key excluded
        rule: Vec<String>,
    },
    /// A whole table was emptied
    Cleared,
    /// All rules were persisted through the adapter
    Saved,
    /// All rules were loaded through the adapter
    Loaded,
}

/// Receiver of [`Event`] notifications
pub trait EventSink: Send + Sync {
    /// Called synchronously after the mutation took effect
    fn on_event(&self, event: &Event);
}

/// Shared handle to an event sink
pub type SharedSink = Arc<dyn EventSink>;
