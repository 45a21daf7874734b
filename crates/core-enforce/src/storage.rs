//! Storage adapter contract and the write-through controller.
//!
//! Adapters persist rules outside the engine. The
//! [`StorageController`] subscribes to the model's rule tables,
//! buffers mutations, and pushes them through the adapter on
//! [`StorageController::flush`]; with autosave enabled the enforcer
//! flushes after every mutating call.

use crate::error::{EnforceError, Result};
use crate::event::{Event, EventSink};
use crate::model::Model;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Receives rules during [`Adapter::load_policy`]
pub trait RuleSink {
    /// Insert one full rule (definition key first)
    ///
    /// # Errors
    ///
    /// Propagates model-shape failures for malformed rules.
    fn add_rule(&mut self, rule: &[String]) -> Result<bool>;
}

impl RuleSink for Model {
    fn add_rule(&mut self, rule: &[String]) -> Result<bool> {
        Model::add_rule(self, rule)
    }
}

/// Yields rules during [`Adapter::save_policy`]
pub trait RuleSource {
    /// Visit every stored rule with its definition key prefixed
    fn range_rules(&self, visitor: &mut dyn FnMut(&str, &[String]) -> bool);
}

impl RuleSource for Model {
    fn range_rules(&self, visitor: &mut dyn FnMut(&str, &[String]) -> bool) {
        Model::range_rules(self, visitor)
    }
}

/// External rule storage
pub trait Adapter: Send + Sync {
    /// Feed every stored rule into the sink
    ///
    /// # Errors
    ///
    /// Propagates storage failures; the sink may be partially filled.
    fn load_policy(&self, sink: &mut dyn RuleSink) -> Result<()>;

    /// Persist every rule the source yields, replacing prior contents
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    fn save_policy(&self, source: &dyn RuleSource) -> Result<()>;

    /// Persist one added rule (definition key first)
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    fn add_policy(&self, rule: &[String]) -> Result<()>;

    /// Remove one persisted rule (definition key first)
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    fn remove_policy(&self, rule: &[String]) -> Result<()>;
}

/// Adapter used when an enforcer has no storage; every operation
/// reports [`EnforceError::NotSupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapter;

impl Adapter for NoopAdapter {
    fn load_policy(&self, _sink: &mut dyn RuleSink) -> Result<()> {
        Err(EnforceError::NotSupported)
    }

    fn save_policy(&self, _source: &dyn RuleSource) -> Result<()> {
        Err(EnforceError::NotSupported)
    }

    fn add_policy(&self, _rule: &[String]) -> Result<()> {
        Err(EnforceError::NotSupported)
    }

    fn remove_policy(&self, _rule: &[String]) -> Result<()> {
        Err(EnforceError::NotSupported)
    }
}

enum PendingOp {
    Add(Vec<String>),
    Remove(Vec<String>),
}

#[derive(Default)]
struct PendingState {
    ops: VecDeque<PendingOp>,
    full_resave: bool,
}

/// Buffers rule mutations and replays them through the adapter
pub struct StorageController {
    adapter: Box<dyn Adapter>,
    enabled: AtomicBool,
    autosave: AtomicBool,
    pending: Mutex<PendingState>,
}

impl std::fmt::Debug for StorageController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageController")
            .field("enabled", &self.enabled())
            .field("autosave", &self.autosave())
            .finish()
    }
}

impl StorageController {
    /// Wrap an adapter; autosave starts disabled
    #[must_use]
    pub fn new(adapter: Box<dyn Adapter>, enabled: bool) -> Self {
        Self {
            adapter,
            enabled: AtomicBool::new(enabled),
            autosave: AtomicBool::new(false),
            pending: Mutex::new(PendingState::default()),
        }
    }

    /// True while the controller tracks rule events
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Start or stop tracking rule events
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// True when every mutation is persisted immediately
    #[must_use]
    pub fn autosave(&self) -> bool {
        self.autosave.load(Ordering::SeqCst)
    }

    /// Toggle immediate persistence
    pub fn set_autosave(&self, autosave: bool) {
        self.autosave.store(autosave, Ordering::SeqCst);
    }

    /// True if buffered mutations await a flush
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|state| state.full_resave || !state.ops.is_empty())
            .unwrap_or(false)
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, PendingState>> {
        self.pending
            .lock()
            .map_err(|_| EnforceError::Adapter("storage state poisoned".to_string()))
    }

    /// Push buffered mutations through the adapter. A buffered clear
    /// turns the flush into a full re-save of `source`. Unapplied
    /// operations stay buffered when the adapter fails.
    ///
    /// # Errors
    ///
    /// Propagates the first adapter failure.
    pub fn flush(&self, source: &dyn RuleSource) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let mut state = self.state()?;

        if state.full_resave {
            self.adapter.save_policy(source)?;
            state.full_resave = false;
            state.ops.clear();
            return Ok(());
        }

        while let Some(op) = state.ops.front() {
            match op {
                PendingOp::Add(rule) => self.adapter.add_policy(rule)?,
                PendingOp::Remove(rule) => self.adapter.remove_policy(rule)?,
            }
            state.ops.pop_front();
        }
        debug!("storage flush complete");
        Ok(())
    }

    /// Flush if the controller is enabled and autosave is on
    pub(crate) fn commit(&self, source: &dyn RuleSource) -> Result<()> {
        if self.enabled() && self.autosave() {
            self.flush(source)
        } else {
            Ok(())
        }
    }

    /// Load all rules from the adapter into the sink
    pub(crate) fn load_into(&self, sink: &mut dyn RuleSink) -> Result<()> {
        self.adapter.load_policy(sink)
    }

    /// Persist all rules and drop the buffer
    pub(crate) fn save_from(&self, source: &dyn RuleSource) -> Result<()> {
        self.adapter.save_policy(source)?;
        let mut state = self.state()?;
        state.ops.clear();
        state.full_resave = false;
        Ok(())
    }
}

impl EventSink for StorageController {
    fn on_event(&self, event: &Event) {
        if !self.enabled() {
            return;
        }
        let Ok(mut state) = self.pending.lock() else {
            return;
        };
        match event {
            Event::RuleAdded { key, rule } => {
                state.ops.push_back(PendingOp::Add(full_rule(key, rule)));
            }
            Event::RuleRemoved { key, rule } => {
                state.ops.push_back(PendingOp::Remove(full_rule(key, rule)));
            }
            Event::Cleared => {
                state.ops.clear();
                state.full_resave = true;
            }
            Event::Saved | Event::Loaded => {}
        }
    }
}

fn full_rule(key: &str, tokens: &[String]) -> Vec<String> {
    let mut rule = Vec::with_capacity(tokens.len() + 1);
    rule.push(key.to_string());
    rule.extend_from_slice(tokens);
    rule
}
