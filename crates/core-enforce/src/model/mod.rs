//! The policy model: typed section definitions plus their rule tables.
//!
//! A model is constructed once (normally by an external configuration
//! parser calling [`Model::add_def`]), then mutated through
//! [`Model::add_rule`] / [`Model::remove_rule`]. Role-definition rules
//! are mirrored into the definition's role manager as inheritance
//! links.

mod defs;
mod matcher;
mod table;

pub use defs::{EffectDef, PolicyDef, RequestDef, RoleDef};
pub use matcher::MatcherDef;
pub use table::RuleTable;

use crate::error::{EnforceError, Result};
use crate::event::SharedSink;
use crate::expr::{FunctionResolver, Value};
use crate::rbac::{DefaultRoleManager, RoleManager};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Section name for request definitions
pub const REQUEST_SECTION: &str = "request_definition";
/// Section name for policy definitions
pub const POLICY_SECTION: &str = "policy_definition";
/// Section name for role definitions
pub const ROLE_SECTION: &str = "role_definition";
/// Section name for effect declarations
pub const EFFECT_SECTION: &str = "policy_effect";
/// Section name for matchers
pub const MATCHER_SECTION: &str = "matcher";

/// A policy definition together with its rule table
#[derive(Debug)]
pub struct PolicySection {
    def: PolicyDef,
    table: RuleTable,
}

impl PolicySection {
    /// The policy definition
    #[must_use]
    pub fn def(&self) -> &PolicyDef {
        &self.def
    }

    /// The rule table
    #[must_use]
    pub fn table(&self) -> &RuleTable {
        &self.table
    }
}

/// A role definition, its link table and the role manager mirroring it
pub struct RoleSection {
    def: RoleDef,
    table: RuleTable,
    manager: Arc<dyn RoleManager>,
}

impl std::fmt::Debug for RoleSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleSection")
            .field("def", &self.def)
            .field("table", &self.table)
            .finish()
    }
}

impl RoleSection {
    /// The role definition
    #[must_use]
    pub fn def(&self) -> &RoleDef {
        &self.def
    }

    /// The link table
    #[must_use]
    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// The role manager answering `g`-function calls
    #[must_use]
    pub fn manager(&self) -> Arc<dyn RoleManager> {
        Arc::clone(&self.manager)
    }
}

fn valid_key(prefix: char, key: &str) -> bool {
    let mut chars = key.chars();
    chars.next() == Some(prefix) && chars.all(|c| c.is_ascii_digit())
}

fn check_key(section: &str, prefix: char, key: &str) -> Result<()> {
    if valid_key(prefix, key) {
        Ok(())
    } else {
        Err(EnforceError::ModelParse(format!(
            "invalid key `{key}` for section {section}"
        )))
    }
}

/// The model: definitions and rule tables for every section
#[derive(Debug, Default)]
pub struct Model {
    requests: HashMap<String, RequestDef>,
    policies: HashMap<String, PolicySection>,
    roles: HashMap<String, RoleSection>,
    effects: HashMap<String, EffectDef>,
    matchers: HashMap<String, MatcherDef>,
}

impl Model {
    /// Create an empty model
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one definition line (`section`, `key`, raw value).
    ///
    /// # Errors
    ///
    /// Fails on an unknown section, a key that does not fit the
    /// section's prefix, a duplicate key, or a malformed value.
    pub fn add_def(&mut self, section: &str, key: &str, value: &str) -> Result<()> {
        match section {
            REQUEST_SECTION => {
                check_key(section, 'r', key)?;
                self.reject_duplicate(self.requests.contains_key(key), key)?;
                self.requests
                    .insert(key.to_string(), RequestDef::parse(key, value)?);
            }
            POLICY_SECTION => {
                check_key(section, 'p', key)?;
                self.reject_duplicate(self.policies.contains_key(key), key)?;
                self.policies.insert(
                    key.to_string(),
                    PolicySection {
                        def: PolicyDef::parse(key, value)?,
                        table: RuleTable::new(key),
                    },
                );
            }
            ROLE_SECTION => {
                check_key(section, 'g', key)?;
                self.reject_duplicate(self.roles.contains_key(key), key)?;
                self.roles.insert(
                    key.to_string(),
                    RoleSection {
                        def: RoleDef::parse(key, value)?,
                        table: RuleTable::new(key),
                        manager: Arc::new(DefaultRoleManager::default()),
                    },
                );
            }
            EFFECT_SECTION => {
                check_key(section, 'e', key)?;
                self.reject_duplicate(self.effects.contains_key(key), key)?;
                self.effects
                    .insert(key.to_string(), EffectDef::parse(key, value)?);
            }
            MATCHER_SECTION => {
                check_key(section, 'm', key)?;
                self.reject_duplicate(self.matchers.contains_key(key), key)?;
                self.matchers
                    .insert(key.to_string(), MatcherDef::compile(key, value)?);
            }
            other => {
                return Err(EnforceError::ModelParse(format!(
                    "unknown section `{other}`"
                )))
            }
        }
        Ok(())
    }

    fn reject_duplicate(&self, exists: bool, key: &str) -> Result<()> {
        if exists {
            return Err(EnforceError::ModelParse(format!(
                "duplicate definition key `{key}`"
            )));
        }
        Ok(())
    }

    /// Request definition by key
    #[must_use]
    pub fn request_def(&self, key: &str) -> Option<&RequestDef> {
        self.requests.get(key)
    }

    /// Policy section by key
    #[must_use]
    pub fn policy(&self, key: &str) -> Option<&PolicySection> {
        self.policies.get(key)
    }

    /// Role section by key
    #[must_use]
    pub fn role(&self, key: &str) -> Option<&RoleSection> {
        self.roles.get(key)
    }

    /// Keys of all role sections
    pub fn role_keys(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    /// Effect declaration by key
    #[must_use]
    pub fn effect(&self, key: &str) -> Option<&EffectDef> {
        self.effects.get(key)
    }

    /// Mutable effect declaration, for installing a custom effector
    #[must_use]
    pub fn effect_mut(&mut self, key: &str) -> Option<&mut EffectDef> {
        self.effects.get_mut(key)
    }

    /// Matcher by key
    #[must_use]
    pub fn matcher(&self, key: &str) -> Option<&MatcherDef> {
        self.matchers.get(key)
    }

    /// Role manager of a role definition
    #[must_use]
    pub fn role_manager(&self, key: &str) -> Option<Arc<dyn RoleManager>> {
        self.roles.get(key).map(RoleSection::manager)
    }

    /// Replace a role definition's manager and rebuild it from the
    /// definition's link table.
    ///
    /// # Errors
    ///
    /// Fails when `key` names no role definition.
    pub fn set_role_manager(&mut self, key: &str, manager: Arc<dyn RoleManager>) -> Result<()> {
        let section = self
            .roles
            .get_mut(key)
            .ok_or_else(|| EnforceError::shape(format!("unknown role definition `{key}`")))?;
        manager.clear();
        section.table.range(&mut |tokens| {
            if tokens.len() >= 2 {
                manager.add_link(&tokens[0], &tokens[1], tokens.get(2).map(String::as_str));
            }
            true
        });
        section.manager = manager;
        Ok(())
    }

    /// Register an event sink on every rule table.
    ///
    /// Call after all definitions were added; tables created later will
    /// not see the sink.
    pub fn subscribe(&mut self, sink: SharedSink) {
        for section in self.policies.values_mut() {
            section.table.subscribe(Arc::clone(&sink));
        }
        for section in self.roles.values_mut() {
            section.table.subscribe(Arc::clone(&sink));
        }
    }

    /// Insert a rule; the first token selects the definition key.
    /// Returns false when an identical rule was already present.
    ///
    /// # Errors
    ///
    /// Fails on an unknown key or a token count that does not fit the
    /// definition.
    pub fn add_rule(&mut self, rule: &[String]) -> Result<bool> {
        let (key, tokens) = rule
            .split_first()
            .ok_or_else(|| EnforceError::shape("empty rule"))?;

        if let Some(section) = self.policies.get_mut(key) {
            if !section.def.valid_arity(tokens.len()) {
                return Err(EnforceError::shape(format!(
                    "`{key}` rule has {} tokens, definition expects {}",
                    tokens.len(),
                    section.def.attrs().len()
                )));
            }
            return Ok(section.table.add(tokens));
        }

        if let Some(section) = self.roles.get_mut(key) {
            if tokens.len() != section.def.arity() {
                return Err(EnforceError::shape(format!(
                    "`{key}` rule has {} tokens, definition expects {}",
                    tokens.len(),
                    section.def.arity()
                )));
            }
            let added = section.table.add(tokens);
            if added {
                section.manager.add_link(
                    &tokens[0],
                    &tokens[1],
                    tokens.get(2).map(String::as_str),
                );
                debug!(key = %key, user = %tokens[0], role = %tokens[1], "role link added");
            }
            return Ok(added);
        }

        Err(EnforceError::shape(format!("unknown definition key `{key}`")))
    }

    /// Delete a rule; returns false when it was not present.
    ///
    /// # Errors
    ///
    /// Fails on an unknown key.
    pub fn remove_rule(&mut self, rule: &[String]) -> Result<bool> {
        let (key, tokens) = rule
            .split_first()
            .ok_or_else(|| EnforceError::shape("empty rule"))?;

        if let Some(section) = self.policies.get_mut(key) {
            return Ok(section.table.remove(tokens));
        }

        if let Some(section) = self.roles.get_mut(key) {
            let removed = section.table.remove(tokens);
            if removed && tokens.len() >= 2 {
                section.manager.delete_link(
                    &tokens[0],
                    &tokens[1],
                    tokens.get(2).map(String::as_str),
                );
                debug!(key = %key, user = %tokens[0], role = %tokens[1], "role link removed");
            }
            return Ok(removed);
        }

        Err(EnforceError::shape(format!("unknown definition key `{key}`")))
    }

    /// Drop every stored rule and reset the role managers; definitions
    /// survive.
    pub fn clear_rules(&mut self) {
        for section in self.policies.values_mut() {
            section.table.clear();
        }
        for section in self.roles.values_mut() {
            section.table.clear();
            section.manager.clear();
        }
    }

    /// Visit every stored rule with its definition key prefixed, policy
    /// tables first, in key order; stop when the visitor returns false.
    pub fn range_rules(&self, visitor: &mut dyn FnMut(&str, &[String]) -> bool) {
        let mut stop = false;
        let mut keys: Vec<&String> = self.policies.keys().collect();
        keys.sort();
        for key in keys {
            if stop {
                return;
            }
            if let Some(section) = self.policies.get(key) {
                section.table.range(&mut |tokens| {
                    stop = !visitor(key, tokens);
                    !stop
                });
            }
        }
        let mut keys: Vec<&String> = self.roles.keys().collect();
        keys.sort();
        for key in keys {
            if stop {
                return;
            }
            if let Some(section) = self.roles.get(key) {
                section.table.range(&mut |tokens| {
                    stop = !visitor(key, tokens);
                    !stop
                });
            }
        }
    }

    /// Distinct projection of a table over column indices
    ///
    /// # Errors
    ///
    /// Fails on an unknown key or out-of-range columns.
    pub fn get_distinct(&self, key: &str, columns: &[usize]) -> Result<Vec<Vec<String>>> {
        if let Some(section) = self.policies.get(key) {
            return section.table.get_distinct(columns);
        }
        if let Some(section) = self.roles.get(key) {
            return section.table.get_distinct(columns);
        }
        Err(EnforceError::shape(format!("unknown definition key `{key}`")))
    }

    /// Drive `matcher` over its policy table; see the module docs of
    /// [`crate::model`] for binding rules.
    pub(crate) fn range_matches(
        &self,
        matcher: &MatcherDef,
        rvals: &[Value],
        funcs: &dyn FunctionResolver,
        visitor: &mut dyn FnMut(&[String]) -> bool,
    ) -> Result<()> {
        let section = self.policies.get(matcher.policy_key()).ok_or_else(|| {
            EnforceError::MatcherMisconfigured(format!(
                "matcher `{}` references unknown policy definition `{}`",
                matcher.key(),
                matcher.policy_key()
            ))
        })?;

        let request_def = self.requests.get(matcher.request_key());
        if matcher.uses_request() && request_def.is_none() {
            return Err(EnforceError::MatcherMisconfigured(format!(
                "matcher `{}` references unknown request definition `{}`",
                matcher.key(),
                matcher.request_key()
            )));
        }

        matcher::range_matches(
            matcher,
            request_def,
            section.def(),
            section.table(),
            rvals,
            funcs,
            visitor,
        )
    }
}
