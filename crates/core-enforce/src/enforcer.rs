//! The enforcer facade: model + functions + storage, behind
//! `enforce` / `filter` and rule CRUD.

use crate::effect::{Decision, EffectStream, Effector, Verdict};
use crate::error::{EnforceError, Result};
use crate::event::{Event, EventSink, SharedSink};
use crate::expr::{FunctionResolver, Value};
use crate::functions::{Function, FunctionMap};
use crate::model::{MatcherDef, Model};
use crate::rbac::RoleManager;
use crate::storage::{Adapter, NoopAdapter, StorageController};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-call selection of matcher and effector.
///
/// The default context uses the `m` matcher and the `e` effect
/// declaration; overrides select other keys or supply an ad-hoc
/// matcher expression.
///
/// ```
/// use core_enforce::EnforceContext;
///
/// let ctx = EnforceContext::new().matcher("m2").effect("e2");
/// # let _ = ctx;
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnforceContext {
    matcher_key: Option<String>,
    effect_key: Option<String>,
    inline_matcher: Option<MatcherDef>,
}

impl EnforceContext {
    /// Context with the default `m` / `e` selection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a matcher definition by key
    #[must_use]
    pub fn matcher(mut self, key: impl Into<String>) -> Self {
        self.matcher_key = Some(key.into());
        self
    }

    /// Select an effect declaration by key
    #[must_use]
    pub fn effect(mut self, key: impl Into<String>) -> Self {
        self.effect_key = Some(key.into());
        self
    }

    /// Use an ad-hoc matcher expression instead of a model matcher;
    /// useful for filtering (`p.sub == "alice"`).
    ///
    /// # Errors
    ///
    /// Fails when the expression does not compile.
    pub fn matcher_expr(mut self, expr: &str) -> Result<Self> {
        self.inline_matcher = Some(MatcherDef::compile("inline", expr)?);
        Ok(self)
    }

    fn effect_key(&self) -> &str {
        self.effect_key.as_deref().unwrap_or("e")
    }

    fn matcher_key(&self) -> &str {
        self.matcher_key.as_deref().unwrap_or("m")
    }
}

/// Resolver layering per-call role functions over the enforcer's map
/// (which itself falls back to the process-wide registry).
struct EnforceFunctions<'a> {
    role_fns: HashMap<String, Function>,
    base: &'a FunctionMap,
}

impl FunctionResolver for EnforceFunctions<'_> {
    fn lookup(&self, name: &str) -> Option<Function> {
        self.role_fns
            .get(name)
            .map(Arc::clone)
            .or_else(|| self.base.lookup(name))
    }
}

fn role_function(key: String, manager: Arc<dyn RoleManager>) -> Function {
    Arc::new(move |args: &[Value]| {
        let mut names = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Value::Str(s) => names.push(s.as_str()),
                other => {
                    return Err(EnforceError::expr(format!(
                        "{key} expects string arguments, got {}",
                        other.kind()
                    )))
                }
            }
        }
        match names.as_slice() {
            [a, b] => Ok(Value::Bool(manager.has_link(a, b, None))),
            [a, b, domain] => Ok(Value::Bool(manager.has_link(a, b, Some(domain)))),
            _ => Err(EnforceError::expr(format!(
                "{key} expects 2 or 3 arguments, got {}",
                names.len()
            ))),
        }
    })
}

/// The main entry point: decides requests against the model
pub struct Enforcer {
    model: Model,
    functions: FunctionMap,
    sc: Arc<StorageController>,
    sinks: Vec<SharedSink>,
}

impl std::fmt::Debug for Enforcer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enforcer")
            .field("model", &self.model)
            .field("storage", &self.sc)
            .finish()
    }
}

impl Enforcer {
    /// Create an enforcer over a fully defined model. Without an
    /// adapter, storage is disabled and save/load report not-supported.
    ///
    /// The rule set is not loaded implicitly; call
    /// [`Enforcer::load_policy`] when the adapter holds rules.
    #[must_use]
    pub fn new(model: Model, adapter: Option<Box<dyn Adapter>>) -> Self {
        Self::with_functions(model, adapter, FunctionMap::with_builtins())
    }

    /// Like [`Enforcer::new`] with a caller-supplied function registry
    #[must_use]
    pub fn with_functions(
        mut model: Model,
        adapter: Option<Box<dyn Adapter>>,
        functions: FunctionMap,
    ) -> Self {
        let enabled = adapter.is_some();
        let adapter = adapter.unwrap_or_else(|| Box::new(NoopAdapter));
        let sc = Arc::new(StorageController::new(adapter, enabled));
        model.subscribe(Arc::clone(&sc) as SharedSink);
        Self {
            model,
            functions,
            sc,
            sinks: Vec::new(),
        }
    }

    /// The model under enforcement
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mutable access to the model
    #[must_use]
    pub fn model_mut(&mut self) -> &mut Model {
        &mut self.model
    }

    /// The per-enforcer function registry
    #[must_use]
    pub fn functions_mut(&mut self) -> &mut FunctionMap {
        &mut self.functions
    }

    /// The storage controller
    #[must_use]
    pub fn storage(&self) -> &StorageController {
        &self.sc
    }

    /// Persist every mutation as it happens
    pub fn set_autosave(&self, autosave: bool) {
        self.sc.set_autosave(autosave);
    }

    /// Replace the storage adapter; the previous controller is
    /// disabled and its buffer dropped.
    pub fn set_adapter(&mut self, adapter: Box<dyn Adapter>) {
        let autosave = self.sc.autosave();
        self.sc.set_enabled(false);
        let sc = Arc::new(StorageController::new(adapter, true));
        sc.set_autosave(autosave);
        self.model.subscribe(Arc::clone(&sc) as SharedSink);
        self.sc = sc;
    }

    /// Replace a role definition's manager (e.g. to install one with a
    /// pattern matcher) and rebuild it from the link table.
    ///
    /// # Errors
    ///
    /// Fails when `key` names no role definition.
    pub fn set_role_manager(
        &mut self,
        key: &str,
        manager: Arc<dyn RoleManager>,
    ) -> Result<()> {
        self.model.set_role_manager(key, manager)
    }

    /// Register an event sink for rule changes and save/load events
    pub fn subscribe(&mut self, sink: SharedSink) {
        self.model.subscribe(Arc::clone(&sink));
        self.sinks.push(sink);
    }

    fn notify(&self, event: &Event) {
        for sink in &self.sinks {
            sink.on_event(event);
        }
    }

    fn eval_functions(&self) -> EnforceFunctions<'_> {
        let mut role_fns = HashMap::new();
        for key in self.model.role_keys() {
            if let Some(manager) = self.model.role_manager(key) {
                role_fns.insert(key.to_string(), role_function(key.to_string(), manager));
            }
        }
        EnforceFunctions {
            role_fns,
            base: &self.functions,
        }
    }

    fn resolve_matcher<'a>(&'a self, ctx: &'a EnforceContext) -> Result<&'a MatcherDef> {
        if let Some(inline) = &ctx.inline_matcher {
            return Ok(inline);
        }
        self.model.matcher(ctx.matcher_key()).ok_or_else(|| {
            EnforceError::MatcherMisconfigured(format!(
                "unknown matcher key `{}`",
                ctx.matcher_key()
            ))
        })
    }

    /// Decide a request with the default context
    ///
    /// # Errors
    ///
    /// Fails on a misconfigured matcher or an expression evaluation
    /// error; a clean "no" is `Ok(false)`.
    pub fn enforce(&self, rvals: &[Value]) -> Result<bool> {
        self.enforce_with(&EnforceContext::default(), rvals)
    }

    /// Decide a request under an explicit context
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`].
    pub fn enforce_with(&self, ctx: &EnforceContext, rvals: &[Value]) -> Result<bool> {
        let matcher = self.resolve_matcher(ctx)?;
        let effect = self.model.effect(ctx.effect_key()).ok_or_else(|| {
            EnforceError::shape(format!("unknown effect key `{}`", ctx.effect_key()))
        })?;
        let policy_def = self
            .model
            .policy(matcher.policy_key())
            .ok_or_else(|| {
                EnforceError::MatcherMisconfigured(format!(
                    "matcher `{}` references unknown policy definition `{}`",
                    matcher.key(),
                    matcher.policy_key()
                ))
            })?
            .def();

        let funcs = self.eval_functions();
        let mut stream = effect.effector().start();
        let mut decision: Option<Decision> = None;

        self.model
            .range_matches(matcher, rvals, &funcs, &mut |tokens| {
                match stream.push(policy_def.eft(tokens)) {
                    Verdict::Continue => true,
                    Verdict::Decide(d) => {
                        decision = Some(d);
                        false
                    }
                }
            })?;

        let decision = decision.unwrap_or_else(|| stream.conclude());
        debug!(matcher = matcher.key(), ?decision, "enforce");
        Ok(decision == Decision::Allow)
    }

    /// All rules matching a request, effects ignored. Returned rules
    /// carry their definition key as first token.
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`].
    pub fn filter(&self, rvals: &[Value]) -> Result<Vec<Vec<String>>> {
        self.filter_with(&EnforceContext::default(), rvals)
    }

    /// [`Enforcer::filter`] under an explicit context
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`].
    pub fn filter_with(
        &self,
        ctx: &EnforceContext,
        rvals: &[Value],
    ) -> Result<Vec<Vec<String>>> {
        let matcher = self.resolve_matcher(ctx)?;
        let key = matcher.policy_key().to_string();
        let mut rules = Vec::new();
        self.range_matches(ctx, rvals, |tokens| {
            let mut rule = Vec::with_capacity(tokens.len() + 1);
            rule.push(key.clone());
            rule.extend_from_slice(tokens);
            rules.push(rule);
            true
        })?;
        Ok(rules)
    }

    /// Stream matching rules to a visitor; return false to stop early
    ///
    /// # Errors
    ///
    /// See [`Enforcer::enforce`].
    pub fn range_matches(
        &self,
        ctx: &EnforceContext,
        rvals: &[Value],
        mut visitor: impl FnMut(&[String]) -> bool,
    ) -> Result<()> {
        let matcher = self.resolve_matcher(ctx)?;
        let funcs = self.eval_functions();
        self.model.range_matches(matcher, rvals, &funcs, &mut visitor)
    }

    /// Add a rule (definition key first); false if already present
    ///
    /// # Errors
    ///
    /// Fails on model-shape violations or, with autosave, on adapter
    /// failures (the rule stays buffered for a later flush).
    pub fn add_rule(&mut self, rule: &[String]) -> Result<bool> {
        let added = self.model.add_rule(rule)?;
        if added {
            self.sc.commit(&self.model)?;
        }
        Ok(added)
    }

    /// Remove a rule; false if absent
    ///
    /// # Errors
    ///
    /// See [`Enforcer::add_rule`].
    pub fn remove_rule(&mut self, rule: &[String]) -> Result<bool> {
        let removed = self.model.remove_rule(rule)?;
        if removed {
            self.sc.commit(&self.model)?;
        }
        Ok(removed)
    }

    /// Add many rules; autosave is suppressed for the batch and the
    /// buffer flushed once at the end.
    ///
    /// # Errors
    ///
    /// Stops at the first failing rule.
    pub fn add_rules<I, R>(&mut self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[String]>,
    {
        let autosave = self.sc.autosave();
        self.sc.set_autosave(false);
        let mut result = Ok(());
        for rule in rules {
            if let Err(err) = self.model.add_rule(rule.as_ref()) {
                result = Err(err);
                break;
            }
        }
        self.sc.set_autosave(autosave);
        result?;
        self.sc.commit(&self.model)
    }

    /// Remove many rules; see [`Enforcer::add_rules`]
    ///
    /// # Errors
    ///
    /// Stops at the first failing rule.
    pub fn remove_rules<I, R>(&mut self, rules: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[String]>,
    {
        let autosave = self.sc.autosave();
        self.sc.set_autosave(false);
        let mut result = Ok(());
        for rule in rules {
            if let Err(err) = self.model.remove_rule(rule.as_ref()) {
                result = Err(err);
                break;
            }
        }
        self.sc.set_autosave(autosave);
        result?;
        self.sc.commit(&self.model)
    }

    /// Load all rules from the adapter into the model. The model is
    /// not cleared first; storage tracking pauses during the load.
    ///
    /// # Errors
    ///
    /// Propagates adapter failures.
    pub fn load_policy(&mut self) -> Result<()> {
        let enabled = self.sc.enabled();
        self.sc.set_enabled(false);
        let sc = Arc::clone(&self.sc);
        let result = sc.load_into(&mut self.model);
        self.sc.set_enabled(enabled);
        result?;
        self.notify(&Event::Loaded);
        Ok(())
    }

    /// Persist all rules through the adapter
    ///
    /// # Errors
    ///
    /// Propagates adapter failures.
    pub fn save_policy(&self) -> Result<()> {
        self.sc.save_from(&self.model)?;
        self.notify(&Event::Saved);
        Ok(())
    }

    /// Push buffered rule changes through the adapter
    ///
    /// # Errors
    ///
    /// Propagates adapter failures.
    pub fn flush(&self) -> Result<()> {
        self.sc.flush(&self.model)
    }
}
