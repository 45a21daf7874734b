//! Matcher definitions and the rule-iteration driver.
//!
//! A matcher is compiled once per model. At enforcement time the driver
//! binds `r.*` to the request tuple, then walks the matcher's policy
//! table binding `p.*` to each rule and evaluating the expression;
//! rules evaluating to true are handed to the visitor. The first
//! evaluation error aborts the walk; rules are never silently skipped.

use super::defs::{PolicyDef, RequestDef};
use super::table::RuleTable;
use crate::error::{EnforceError, Result};
use crate::expr::{Expression, FunctionResolver, Value, VarResolver};

fn is_def_root(prefix: char, s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some(prefix) && chars.all(|c| c.is_ascii_digit())
}

/// A compiled matcher (`m`, `m2`, ...)
#[derive(Debug, Clone)]
pub struct MatcherDef {
    key: String,
    expr: Expression,
    policy_key: String,
    request_key: String,
    uses_request: bool,
}

impl MatcherDef {
    /// Compile a matcher expression and resolve which policy and
    /// request definitions it refers to.
    ///
    /// # Errors
    ///
    /// Fails on a syntax error, or with a matcher-misconfigured error
    /// when the expression references no policy definition or more
    /// than one of either kind.
    pub fn compile(key: &str, source: &str) -> Result<Self> {
        let expr = Expression::parse(source)?;
        let roots = expr.roots();

        let policy_roots: Vec<&String> =
            roots.iter().filter(|r| is_def_root('p', r)).collect();
        let request_roots: Vec<&String> =
            roots.iter().filter(|r| is_def_root('r', r)).collect();

        let policy_key = match policy_roots.as_slice() {
            [only] => (*only).clone(),
            [] => {
                return Err(EnforceError::MatcherMisconfigured(format!(
                    "matcher `{key}` references no policy definition"
                )))
            }
            _ => {
                return Err(EnforceError::MatcherMisconfigured(format!(
                    "matcher `{key}` references more than one policy definition"
                )))
            }
        };

        let (request_key, uses_request) = match request_roots.as_slice() {
            [only] => ((*only).clone(), true),
            [] => ("r".to_string(), false),
            _ => {
                return Err(EnforceError::MatcherMisconfigured(format!(
                    "matcher `{key}` references more than one request definition"
                )))
            }
        };

        Ok(Self {
            key: key.to_string(),
            expr,
            policy_key,
            request_key,
            uses_request,
        })
    }

    /// The definition key (`m`, `m2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The matcher's source expression
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.expr.as_str()
    }

    /// Key of the policy definition this matcher selects
    #[must_use]
    pub fn policy_key(&self) -> &str {
        &self.policy_key
    }

    /// Key of the request definition this matcher binds, `r` if none
    #[must_use]
    pub fn request_key(&self) -> &str {
        &self.request_key
    }

    /// True if the expression references request attributes
    #[must_use]
    pub fn uses_request(&self) -> bool {
        self.uses_request
    }
}

/// Variable bindings for one rule evaluation
struct RuleScope<'a> {
    request_key: &'a str,
    request_def: Option<&'a RequestDef>,
    rvals: &'a [Value],
    policy_key: &'a str,
    policy_def: &'a PolicyDef,
    tokens: &'a [String],
}

impl VarResolver for RuleScope<'_> {
    fn resolve(&self, root: &str, attr: &str) -> Result<Value> {
        if root == self.request_key {
            let def = self.request_def.ok_or_else(|| {
                EnforceError::expr(format!("no request definition for `{root}`"))
            })?;
            let index = def.attr_index(attr).ok_or_else(|| {
                EnforceError::expr(format!("unknown request attribute `{root}.{attr}`"))
            })?;
            return self.rvals.get(index).cloned().ok_or_else(|| {
                EnforceError::expr(format!("request tuple has no value for `{root}.{attr}`"))
            });
        }

        if root == self.policy_key {
            let index = self.policy_def.attr_index(attr).ok_or_else(|| {
                EnforceError::expr(format!("unknown policy attribute `{root}.{attr}`"))
            })?;
            return match self.tokens.get(index) {
                Some(token) => Ok(Value::Str(token.clone())),
                // The eft column may be omitted per rule.
                None if attr == "eft" => Ok(Value::Str("allow".to_string())),
                None => Err(EnforceError::expr(format!(
                    "rule has no token for `{root}.{attr}`"
                ))),
            };
        }

        Err(EnforceError::expr(format!("undefined symbol `{root}`")))
    }
}

/// Walk `table`, invoking the visitor for every rule the matcher
/// accepts; the visitor returning false stops the walk early.
pub(crate) fn range_matches(
    matcher: &MatcherDef,
    request_def: Option<&RequestDef>,
    policy_def: &PolicyDef,
    table: &RuleTable,
    rvals: &[Value],
    funcs: &dyn FunctionResolver,
    visitor: &mut dyn FnMut(&[String]) -> bool,
) -> Result<()> {
    if let Some(def) = request_def {
        if matcher.uses_request && rvals.len() != def.attrs().len() {
            return Err(EnforceError::shape(format!(
                "request has {} values, definition `{}` expects {}",
                rvals.len(),
                def.key(),
                def.attrs().len()
            )));
        }
    }

    let mut first_err: Option<EnforceError> = None;
    table.range(&mut |tokens| {
        let scope = RuleScope {
            request_key: matcher.request_key(),
            request_def,
            rvals,
            policy_key: matcher.policy_key(),
            policy_def,
            tokens,
        };
        match matcher.expr.eval(&scope, funcs).and_then(|v| v.as_bool()) {
            Ok(true) => visitor(tokens),
            Ok(false) => true,
            Err(err) => {
                first_err = Some(err);
                false
            }
        }
    });

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
