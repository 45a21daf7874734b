//! Typed definitions for the model's sections.
//!
//! A definition carries the ordered attribute names of its section key
//! (`r = sub, obj, act`) plus section-specific extras: policy
//! definitions know where their `eft` column sits, role definitions
//! know their column arity.

use crate::effect::{DefaultEffector, Effect, EffectKind, Effector};
use crate::error::{EnforceError, Result};
use std::collections::HashMap;
use std::sync::Arc;

fn split_attrs(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|attr| attr.trim().to_string())
        .filter(|attr| !attr.is_empty())
        .collect()
}

/// Ordered named attributes of a request tuple (`r`, `r2`, ...)
#[derive(Debug, Clone)]
pub struct RequestDef {
    key: String,
    attrs: Vec<String>,
    index: HashMap<String, usize>,
}

impl RequestDef {
    /// Parse `sub, obj, act` into a request definition
    ///
    /// # Errors
    ///
    /// Fails on an empty attribute list.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let attrs = split_attrs(value);
        if attrs.is_empty() {
            return Err(EnforceError::ModelParse(format!(
                "request definition `{key}` has no attributes"
            )));
        }
        let index = attrs
            .iter()
            .enumerate()
            .map(|(i, attr)| (attr.clone(), i))
            .collect();
        Ok(Self {
            key: key.to_string(),
            attrs,
            index,
        })
    }

    /// The definition key (`r`, `r2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ordered attribute names
    #[must_use]
    pub fn attrs(&self) -> &[String] {
        &self.attrs
    }

    /// Position of an attribute, if defined
    #[must_use]
    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Ordered named attributes of a policy rule (`p`, `p2`, ...)
///
/// The `eft` attribute is optional; rules may omit its column, which
/// defaults the effect to allow.
#[derive(Debug, Clone)]
pub struct PolicyDef {
    key: String,
    attrs: Vec<String>,
    index: HashMap<String, usize>,
    eft_index: Option<usize>,
}

impl PolicyDef {
    /// Parse `sub, obj, act, eft` into a policy definition
    ///
    /// # Errors
    ///
    /// Fails on an empty attribute list.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let attrs = split_attrs(value);
        if attrs.is_empty() {
            return Err(EnforceError::ModelParse(format!(
                "policy definition `{key}` has no attributes"
            )));
        }
        let index: HashMap<String, usize> = attrs
            .iter()
            .enumerate()
            .map(|(i, attr)| (attr.clone(), i))
            .collect();
        let eft_index = index.get("eft").copied();
        Ok(Self {
            key: key.to_string(),
            attrs,
            index,
            eft_index,
        })
    }

    /// The definition key (`p`, `p2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ordered attribute names
    #[must_use]
    pub fn attrs(&self) -> &[String] {
        &self.attrs
    }

    /// Position of an attribute, if defined
    #[must_use]
    pub fn attr_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// True if `len` is an acceptable token count for a rule: the full
    /// attribute count, or one less when the `eft` column is omitted.
    #[must_use]
    pub fn valid_arity(&self, len: usize) -> bool {
        len == self.attrs.len()
            || (self.eft_index.is_some() && len + 1 == self.attrs.len())
    }

    /// Effect of a rule, read from its `eft` column; a missing column
    /// or token defaults to allow.
    #[must_use]
    pub fn eft(&self, tokens: &[String]) -> Effect {
        match self.eft_index {
            Some(i) => tokens
                .get(i)
                .map_or(Effect::Allow, |token| Effect::from_token(token)),
            None => Effect::Allow,
        }
    }
}

/// A role-link relation (`g`, `g2`, ...): two positional columns for
/// user and role, plus an optional domain column.
#[derive(Debug, Clone)]
pub struct RoleDef {
    key: String,
    arity: usize,
}

impl RoleDef {
    /// Parse `_, _` or `_, _, _` into a role definition
    ///
    /// # Errors
    ///
    /// Fails unless the definition has exactly 2 or 3 columns.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let arity = split_attrs(value).len();
        if !(2..=3).contains(&arity) {
            return Err(EnforceError::ModelParse(format!(
                "role definition `{key}` must have 2 or 3 columns, got {arity}"
            )));
        }
        Ok(Self {
            key: key.to_string(),
            arity,
        })
    }

    /// The definition key (`g`, `g2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of columns (2 or 3)
    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// An effect-combination declaration (`e`, `e2`, ...)
#[derive(Clone)]
pub struct EffectDef {
    key: String,
    expr: String,
    effector: Arc<dyn Effector>,
}

impl std::fmt::Debug for EffectDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectDef")
            .field("key", &self.key)
            .field("expr", &self.expr)
            .finish()
    }
}

impl EffectDef {
    /// Parse a `policy_effect` expression
    ///
    /// # Errors
    ///
    /// Fails when the expression is not one of the recognised
    /// combination rules.
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        let kind = EffectKind::parse(value)?;
        Ok(Self {
            key: key.to_string(),
            expr: value.to_string(),
            effector: Arc::new(DefaultEffector::new(kind)),
        })
    }

    /// The definition key (`e`, `e2`, ...)
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The source expression
    #[must_use]
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The effector folding rule effects under this declaration
    #[must_use]
    pub fn effector(&self) -> Arc<dyn Effector> {
        Arc::clone(&self.effector)
    }

    /// Replace the effector (custom combination rules)
    pub fn set_effector(&mut self, effector: Arc<dyn Effector>) {
        self.effector = effector;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_def_indexing() {
        let def = RequestDef::parse("r", "sub, obj, act").unwrap();
        assert_eq!(def.key(), "r");
        assert_eq!(def.attr_index("obj"), Some(1));
        assert_eq!(def.attr_index("dom"), None);
    }

    #[test]
    fn policy_def_eft_defaults_to_allow() {
        let def = PolicyDef::parse("p", "sub, obj, act, eft").unwrap();
        let full = vec![
            "alice".to_string(),
            "data1".to_string(),
            "read".to_string(),
            "deny".to_string(),
        ];
        assert_eq!(def.eft(&full), Effect::Deny);

        let short = vec!["alice".to_string(), "data1".to_string(), "read".to_string()];
        assert_eq!(def.eft(&short), Effect::Allow);
        assert!(def.valid_arity(4));
        assert!(def.valid_arity(3));
        assert!(!def.valid_arity(2));
    }

    #[test]
    fn policy_def_without_eft_column() {
        let def = PolicyDef::parse("p", "sub, obj, act").unwrap();
        let tokens = vec!["alice".to_string(), "data1".to_string(), "read".to_string()];
        assert_eq!(def.eft(&tokens), Effect::Allow);
        assert!(!def.valid_arity(2));
        assert!(def.valid_arity(3));
    }

    #[test]
    fn role_def_arity() {
        assert_eq!(RoleDef::parse("g", "_, _").unwrap().arity(), 2);
        assert_eq!(RoleDef::parse("g2", "_, _, _").unwrap().arity(), 3);
        assert!(RoleDef::parse("g", "_").is_err());
        assert!(RoleDef::parse("g", "_, _, _, _").is_err());
    }
}
