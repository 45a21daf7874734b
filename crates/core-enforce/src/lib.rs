// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Warden Team

//! # core-enforce
//!
//! Programmable access-control enforcement engine.
//!
//! A request tuple (subject, object, action, ...) is decided against a
//! user-supplied policy. The policy's **model** declares the request
//! shape, policy shape, role relations, matcher expression and effect
//! combination rule; its **rules** populate the tables. The pipeline:
//!
//! - [`model`] - typed section definitions and deduplicated rule tables
//! - [`expr`] - the boolean matcher expression engine
//! - [`functions`] - the `keyMatch`/`regexMatch`/... registry
//! - [`rbac`] - hierarchical role inheritance with pattern roles
//! - [`effect`] - folding per-rule effects into a decision
//! - [`pathmatch`] - the URL-pattern engine behind `keyMatch2`+
//! - [`Enforcer`] - the facade composing all of the above
//!
//! ## Quick start
//!
//! ```
//! use core_enforce::{Enforcer, Model, model};
//!
//! let mut m = Model::new();
//! m.add_def(model::REQUEST_SECTION, "r", "sub, obj, act").unwrap();
//! m.add_def(model::POLICY_SECTION, "p", "sub, obj, act").unwrap();
//! m.add_def(model::EFFECT_SECTION, "e", "some(where (p_eft == allow))").unwrap();
//! m.add_def(model::MATCHER_SECTION, "m",
//!     "r.sub == p.sub && r.obj == p.obj && r.act == p.act").unwrap();
//!
//! let mut e = Enforcer::new(m, None);
//! e.add_rule(&["p", "alice", "data1", "read"].map(String::from)).unwrap();
//!
//! let request = ["alice", "data1", "read"].map(core_enforce::Value::from);
//! assert!(e.enforce(&request).unwrap());
//! ```
//!
//! ## Concurrency
//!
//! Enforcement is synchronous and runs on the calling thread. The role
//! graph tolerates concurrent queries; the model and rule tables
//! assume a single writer (`&mut self` on every mutating path).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod effect;
mod enforcer;
mod error;
pub mod event;
pub mod expr;
pub mod functions;
pub mod model;
pub mod pathmatch;
pub mod rbac;
pub mod storage;

pub use effect::{Decision, Effect, EffectKind, Effector};
pub use enforcer::{EnforceContext, Enforcer};
pub use error::{EnforceError, Result};
pub use expr::{Expression, Value};
pub use functions::{register_global, FunctionMap};
pub use model::Model;
pub use rbac::{DefaultRoleManager, KeyMatchPattern, PatternMatcher, RoleManager};
pub use storage::{Adapter, NoopAdapter, RuleSink, RuleSource, StorageController};

/// Maximum length of a matcher expression (DoS guard)
pub const MAX_EXPRESSION_LENGTH: usize = 1024;

/// Maximum nesting depth of a matcher expression (stack guard)
pub const MAX_EXPRESSION_DEPTH: usize = 64;

/// Entries kept by the role manager's pattern-match cache
pub const MATCH_CACHE_CAPACITY: usize = 100;
