// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Warden Team

//! # warden
//!
//! Programmable access-control enforcement for Rust.
//!
//! Warden decides request tuples (subject, object, action, ...)
//! against a user-supplied policy: a declarative **model** naming the
//! request shape, policy shape, role relations, matcher expression and
//! effect rule, plus the **rules** populating its tables.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use warden::formats::enforcer_from_files;
//!
//! let e = enforcer_from_files(
//!     Path::new("model.conf"),
//!     Some(Path::new("rules.csv")),
//! ).unwrap();
//!
//! let request = ["alice", "data1", "read"].map(warden::Value::from);
//! assert!(e.enforce(&request).unwrap());
//! ```
//!
//! ## Architecture
//!
//! This facade crate re-exports the following modules:
//!
//! - [`enforce`] - the evaluation pipeline (from `core-enforce`)
//! - [`formats`] - model and rule file handling (from `app-utils`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Enforcement engine module.
///
/// Re-exports `core_enforce`: model, matcher, role manager, effector
/// and the enforcer facade.
pub mod enforce {
    pub use core_enforce::*;
}

/// File-format module.
///
/// Re-exports `app_utils`: `.conf` model parsing and the CSV rule
/// adapter.
pub mod formats {
    pub use app_utils::*;
}

// Convenience re-exports at root level
pub use core_enforce::{EnforceContext, Enforcer, Model, Value};
pub use app_utils::FileAdapter;
