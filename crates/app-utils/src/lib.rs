// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Warden Team

//! # app-utils
//!
//! File formats around the core engine:
//! - parsing `.conf` model files into a [`core_enforce::Model`]
//! - a CSV rule-file adapter implementing the storage contract
//!
//! Neither format is consumed by the core itself; the enforcer only
//! sees the parsed model and the adapter trait.

#![forbid(unsafe_code)]

pub mod conf;
pub mod error;
pub mod file_adapter;

pub use conf::{load_model, parse_model};
pub use error::{Error, Result};
pub use file_adapter::FileAdapter;

use core_enforce::Enforcer;
use std::path::Path;

/// Build an enforcer from a model file and an optional rule file.
///
/// With a rule file, a [`FileAdapter`] is attached and its rules
/// loaded; without one the enforcer runs storage-less.
///
/// # Errors
///
/// Fails when either file cannot be read or parsed.
pub fn enforcer_from_files(model_path: &Path, rule_path: Option<&Path>) -> Result<Enforcer> {
    let model = load_model(model_path)?;
    match rule_path {
        Some(path) => {
            let adapter = FileAdapter::new(path);
            let mut enforcer = Enforcer::new(model, Some(Box::new(adapter)));
            enforcer.load_policy()?;
            Ok(enforcer)
        }
        None => Ok(Enforcer::new(model, None)),
    }
}
