//! Model-file (`.conf`) parsing.
//!
//! The format is INI-like: `[section]` headers followed by
//! `key = value` lines. `#` starts a comment, whitespace is trimmed
//! per field, and a trailing `\` continues a value on the next line.
//!
//! ```text
//! [request_definition]
//! r = sub, obj, act
//! [policy_definition]
//! p = sub, obj, act
//! [policy_effect]
//! e = some(where (p_eft == allow))
//! [matcher]
//! m = r.sub == p.sub && r.obj == p.obj && r.act == p.act
//! ```

use crate::error::{Error, Result};
use core_enforce::{model, Model};
use std::fs;
use std::path::Path;

const SECTIONS: [&str; 5] = [
    model::REQUEST_SECTION,
    model::POLICY_SECTION,
    model::ROLE_SECTION,
    model::EFFECT_SECTION,
    model::MATCHER_SECTION,
];

fn parse_err(line: usize, msg: impl Into<String>) -> Error {
    Error::Parse {
        line,
        msg: msg.into(),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Parse model text into a [`Model`]
///
/// # Errors
///
/// Fails on unknown sections, definitions outside a section, missing
/// `=`, or values the model rejects.
pub fn parse_model(input: &str) -> Result<Model> {
    let mut model = Model::new();
    let mut section: Option<String> = None;

    let mut lines = input.lines().enumerate();
    while let Some((index, raw)) = lines.next() {
        let lineno = index + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| parse_err(lineno, "unterminated section header"))?
                .trim();
            if !SECTIONS.contains(&name) {
                return Err(parse_err(lineno, format!("unknown section `{name}`")));
            }
            section = Some(name.to_string());
            continue;
        }

        let section = section
            .as_deref()
            .ok_or_else(|| parse_err(lineno, "definition outside any section"))?;
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| parse_err(lineno, "expected `key = value`"))?;

        let mut value = value.trim().to_string();
        // Trailing backslash continues the value on the next line.
        while let Some(rest) = value.strip_suffix('\\') {
            let (_, next) = lines
                .next()
                .ok_or_else(|| parse_err(lineno, "dangling line continuation"))?;
            value = format!("{} {}", rest.trim_end(), strip_comment(next).trim());
        }

        model
            .add_def(section, key.trim(), &value)
            .map_err(|e| parse_err(lineno, e.to_string()))?;
    }

    Ok(model)
}

/// Read and parse a model file
///
/// # Errors
///
/// Fails when the file cannot be read or parsed.
pub fn load_model(path: &Path) -> Result<Model> {
    let content = fs::read_to_string(path)?;
    parse_model(&content)
}
