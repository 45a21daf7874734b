//! URL-path pattern compilation and matching.
//!
//! A pattern is a sequence of segments separated by a configurable
//! separator (default `/`). Segment kinds:
//!
//! - **Static**: a literal, matched by string equality.
//! - **Parameterised**: `prefix` + key (+ optional `suffix`), default
//!   `:name`. With an empty suffix the key name ends at the first
//!   character in the set `.?=&#:`.
//! - **Wildcard**: the wildcard literal (default `*`), matching one or
//!   more input segments. Unnamed wildcards capture under `$0`, `$1`, ...
//! - **Mixed**: static literals interleaved with keys (`index.:ext`).
//!   Adjacent keys must be separated by at least one literal character.
//!
//! Matching walks left to right with a single savepoint: when a later
//! segment fails after a wildcard commit, the wildcard is extended by one
//! more input segment and the walk retries from there. A match succeeds
//! only when the whole input is consumed.
//!
//! ```
//! use core_enforce::pathmatch::PathPattern;
//!
//! let p = PathPattern::compile("/foo/:name").unwrap();
//! let caps = p.find_captures("/foo/bar").unwrap();
//! assert_eq!(caps.get("name").map(String::as_str), Some("bar"));
//! assert!(!p.matches("/foo/bar/baz"));
//! ```

use crate::error::{EnforceError, Result};
use std::collections::BTreeMap;

/// Default segment separator
pub const DEFAULT_SEPARATOR: &str = "/";
/// Default key prefix
pub const DEFAULT_PREFIX: &str = ":";
/// Default key suffix (empty: the key name ends at a delimiter character)
pub const DEFAULT_SUFFIX: &str = "";
/// Default wildcard literal
pub const DEFAULT_WILDCARD: &str = "*";

/// Characters terminating a key name when no suffix is configured
const KEY_DELIMITERS: &str = ".?=&#:";

/// Captured key/value pairs of a successful match
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param { key: String },
    Wildcard { key: String },
    Mixed {
        keys: Vec<String>,
        /// Literals around the keys; always `keys.len() + 1` entries,
        /// outer ones possibly empty
        statics: Vec<String>,
    },
}

impl Segment {
    /// True if the segment may span more than one input segment
    fn multiple(&self) -> bool {
        matches!(self, Segment::Wildcard { .. })
    }
}

/// Capture accumulator threaded through a match attempt
struct MatchDraft {
    capture: bool,
    map: Captures,
}

impl MatchDraft {
    fn new(capture: bool) -> Self {
        Self {
            capture,
            map: Captures::new(),
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        if self.capture {
            self.map.insert(key.to_string(), value.to_string());
        }
    }
}

/// Wildcard backtracking anchor
struct SavePoint {
    segment: usize,
    s_index: usize,
    search_start: usize,
}

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    separator: String,
    equal_check: bool,
    segments: Vec<Segment>,
}

/// Fluent configuration for [`PathPattern::compile`]
///
/// ```
/// use core_enforce::pathmatch::PathPattern;
///
/// let p = PathPattern::builder("/{start}def")
///     .prefix("{")
///     .suffix("}")
///     .compile()
///     .unwrap();
/// assert!(p.matches("/abcdef"));
/// ```
#[derive(Debug, Clone)]
pub struct PathPatternBuilder {
    pattern: String,
    separator: String,
    prefix: String,
    suffix: String,
    wildcard: String,
    equal_check: bool,
}

impl PathPatternBuilder {
    fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            suffix: DEFAULT_SUFFIX.to_string(),
            wildcard: DEFAULT_WILDCARD.to_string(),
            equal_check: false,
        }
    }

    /// Segment separator, default `/`
    #[must_use]
    pub fn separator(mut self, sep: impl Into<String>) -> Self {
        self.separator = sep.into();
        self
    }

    /// Key prefix, default `:`
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Key suffix, default empty
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Wildcard literal, default `*`
    #[must_use]
    pub fn wildcard(mut self, wildcard: impl Into<String>) -> Self {
        self.wildcard = wildcard.into();
        self
    }

    /// Require repeated occurrences of a key to capture equal values
    ///
    /// e.g. `/foo/:id/bar/:id` will not match `/foo/1/bar/2` when enabled
    #[must_use]
    pub fn equal_check(mut self, enabled: bool) -> Self {
        self.equal_check = enabled;
        self
    }

    /// Compile the configured pattern
    ///
    /// # Errors
    ///
    /// Returns [`EnforceError::PatternCompile`] on an empty prefix or
    /// separator, an unterminated suffix, a prefix not followed by a key
    /// name, or adjacent keys with no literal between them.
    pub fn compile(self) -> Result<PathPattern> {
        if self.prefix.is_empty() {
            return Err(EnforceError::PatternCompile(
                "prefix can't be an empty string".to_string(),
            ));
        }
        if self.separator.is_empty() {
            return Err(EnforceError::PatternCompile(
                "separator can't be an empty string".to_string(),
            ));
        }

        let mut segments = Vec::new();
        let mut unnamed = 0usize;

        for seg_str in self.pattern.split(self.separator.as_str()) {
            if seg_str == self.wildcard {
                segments.push(Segment::Wildcard {
                    key: format!("${unnamed}"),
                });
                unnamed += 1;
            } else if seg_str.contains(self.prefix.as_str()) {
                segments.push(compile_keyed_segment(
                    seg_str,
                    &self.prefix,
                    &self.suffix,
                )?);
            } else {
                segments.push(Segment::Static(seg_str.to_string()));
            }
        }

        Ok(PathPattern {
            pattern: self.pattern,
            separator: self.separator,
            equal_check: self.equal_check,
            segments,
        })
    }
}

/// Compiles a segment containing at least one `prefix` occurrence into a
/// parameterised or mixed segment.
fn compile_keyed_segment(seg_str: &str, prefix: &str, suffix: &str) -> Result<Segment> {
    let mut keys: Vec<String> = Vec::new();
    // (start including prefix, end including suffix) byte ranges
    let mut key_locs: Vec<(usize, usize)> = Vec::new();

    let mut i_prefix = match seg_str.find(prefix) {
        Some(i) => i,
        None => return Ok(Segment::Static(seg_str.to_string())),
    };

    loop {
        let key_start = i_prefix + prefix.len();
        if suffix.is_empty() {
            let rest = &seg_str[key_start..];
            let key_len = rest
                .find(|c| KEY_DELIMITERS.contains(c))
                .unwrap_or(rest.len());
            if key_len == 0 {
                return Err(EnforceError::PatternCompile(format!(
                    "{seg_str}: prefix \"{prefix}\" must be followed by a key name"
                )));
            }
            keys.push(rest[..key_len].to_string());
            key_locs.push((i_prefix, key_start + key_len));
        } else {
            let key_len = seg_str[key_start..].find(suffix).ok_or_else(|| {
                EnforceError::PatternCompile(format!(
                    "{seg_str}: suffix \"{suffix}\" not found"
                ))
            })?;
            keys.push(seg_str[key_start..key_start + key_len].to_string());
            key_locs.push((i_prefix, key_start + key_len + suffix.len()));
        }

        match seg_str[key_start..].find(prefix) {
            None => break,
            Some(i) => i_prefix = key_start + i,
        }
    }

    // A single key spanning the whole segment is plain parameterised.
    if key_locs.len() == 1 && key_locs[0].1 - key_locs[0].0 == seg_str.len() {
        return Ok(Segment::Param {
            key: keys.into_iter().next().unwrap_or_default(),
        });
    }

    // Otherwise collect the literals around the keys.
    let mut statics = Vec::with_capacity(keys.len() + 1);
    let mut start = 0usize;
    for (i, &(loc_start, loc_end)) in key_locs.iter().enumerate() {
        let lit = &seg_str[start..loc_start];
        if i > 0 && lit.is_empty() {
            return Err(EnforceError::PatternCompile(format!(
                "{seg_str}: no character between adjacent keys"
            )));
        }
        statics.push(lit.to_string());
        start = loc_end;
    }
    statics.push(seg_str[start..].to_string());

    Ok(Segment::Mixed { keys, statics })
}

impl PathPattern {
    /// Compile a pattern with default options
    ///
    /// # Errors
    ///
    /// See [`PathPatternBuilder::compile`].
    pub fn compile(pattern: impl Into<String>) -> Result<Self> {
        PathPatternBuilder::new(pattern).compile()
    }

    /// Start building a pattern with custom options
    #[must_use]
    pub fn builder(pattern: impl Into<String>) -> PathPatternBuilder {
        PathPatternBuilder::new(pattern)
    }

    /// The source pattern string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// True if the pattern contains only static segments
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|seg| matches!(seg, Segment::Static(_)))
    }

    /// Check whether `s` matches the pattern
    #[must_use]
    pub fn matches(&self, s: &str) -> bool {
        self.get_match(s, self.equal_check).is_some()
    }

    /// Match `s` and return the captured key/value map, or `None` on
    /// mismatch. Wildcard captures are named `$0`, `$1`, ...
    #[must_use]
    pub fn find_captures(&self, s: &str) -> Option<Captures> {
        self.get_match(s, true)
    }

    fn get_match(&self, s: &str, capture: bool) -> Option<Captures> {
        let n = self.segments.len();
        let sep = self.separator.as_str();
        let mut draft = MatchDraft::new(capture);
        let mut save: Option<SavePoint> = None;

        let mut s_index = 0usize;
        let mut search_start = 0usize;
        let mut i = 0usize;

        while i < n {
            let seg = &self.segments[i];
            let (seg_str, done) = slice_segment(s, sep, s_index, search_start);
            if done && i != n - 1 {
                return None;
            }

            if seg.multiple() {
                if i == n - 1 {
                    // Trailing wildcard swallows the rest of the input.
                    if !self.match_segment(seg, &mut draft, &s[s_index..]) {
                        return None;
                    }
                    s_index = s.len();
                    break;
                }
                match save.as_mut() {
                    // Re-entered after a downstream failure: extend the
                    // wildcard by one more input segment.
                    Some(sp) if sp.segment == i => {
                        sp.search_start = segment_len(seg_str, sep, done);
                    }
                    _ => {
                        save = Some(SavePoint {
                            segment: i,
                            s_index,
                            search_start: segment_len(seg_str, sep, done),
                        });
                    }
                }
            }

            if !self.match_segment(seg, &mut draft, seg_str) {
                match &save {
                    Some(sp) => {
                        i = sp.segment;
                        s_index = sp.s_index;
                        search_start = sp.search_start;
                        continue;
                    }
                    None => return None,
                }
            }

            s_index += segment_len(seg_str, sep, done);
            search_start = 0;
            if i == n - 1 && !done {
                return None;
            }
            i += 1;
        }

        if s_index != s.len() {
            return None;
        }
        Some(draft.map)
    }

    fn match_segment(&self, seg: &Segment, draft: &mut MatchDraft, s: &str) -> bool {
        match seg {
            Segment::Static(value) => s == value,
            Segment::Param { key } => {
                if self.equal_check {
                    if let Some(prev) = draft.map.get(key) {
                        if prev != s {
                            return false;
                        }
                    }
                }
                draft.set(key, s);
                true
            }
            Segment::Wildcard { key } => {
                draft.set(key, s);
                true
            }
            Segment::Mixed { keys, statics } => match_mixed(keys, statics, draft, s),
        }
    }
}

/// Matches a mixed segment: every literal must appear in order, keys
/// capture the spans between them, and the input must be fully consumed.
fn match_mixed(keys: &[String], statics: &[String], draft: &mut MatchDraft, s: &str) -> bool {
    let mut key_end = 0usize;
    for (i, key) in keys.iter().enumerate() {
        if !s[key_end..].starts_with(statics[i].as_str()) {
            return false;
        }
        let key_start = key_end + statics[i].len();
        let key_len = if statics[i + 1].is_empty() {
            s.len() - key_start
        } else {
            match s[key_start..].find(statics[i + 1].as_str()) {
                Some(len) => len,
                None => return false,
            }
        };
        key_end = key_start + key_len;
        draft.set(key, &s[key_start..key_end]);
    }
    let last = &statics[statics.len() - 1];
    s.len() == key_end + last.len()
}

/// Slice the input segment starting at `start`; the separator search
/// begins at `offset` so a wildcard can span already-consumed segments.
/// The second value is true when no further separator exists.
fn slice_segment<'a>(s: &'a str, sep: &str, start: usize, offset: usize) -> (&'a str, bool) {
    let rest = &s[start..];
    if offset >= rest.len() {
        return (rest, true);
    }
    match rest[offset..].find(sep) {
        None => (rest, true),
        Some(i) => (&rest[..i + offset], false),
    }
}

fn segment_len(seg: &str, sep: &str, done: bool) -> usize {
    if done {
        seg.len()
    } else {
        seg.len() + sep.len()
    }
}
