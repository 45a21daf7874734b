//! CSV rule-file storage adapter.
//!
//! One rule per line, comma-separated, first field the definition key.
//! Whitespace is trimmed per field and `#` starts a comment line.
//!
//! ```text
//! p, alice, data1, read
//! p, bob, data2, write
//! g, alice, admin
//! ```

use core_enforce::{Adapter, EnforceError, RuleSink, RuleSource};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Storage adapter over a CSV rule file
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    /// Adapter for the given rule file; the file need not exist until
    /// the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

fn parse_line(line: &str) -> Option<Vec<String>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(line.split(',').map(|field| field.trim().to_string()).collect())
}

fn format_rule(rule: &[String]) -> String {
    rule.join(", ")
}

impl Adapter for FileAdapter {
    fn load_policy(&self, sink: &mut dyn RuleSink) -> core_enforce::Result<()> {
        let content = fs::read_to_string(&self.path)?;
        for line in content.lines() {
            if let Some(rule) = parse_line(line) {
                sink.add_rule(&rule)?;
            }
        }
        Ok(())
    }

    fn save_policy(&self, source: &dyn RuleSource) -> core_enforce::Result<()> {
        let mut out = String::new();
        source.range_rules(&mut |key, tokens| {
            out.push_str(key);
            if !tokens.is_empty() {
                out.push_str(", ");
                out.push_str(&tokens.join(", "));
            }
            out.push('\n');
            true
        });
        fs::write(&self.path, out)?;
        Ok(())
    }

    fn add_policy(&self, rule: &[String]) -> core_enforce::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", format_rule(rule))?;
        Ok(())
    }

    fn remove_policy(&self, rule: &[String]) -> core_enforce::Result<()> {
        let content = fs::read_to_string(&self.path)?;
        let mut out = String::new();
        let mut found = false;
        for line in content.lines() {
            match parse_line(line) {
                Some(tokens) if !found && tokens == rule => found = true,
                _ => {
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        if !found {
            return Err(EnforceError::Adapter(format!(
                "rule `{}` not present in {}",
                format_rule(rule),
                self.path.display()
            )));
        }
        fs::write(&self.path, out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_enforce::Result;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CollectSink(Vec<Vec<String>>);

    impl RuleSink for CollectSink {
        fn add_rule(&mut self, rule: &[String]) -> Result<bool> {
            self.0.push(rule.to_vec());
            Ok(true)
        }
    }

    struct FixedSource(Vec<Vec<String>>);

    impl RuleSource for FixedSource {
        fn range_rules(&self, visitor: &mut dyn FnMut(&str, &[String]) -> bool) {
            for rule in &self.0 {
                if !visitor(&rule[0], &rule[1..]) {
                    break;
                }
            }
        }
    }

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn load_trims_fields_and_skips_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        fs::write(
            &path,
            "# rules\np,  alice , data1,read\n\ng, alice, admin\n",
        )
        .unwrap();

        let adapter = FileAdapter::new(&path);
        let mut sink = CollectSink::default();
        adapter.load_policy(&mut sink).unwrap();
        assert_eq!(
            sink.0,
            vec![
                strings(&["p", "alice", "data1", "read"]),
                strings(&["g", "alice", "admin"]),
            ]
        );
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        let adapter = FileAdapter::new(&path);

        let rules = vec![
            strings(&["p", "alice", "data1", "read"]),
            strings(&["g", "alice", "admin"]),
        ];
        adapter.save_policy(&FixedSource(rules.clone())).unwrap();

        let mut sink = CollectSink::default();
        adapter.load_policy(&mut sink).unwrap();
        let saved: BTreeSet<_> = sink.0.into_iter().collect();
        let expected: BTreeSet<_> = rules.into_iter().collect();
        assert_eq!(saved, expected);
    }

    #[test]
    fn incremental_add_and_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        let adapter = FileAdapter::new(&path);

        adapter
            .add_policy(&strings(&["p", "alice", "data1", "read"]))
            .unwrap();
        adapter
            .add_policy(&strings(&["p", "bob", "data2", "write"]))
            .unwrap();
        adapter
            .remove_policy(&strings(&["p", "alice", "data1", "read"]))
            .unwrap();

        let mut sink = CollectSink::default();
        adapter.load_policy(&mut sink).unwrap();
        assert_eq!(sink.0, vec![strings(&["p", "bob", "data2", "write"])]);
    }

    #[test]
    fn removing_an_absent_rule_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.csv");
        fs::write(&path, "p, alice, data1, read\n").unwrap();

        let adapter = FileAdapter::new(&path);
        let err = adapter
            .remove_policy(&strings(&["p", "ghost", "data", "read"]))
            .unwrap_err();
        assert!(matches!(err, EnforceError::Adapter(_)));
    }

    #[test]
    fn loading_a_missing_file_is_an_io_error() {
        let adapter = FileAdapter::new("/no/such/file.csv");
        let mut sink = CollectSink::default();
        assert!(matches!(
            adapter.load_policy(&mut sink),
            Err(EnforceError::AdapterIo(_))
        ));
    }
}
