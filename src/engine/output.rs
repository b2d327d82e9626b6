//! Step output protocol parsing and the per-job output store.
//!
//! Steps communicate structured results back to the engine with
//! line-oriented `::set-output name=<key>::<value>` markers on stdout.

use std::sync::{OnceLock, RwLock};

use indexmap::IndexMap;
use regex::Regex;

fn output_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^::set-output\s+name=([^:]+)::(.*)$").expect("invalid output pattern")
    })
}

/// Parse emitted lines for output markers. Whitespace around key and value
/// is trimmed, later lines for the same key overwrite earlier ones, and
/// malformed lines are ignored without error.
pub fn parse_outputs(lines: &[String]) -> IndexMap<String, String> {
    let pattern = output_pattern();
    let mut outputs = IndexMap::new();
    for line in lines {
        let Some(captures) = pattern.captures(line.trim_end()) else {
            continue;
        };
        let key = captures[1].trim();
        if key.is_empty() {
            continue;
        }
        let value = captures[2].trim();
        outputs.insert(key.to_string(), value.to_string());
    }
    outputs
}

/// Outputs captured during one job execution, keyed by step id. Shared
/// across a job's matrix instances under a reader/writer lock; later
/// writers win, matching the line-level overwrite rule.
#[derive(Debug, Default)]
pub struct OutputStore {
    inner: RwLock<IndexMap<String, IndexMap<String, String>>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, step_id: &str, outputs: IndexMap<String, String>) {
        let mut inner = self.inner.write().expect("output store lock poisoned");
        let entry = inner.entry(step_id.to_string()).or_default();
        for (key, value) in outputs {
            entry.insert(key, value);
        }
    }

    pub fn get(&self, step_id: &str) -> Option<IndexMap<String, String>> {
        let inner = self.inner.read().expect("output store lock poisoned");
        inner.get(step_id).cloned()
    }

    pub fn snapshot(&self) -> IndexMap<String, IndexMap<String, String>> {
        self.inner.read().expect("output store lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_single_output() {
        let outputs = parse_outputs(&lines(&["::set-output name=version::v1.2.3"]));
        assert_eq!(outputs["version"], "v1.2.3");
    }

    #[test]
    fn test_later_line_overwrites() {
        let outputs = parse_outputs(&lines(&[
            "::set-output name=version::v1.2.3",
            "some build noise",
            "::set-output name=version::v2",
        ]));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["version"], "v2");
    }

    #[test]
    fn test_whitespace_trimmed() {
        let outputs = parse_outputs(&lines(&["::set-output name= tag ::  v1  "]));
        assert_eq!(outputs["tag"], "v1");
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let outputs = parse_outputs(&lines(&[
            "::set-output",
            "::set-output name=::empty-key",
            "set-output name=a::b",
            "::set-output name=ok::fine",
        ]));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs["ok"], "fine");
    }

    #[test]
    fn test_value_may_contain_colons() {
        let outputs = parse_outputs(&lines(&["::set-output name=url::https://example.com:8080"]));
        assert_eq!(outputs["url"], "https://example.com:8080");
    }

    #[test]
    fn test_store_later_writer_wins() {
        let store = OutputStore::new();
        let mut first = IndexMap::new();
        first.insert("version".to_string(), "v1".to_string());
        store.record("build", first);
        let mut second = IndexMap::new();
        second.insert("version".to_string(), "v2".to_string());
        store.record("build", second);
        assert_eq!(store.get("build").unwrap()["version"], "v2");
    }
}
