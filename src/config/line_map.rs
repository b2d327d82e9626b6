//! Field-path to source-line mapping.
//!
//! A side-channel scan of the raw document, kept separate from the typed
//! serde decode and merged with it only through the field-path string key
//! (`jobs.build.steps.0.uses`). The scan tracks indentation to reconstruct
//! the node tree; flow-style collections map to the line of their owning
//! key, and block-scalar bodies are skipped.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct LineMap {
    entries: HashMap<String, usize>,
}

enum Frame {
    Key { indent: usize, name: String },
    Item { indent: usize, index: usize },
}

impl Frame {
    fn indent(&self) -> usize {
        match self {
            Frame::Key { indent, .. } | Frame::Item { indent, .. } => *indent,
        }
    }

    fn segment(&self) -> String {
        match self {
            Frame::Key { name, .. } => name.clone(),
            Frame::Item { index, .. } => index.to_string(),
        }
    }
}

impl LineMap {
    /// Scan the raw document and record a 1-based line for every key and
    /// sequence index it declares.
    pub fn build(source: &str) -> Self {
        let mut map = LineMap::default();
        let mut stack: Vec<Frame> = Vec::new();
        // While inside a block scalar, lines indented deeper than the
        // owning key are content, not structure.
        let mut block_scalar_indent: Option<usize> = None;

        for (idx, raw) in source.lines().enumerate() {
            let line = idx + 1;
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let indent = raw.len() - trimmed.len();
            if let Some(owner) = block_scalar_indent {
                if indent > owner {
                    continue;
                }
                block_scalar_indent = None;
            }
            map.scan_line(&mut stack, &mut block_scalar_indent, indent, trimmed, line);
        }
        map
    }

    fn scan_line(
        &mut self,
        stack: &mut Vec<Frame>,
        block_scalar_indent: &mut Option<usize>,
        mut indent: usize,
        mut content: &str,
        line: usize,
    ) {
        // Sequence markers, possibly chained with inline content.
        while content == "-" || content.starts_with("- ") {
            while stack.last().is_some_and(|top| top.indent() > indent) {
                stack.pop();
            }
            let index = match stack.last() {
                Some(Frame::Item {
                    indent: top_indent,
                    index,
                }) if *top_indent == indent => {
                    let next = index + 1;
                    stack.pop();
                    next
                }
                _ => 0,
            };
            stack.push(Frame::Item { indent, index });
            self.record(stack, line);
            if content == "-" {
                return;
            }
            let inline = content[1..].trim_start();
            indent += content.len() - inline.len();
            content = inline;
        }

        let Some(colon) = find_key_colon(content) else {
            // Scalar sequence entry or stray text; the item path (if any)
            // was already recorded.
            return;
        };
        let key = unquote(content[..colon].trim());
        if key.is_empty() {
            return;
        }
        while stack.last().is_some_and(|top| top.indent() >= indent) {
            stack.pop();
        }
        stack.push(Frame::Key {
            indent,
            name: key.to_string(),
        });
        self.record(stack, line);

        let value = content[colon + 1..].trim();
        if value.starts_with('|') || value.starts_with('>') {
            *block_scalar_indent = Some(indent);
        }
    }

    fn record(&mut self, stack: &[Frame], line: usize) {
        let path = stack
            .iter()
            .map(Frame::segment)
            .collect::<Vec<_>>()
            .join(".");
        self.entries.entry(path).or_insert(line);
    }

    pub fn get(&self, path: &str) -> Option<usize> {
        self.entries.get(path).copied()
    }

    /// Line for the path, falling back through parent paths so errors about
    /// missing or flow-style fields still point somewhere useful.
    pub fn line_or_parent(&self, path: &str) -> Option<usize> {
        let mut current = path;
        loop {
            if let Some(line) = self.get(current) {
                return Some(line);
            }
            current = current.rsplit_once('.')?.0;
        }
    }
}

/// Position of the key-terminating colon: the first `:` outside quotes that
/// is followed by whitespace or ends the line. Colons inside scalar values
/// (URLs, timestamps) do not qualify.
fn find_key_colon(content: &str) -> Option<usize> {
    let bytes = content.as_bytes();
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'#' => return None,
                b':' => {
                    if i + 1 >= bytes.len() || bytes[i + 1] == b' ' || bytes[i + 1] == b'\t' {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn unquote(key: &str) -> &str {
    let bytes = key.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &key[1..key.len() - 1]
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"name: ci
env:
  RUST_LOG: debug
jobs:
  build:
    runs-on: linux-x64
    steps:
      - id: compile
        uses: shell@v1
        with:
          run: |
            echo not: a: key
      - uses: echo@v1
  test:
    needs:
      - build
    strategy:
      matrix:
        server: [web1, web2]
"#;

    #[test]
    fn test_root_and_nested_keys() {
        let map = LineMap::build(DOC);
        assert_eq!(map.get("name"), Some(1));
        assert_eq!(map.get("env.RUST_LOG"), Some(3));
        assert_eq!(map.get("jobs"), Some(4));
        assert_eq!(map.get("jobs.build"), Some(5));
        assert_eq!(map.get("jobs.build.runs-on"), Some(6));
    }

    #[test]
    fn test_sequence_indices() {
        let map = LineMap::build(DOC);
        assert_eq!(map.get("jobs.build.steps.0"), Some(8));
        assert_eq!(map.get("jobs.build.steps.0.id"), Some(8));
        assert_eq!(map.get("jobs.build.steps.0.uses"), Some(9));
        assert_eq!(map.get("jobs.build.steps.1"), Some(13));
        assert_eq!(map.get("jobs.build.steps.1.uses"), Some(13));
        assert_eq!(map.get("jobs.test.needs.0"), Some(16));
    }

    #[test]
    fn test_block_scalar_content_skipped() {
        let map = LineMap::build(DOC);
        assert_eq!(map.get("jobs.build.steps.0.with.run"), Some(11));
        // the `echo not: a: key` body line must not register as a key
        assert!(map.get("jobs.build.steps.0.with.run.echo not").is_none());
    }

    #[test]
    fn test_line_or_parent_fallback() {
        let map = LineMap::build(DOC);
        // flow-style matrix values map back to the dimension key
        assert_eq!(map.get("jobs.test.strategy.matrix.server"), Some(19));
        assert_eq!(
            map.line_or_parent("jobs.test.strategy.matrix.server.0"),
            Some(19)
        );
        assert_eq!(map.line_or_parent("jobs.build.timeout-minutes"), Some(5));
    }
}
