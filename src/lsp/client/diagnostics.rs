//! Per-document diagnostics published by the server.

use std::collections::HashMap;
use std::sync::RwLock;

use lsp_types::{Diagnostic, Position, Range};
use serde::Deserialize;

use crate::error::LockResultExt;
use crate::lsp::protocol::{path_to_uri, uri_to_path};

/// Parameters of `textDocument/publishDiagnostics`.
///
/// The uri is kept as a plain string so servers that encode paths
/// differently from us still land on the same cache key.
#[derive(Debug, Deserialize)]
pub struct PublishDiagnostics {
    pub uri: String,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// Canonical cache key for a document uri.
pub fn normalize_uri(uri: &str) -> String {
    uri_to_path(uri)
        .and_then(|path| path_to_uri(&path).ok())
        .unwrap_or_else(|| uri.to_string())
}

/// Latest diagnostics per document. Each publish replaces the entry wholesale.
#[derive(Debug, Default)]
pub struct DiagnosticsCache {
    entries: RwLock<HashMap<String, Vec<Diagnostic>>>,
}

impl DiagnosticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, params: PublishDiagnostics) {
        let key = normalize_uri(&params.uri);
        let mut entries = self.entries.write().recover_poison("DiagnosticsCache::publish");
        entries.insert(key, params.diagnostics);
    }

    /// Snapshot for one document. `None` means nothing was ever published.
    pub fn get(&self, uri: &str) -> Option<Vec<Diagnostic>> {
        let entries = self.entries.read().recover_poison("DiagnosticsCache::get");
        entries.get(&normalize_uri(uri)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().recover_poison("DiagnosticsCache::is_empty").is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().recover_poison("DiagnosticsCache::clear").clear();
    }
}

/// Squared distance from `point` to the nearest position in `range`, in
/// (line, character) space. Zero when the point is inside.
pub fn distance_of_point_to_range(point: Position, range: &Range) -> u64 {
    let (start, end) = (range.start, range.end);
    let squared = |a: u32, b: u32| u64::from(a.abs_diff(b)).pow(2);

    if point.line < start.line || (point.line == start.line && point.character < start.character) {
        return squared(point.line, start.line) + squared(point.character, start.character);
    }
    if point.line > end.line || (point.line == end.line && point.character > end.character) {
        return squared(point.line, end.line) + squared(point.character, end.character);
    }
    0
}

/// Diagnostics whose range covers the line of `point`, nearest first.
pub fn diagnostics_on_line(diagnostics: &[Diagnostic], point: Position) -> Vec<Diagnostic> {
    let mut on_line: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.range.start.line <= point.line && point.line <= d.range.end.line)
        .collect();
    on_line.sort_by_key(|d| distance_of_point_to_range(point, &d.range));
    on_line.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsp_types::DiagnosticSeverity;

    fn diagnostic(line: u32, start: u32, end: u32, message: &str) -> Diagnostic {
        Diagnostic {
            range: Range::new(Position::new(line, start), Position::new(line, end)),
            severity: Some(DiagnosticSeverity::ERROR),
            message: message.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn publish_replaces_entry_wholesale() {
        let cache = DiagnosticsCache::new();
        let uri = "file:///tmp/a.c".to_string();
        cache.publish(PublishDiagnostics {
            uri: uri.clone(),
            diagnostics: vec![diagnostic(0, 0, 1, "one"), diagnostic(1, 0, 1, "two")],
        });
        cache.publish(PublishDiagnostics {
            uri: uri.clone(),
            diagnostics: vec![diagnostic(2, 0, 1, "three")],
        });

        let current = cache.get(&uri).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].message, "three");
    }

    #[test]
    fn unpublished_document_has_no_entry() {
        let cache = DiagnosticsCache::new();
        assert!(cache.get("file:///tmp/none.c").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn differently_encoded_uris_share_an_entry() {
        let cache = DiagnosticsCache::new();
        cache.publish(PublishDiagnostics {
            uri: "file:///tmp/with%20space.c".into(),
            diagnostics: vec![diagnostic(0, 0, 1, "x")],
        });
        let ours = path_to_uri(std::path::Path::new("/tmp/with space.c")).unwrap();
        assert_eq!(cache.get(&ours).unwrap().len(), 1);
    }

    #[test]
    fn publish_params_deserialize_from_wire() {
        let params: PublishDiagnostics = serde_json::from_value(serde_json::json!({
            "uri": "file:///tmp/b.rs",
            "diagnostics": [{
                "range": {"start": {"line": 3, "character": 4}, "end": {"line": 3, "character": 9}},
                "severity": 2,
                "message": "unused variable"
            }]
        }))
        .unwrap();
        assert_eq!(params.diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
    }

    #[test]
    fn distance_is_zero_inside_and_grows_outside() {
        let range = Range::new(Position::new(2, 4), Position::new(2, 8));
        assert_eq!(distance_of_point_to_range(Position::new(2, 5), &range), 0);
        assert_eq!(distance_of_point_to_range(Position::new(2, 2), &range), 4);
        assert_eq!(distance_of_point_to_range(Position::new(2, 10), &range), 4);
        assert_eq!(distance_of_point_to_range(Position::new(0, 4), &range), 4);
    }

    #[test]
    fn diagnostics_on_line_sorted_by_distance() {
        let all = vec![
            diagnostic(5, 0, 2, "far"),
            diagnostic(5, 10, 12, "near"),
            diagnostic(6, 0, 1, "other line"),
        ];
        let found = diagnostics_on_line(&all, Position::new(5, 11));
        let messages: Vec<_> = found.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, ["near", "far"]);
    }
}
