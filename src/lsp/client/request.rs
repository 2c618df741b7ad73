//! Caller-side request data.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use lsp_types::Position;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ClientResult;
use crate::lsp::protocol::{LineColumn, from_lsp_position, path_to_uri, to_lsp_position, uri_to_path};

/// A request about a position in a file, in caller coordinates
/// (1-based line, 1-based codepoint column).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub filepath: PathBuf,
    pub filetype: String,
    /// Current buffer contents, which may differ from the file on disk.
    pub contents: String,
    pub line: usize,
    pub column: usize,
}

impl FileRequest {
    pub fn new(
        filepath: impl Into<PathBuf>,
        filetype: impl Into<String>,
        contents: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            filepath: filepath.into(),
            filetype: filetype.into(),
            contents: contents.into(),
            line,
            column,
        }
    }

    /// Build a request from the file on disk.
    pub async fn from_disk(
        filepath: impl Into<PathBuf>,
        filetype: impl Into<String>,
        line: usize,
        column: usize,
    ) -> ClientResult<Self> {
        let filepath = filepath.into();
        let contents = tokio::fs::read_to_string(&filepath).await?;
        Ok(Self::new(filepath, filetype, contents, line, column))
    }

    pub fn uri(&self) -> ClientResult<String> {
        path_to_uri(&self.filepath)
    }

    pub fn position(&self) -> Position {
        to_lsp_position(&self.contents, LineColumn::new(self.line, self.column))
    }

    /// `TextDocumentPositionParams` for this request.
    pub fn text_document_position(&self) -> ClientResult<Value> {
        let position = self.position();
        Ok(json!({
            "textDocument": { "uri": self.uri()? },
            "position": { "line": position.line, "character": position.character }
        }))
    }
}

/// Caller-side location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub filepath: PathBuf,
    pub line_num: usize,
    pub column_num: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Resolves server positions to caller locations.
///
/// The requested file's buffer comes from the request; other files are read
/// from disk once and cached.
pub struct LocationResolver<'a> {
    request: &'a FileRequest,
    files: HashMap<PathBuf, Option<String>>,
}

impl<'a> LocationResolver<'a> {
    pub fn new(request: &'a FileRequest) -> Self {
        Self {
            request,
            files: HashMap::new(),
        }
    }

    fn contents(&mut self, path: &Path) -> Option<&str> {
        if path == self.request.filepath {
            return Some(&self.request.contents);
        }
        self.files
            .entry(path.to_path_buf())
            .or_insert_with(|| std::fs::read_to_string(path).ok())
            .as_deref()
    }

    pub fn resolve_path(&mut self, path: &Path, position: Position) -> Location {
        let caller = from_lsp_position(self.contents(path), position);
        Location {
            filepath: path.to_path_buf(),
            line_num: caller.line,
            column_num: caller.column,
            description: None,
        }
    }

    /// `None` for non-file uris.
    pub fn resolve(&mut self, uri: &str, position: Position) -> Option<Location> {
        let path = uri_to_path(uri)?;
        Some(self.resolve_path(&path, position))
    }

    /// Location of the request itself.
    pub fn request_location(&self) -> Location {
        Location {
            filepath: self.request.filepath.clone(),
            line_num: self.request.line,
            column_num: self.request.column,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_uses_buffer_contents() {
        let request = FileRequest::new("/tmp/x.rs", "rust", "let é = 1;\nfoo", 1, 7);
        assert_eq!(request.position(), Position::new(0, 6));
        let params = request.text_document_position().unwrap();
        assert_eq!(params["position"]["character"], 6);
        assert_eq!(params["textDocument"]["uri"], "file:///tmp/x.rs");
    }

    #[test]
    fn resolver_prefers_request_buffer_then_disk() {
        let dir = tempfile::tempdir().unwrap();
        let other = dir.path().join("other.rs");
        std::fs::write(&other, "😀x\n").unwrap();
        let current = dir.path().join("current.rs");

        let request = FileRequest::new(&current, "rust", "ab😀c", 1, 1);
        let mut resolver = LocationResolver::new(&request);

        let here = resolver.resolve(&path_to_uri(&current).unwrap(), Position::new(0, 4)).unwrap();
        assert_eq!((here.line_num, here.column_num), (1, 4));

        let there = resolver.resolve(&path_to_uri(&other).unwrap(), Position::new(0, 2)).unwrap();
        assert_eq!(there.filepath, other);
        assert_eq!((there.line_num, there.column_num), (1, 2));

        assert!(resolver.resolve("untitled:1", Position::new(0, 0)).is_none());
    }

    #[tokio::test]
    async fn from_disk_reads_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        std::fs::write(&path, "int x;").unwrap();
        let request = FileRequest::from_disk(&path, "c", 1, 5).await.unwrap();
        assert_eq!(request.contents, "int x;");
    }
}
