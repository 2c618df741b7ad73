//! Coordinate remapping between caller positions and LSP positions.
//!
//! Callers use 1-based lines and 1-based codepoint columns. LSP uses 0-based
//! lines and 0-based UTF-16 code-unit offsets.

use lsp_types::Position;

/// A 1-based caller-side location inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl LineColumn {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// UTF-16 offset of the 1-based codepoint `column` in `line`.
///
/// Columns past the end of the line map to just past the last character.
pub fn codepoint_column_to_utf16(line: &str, column: usize) -> u32 {
    let units: usize = line
        .chars()
        .take(column.saturating_sub(1))
        .map(char::len_utf16)
        .sum();
    units as u32
}

/// 1-based codepoint column at UTF-16 `offset` in `line`.
///
/// An offset inside a surrogate pair resolves to the character after the pair.
pub fn utf16_to_codepoint_column(line: &str, offset: u32) -> usize {
    let offset = offset as usize;
    let mut units = 0usize;
    let mut chars = 0usize;
    for ch in line.chars() {
        if units >= offset {
            break;
        }
        units += ch.len_utf16();
        chars += 1;
    }
    if units < offset {
        chars += offset - units;
    }
    chars + 1
}

fn nth_line(contents: &str, index: usize) -> Option<&str> {
    contents.lines().nth(index)
}

/// Convert a caller location into an LSP position using the file's contents.
pub fn to_lsp_position(contents: &str, location: LineColumn) -> Position {
    let line_index = location.line.saturating_sub(1);
    let character = match nth_line(contents, line_index) {
        Some(line) => codepoint_column_to_utf16(line, location.column),
        None => location.column.saturating_sub(1) as u32,
    };
    Position::new(line_index as u32, character)
}

/// Convert an LSP position into a caller location.
///
/// `contents` is `None` when the file cannot be read; the offset is then
/// used as-is.
pub fn from_lsp_position(contents: Option<&str>, position: Position) -> LineColumn {
    let line_index = position.line as usize;
    let column = match contents.and_then(|c| nth_line(c, line_index)) {
        Some(line) => utf16_to_codepoint_column(line, position.character),
        None => position.character as usize + 1,
    };
    LineColumn::new(line_index + 1, column)
}
