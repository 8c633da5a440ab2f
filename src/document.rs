use crate::scan::{scan, Span};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use ropey::Rope;
use std::sync::{Arc, OnceLock};
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};

/// Immutable snapshot of one document version.
///
/// The span scan is computed on first use and shared by every request that
/// sees this version.
pub struct Document {
    text: String,
    rope: Rope,
    spans: OnceLock<Vec<Span>>,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let rope = Rope::from_str(&text);
        Self {
            text,
            rope,
            spans: OnceLock::new(),
        }
    }

    fn from_rope(rope: Rope) -> Self {
        Self {
            text: rope.to_string(),
            rope,
            spans: OnceLock::new(),
        }
    }

    pub fn spans(&self) -> &[Span] {
        self.spans.get_or_init(|| scan(&self.text))
    }

    /// Byte offset of an LSP position, or `None` if the line does not exist.
    pub fn offset_at(&self, pos: Position) -> Option<usize> {
        let char_idx = lsp_pos_to_char_idx(&self.rope, pos).ok()?;
        Some(self.rope.char_to_byte(char_idx))
    }

    /// LSP position (UTF-16 column) of a byte offset. Offsets past the end clamp to the end.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.rope.len_bytes());
        let char_idx = self.rope.byte_to_char(offset);
        let line = self.rope.char_to_line(char_idx);
        let line_start = self.rope.line_to_char(line);
        let character =
            self.rope.char_to_utf16_cu(char_idx) - self.rope.char_to_utf16_cu(line_start);
        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    pub fn range_of(&self, span: &std::ops::Range<usize>) -> Range {
        Range {
            start: self.position_at(span.start),
            end: self.position_at(span.end),
        }
    }
}

#[cfg(test)]
impl Document {
    pub(crate) fn text(&self) -> &str {
        &self.text
    }
}

pub struct DocumentState {
    pub version: i32,
    pub document: Arc<Document>,
}

pub struct DocumentStore {
    inner: DashMap<Url, DocumentState>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    pub fn open(&self, uri: Url, version: i32, text: String) {
        self.inner.insert(
            uri,
            DocumentState {
                version,
                document: Arc::new(Document::new(text)),
            },
        );
    }

    /// Apply incremental or full text changes from a `did_change` notification.
    pub fn update(
        &self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        let mut state = self
            .inner
            .get_mut(uri)
            .ok_or_else(|| anyhow!("Document not found: {uri}"))?;

        let mut rope = state.document.rope.clone();
        for change in changes {
            match change.range {
                None => {
                    // Full replacement
                    rope = Rope::from_str(&change.text);
                }
                Some(range) => {
                    // Incremental update: convert LSP range to rope char indices
                    let start = lsp_pos_to_char_idx(&rope, range.start)?;
                    let end = lsp_pos_to_char_idx(&rope, range.end)?;
                    if start > end {
                        return Err(anyhow!("Inverted edit range in {uri}: {range:?}"));
                    }
                    rope.remove(start..end);
                    rope.insert(start, &change.text);
                }
            }
        }

        state.version = version;
        state.document = Arc::new(Document::from_rope(rope));
        Ok(())
    }

    pub fn close(&self, uri: &Url) {
        self.inner.remove(uri);
    }

    pub fn snapshot(&self, uri: &Url) -> Option<Arc<Document>> {
        self.inner.get(uri).map(|s| Arc::clone(&s.document))
    }
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert an LSP `Position` (0-based line + UTF-16 character) to a ropey char index.
pub fn lsp_pos_to_char_idx(rope: &Rope, pos: Position) -> Result<usize> {
    let line = pos.line as usize;
    if line >= rope.len_lines() {
        return Err(anyhow!(
            "Line {line} out of range (doc has {} lines)",
            rope.len_lines()
        ));
    }

    let line_char_start = rope.line_to_char(line);
    let line_slice = rope.line(line);

    // Count UTF-16 code units to find the correct char offset within the line
    let mut utf16_remaining = pos.character as usize;
    let mut char_offset = 0;

    for ch in line_slice.chars() {
        // Columns past the end of the line clamp to the line end
        if utf16_remaining == 0 || ch == '\n' || ch == '\r' {
            break;
        }
        let utf16_len = ch.len_utf16();
        if utf16_remaining < utf16_len {
            // Cursor is in the middle of a surrogate pair, snap to start
            break;
        }
        utf16_remaining -= utf16_len;
        char_offset += 1;
    }

    Ok(line_char_start + char_offset)
}
