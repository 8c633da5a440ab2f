//! Structural scan of JSON text into a flat, document-ordered list of key and
//! value spans.
//!
//! Well-formed documents are walked by a recursive-descent scanner. Documents
//! that fail to parse (the usual state of a file mid-edit) go through a
//! tolerant token scanner that tracks brace/bracket depth and still recovers
//! quoted key/value pairs. Both produce the same span shape.

use serde::de::IgnoredAny;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Key,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub kind: SpanKind,
    /// Byte offset of the first byte (the opening quote for strings).
    pub start: usize,
    /// Byte offset one past the last byte.
    pub end: usize,
    /// Number of objects/arrays enclosing this token.
    pub depth: usize,
    /// Key owning the innermost enclosing container, `None` at the top level.
    pub parent: Option<String>,
    /// Unescaped string contents, or the raw literal text.
    pub text: String,
    /// Keys only: byte offset where the value begins, when a `:` follows.
    pub value_start: Option<usize>,
}

/// Scan `text` into spans. Never fails; malformed input degrades to a best-effort scan.
pub fn scan(text: &str) -> Vec<Span> {
    if serde_json::from_str::<IgnoredAny>(text).is_ok() {
        StrictScanner::new(text).run()
    } else {
        debug!("Document is not well-formed JSON, falling back to tolerant scan");
        tolerant_scan(text)
    }
}

// ────────────────────────────────────────────────────────────
// Recursive-descent scanner (well-formed input)
// ────────────────────────────────────────────────────────────

struct StrictScanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    spans: Vec<Span>,
}

impl<'a> StrictScanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            spans: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Span> {
        skip_whitespace(self.bytes, &mut self.pos);
        self.scan_value(0, None, None);
        self.spans
    }

    /// `key` is the member key this value belongs to (if any); `parent` is the
    /// owner of the container the value sits in.
    fn scan_value(&mut self, depth: usize, key: Option<String>, parent: Option<&str>) {
        if self.pos >= self.bytes.len() {
            return;
        }

        match self.bytes[self.pos] {
            b'{' => self.scan_object(depth + 1, key),
            b'[' => self.scan_array(depth + 1, key),
            b'"' => {
                let start = self.pos;
                let (end, terminated) = string_end(self.bytes, start);
                self.spans.push(Span {
                    kind: SpanKind::Value,
                    start,
                    end,
                    depth,
                    parent: parent.map(str::to_owned),
                    text: string_contents(self.text, start, end, terminated),
                    value_start: None,
                });
                self.pos = end;
            }
            _ => {
                let start = self.pos;
                let end = literal_end(self.bytes, start);
                if end == start {
                    self.pos += 1;
                    return;
                }
                self.spans.push(Span {
                    kind: SpanKind::Value,
                    start,
                    end,
                    depth,
                    parent: parent.map(str::to_owned),
                    text: self.text[start..end].to_owned(),
                    value_start: None,
                });
                self.pos = end;
            }
        }
    }

    fn scan_object(&mut self, depth: usize, owner: Option<String>) {
        // Consume '{'
        self.pos += 1;

        loop {
            skip_whitespace(self.bytes, &mut self.pos);
            if self.pos >= self.bytes.len() {
                break;
            }

            match self.bytes[self.pos] {
                b'}' => {
                    self.pos += 1;
                    break;
                }
                b',' => self.pos += 1,
                b'"' => {
                    let start = self.pos;
                    let (end, terminated) = string_end(self.bytes, start);
                    let key = string_contents(self.text, start, end, terminated);
                    let value_start = value_start_after(self.bytes, end);

                    self.spans.push(Span {
                        kind: SpanKind::Key,
                        start,
                        end,
                        depth,
                        parent: owner.clone(),
                        text: key.clone(),
                        value_start,
                    });

                    self.pos = end;
                    if let Some(value_start) = value_start {
                        self.pos = value_start;
                        self.scan_value(depth, Some(key), owner.as_deref());
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    fn scan_array(&mut self, depth: usize, owner: Option<String>) {
        // Consume '['
        self.pos += 1;

        loop {
            skip_whitespace(self.bytes, &mut self.pos);
            if self.pos >= self.bytes.len() {
                break;
            }

            match self.bytes[self.pos] {
                b']' => {
                    self.pos += 1;
                    break;
                }
                b',' => self.pos += 1,
                _ => self.scan_value(depth, None, owner.as_deref()),
            }
        }
    }
}

// ────────────────────────────────────────────────────────────
// Tolerant token scanner (malformed input)
// ────────────────────────────────────────────────────────────

struct Container {
    owner: Option<String>,
    object: bool,
}

pub(crate) fn tolerant_scan(text: &str) -> Vec<Span> {
    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut stack: Vec<Container> = Vec::new();
    let mut expect_key = false;
    let mut pending_key: Option<String> = None;
    let mut spans = Vec::new();

    while pos < bytes.len() {
        match bytes[pos] {
            b' ' | b'\t' | b'\r' | b'\n' => pos += 1,
            b'{' => {
                stack.push(Container {
                    owner: pending_key.take(),
                    object: true,
                });
                expect_key = true;
                pos += 1;
            }
            b'[' => {
                stack.push(Container {
                    owner: pending_key.take(),
                    object: false,
                });
                expect_key = false;
                pos += 1;
            }
            b'}' | b']' => {
                // Mismatched closers still pop one level
                stack.pop();
                pending_key = None;
                expect_key = false;
                pos += 1;
            }
            b',' => {
                pending_key = None;
                expect_key = stack.last().is_some_and(|c| c.object);
                pos += 1;
            }
            b':' => {
                expect_key = false;
                pos += 1;
            }
            b'"' => {
                let start = pos;
                let (end, terminated) = string_end(bytes, start);
                let contents = string_contents(text, start, end, terminated);
                let depth = stack.len();
                let parent = stack.last().and_then(|c| c.owner.clone());
                let value_start = value_start_after(bytes, end);

                // A string followed by ':' is a key even when a comma is missing
                let in_object = stack.last().is_some_and(|c| c.object);
                if in_object && (expect_key || value_start.is_some()) {
                    spans.push(Span {
                        kind: SpanKind::Key,
                        start,
                        end,
                        depth,
                        parent,
                        text: contents.clone(),
                        value_start,
                    });
                    pending_key = Some(contents);
                } else {
                    spans.push(Span {
                        kind: SpanKind::Value,
                        start,
                        end,
                        depth,
                        parent,
                        text: contents,
                        value_start: None,
                    });
                    pending_key = None;
                }
                expect_key = false;
                pos = end;
            }
            _ => {
                let start = pos;
                let end = literal_end(bytes, start).max(start + 1);
                spans.push(Span {
                    kind: SpanKind::Value,
                    start,
                    end,
                    depth: stack.len(),
                    parent: stack.last().and_then(|c| c.owner.clone()),
                    text: text.get(start..end).unwrap_or_default().to_owned(),
                    value_start: None,
                });
                pending_key = None;
                expect_key = false;
                pos = end;
            }
        }
    }

    spans
}

// ────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────

fn skip_whitespace(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && matches!(bytes[*pos], b' ' | b'\t' | b'\r' | b'\n') {
        *pos += 1;
    }
}

/// Find the end of the string starting at the `"` at `start`.
///
/// Returns the offset one past the closing quote and `true`, or, for an
/// unterminated string, the offset of the line break (or end of text) and `false`.
fn string_end(bytes: &[u8], start: usize) -> (usize, bool) {
    let mut pos = start + 1;
    while pos < bytes.len() {
        match bytes[pos] {
            b'"' => return (pos + 1, true),
            b'\\' => pos += 2,
            b'\n' | b'\r' => return (pos, false),
            _ => pos += 1,
        }
    }
    (bytes.len(), false)
}

fn string_contents(text: &str, start: usize, end: usize, terminated: bool) -> String {
    let inner_end = if terminated { end - 1 } else { end };
    text.get(start + 1..inner_end)
        .map(unescape)
        .unwrap_or_default()
}

/// Decode JSON string escapes. Invalid escapes are kept verbatim.
fn unescape(raw: &str) -> String {
    if !raw.contains('\\') {
        return raw.to_owned();
    }

    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok();
                let decoded = match code {
                    Some(high @ 0xD800..=0xDBFF) => {
                        // Surrogate pair: expect a following \uDC00-\uDFFF
                        let rest = chars.as_str();
                        let low = rest
                            .strip_prefix("\\u")
                            .and_then(|r| r.get(..4))
                            .and_then(|h| u32::from_str_radix(h, 16).ok())
                            .filter(|low| (0xDC00..=0xDFFF).contains(low));
                        match low {
                            Some(low) => {
                                chars = rest[6..].chars();
                                char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                            }
                            None => None,
                        }
                    }
                    Some(code) => char::from_u32(code),
                    None => None,
                };
                out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}

/// If a `:` follows the key ending at `key_end`, return where its value begins.
fn value_start_after(bytes: &[u8], key_end: usize) -> Option<usize> {
    let mut pos = key_end;
    skip_whitespace(bytes, &mut pos);
    if pos >= bytes.len() || bytes[pos] != b':' {
        return None;
    }
    pos += 1;
    skip_whitespace(bytes, &mut pos);
    (pos < bytes.len()).then_some(pos)
}

/// Skip over a literal (number, true, false, null, or garbage) to the next delimiter.
fn literal_end(bytes: &[u8], start: usize) -> usize {
    let mut pos = start;
    while pos < bytes.len()
        && !matches!(
            bytes[pos],
            b',' | b'}' | b']' | b'{' | b'[' | b':' | b'"' | b' ' | b'\t' | b'\r' | b'\n'
        )
    {
        pos += 1;
    }
    pos
}
