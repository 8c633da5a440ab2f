use crate::scan::{Span, SpanKind};
use std::fmt;
use std::ops::Range;

/// The `package.json` objects whose keys are package names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Dependencies,
    DevDependencies,
    PeerDependencies,
    OptionalDependencies,
}

impl DependencyKind {
    pub fn from_block_name(name: &str) -> Option<Self> {
        match name {
            "dependencies" => Some(Self::Dependencies),
            "devDependencies" => Some(Self::DevDependencies),
            "peerDependencies" => Some(Self::PeerDependencies),
            "optionalDependencies" => Some(Self::OptionalDependencies),
            _ => None,
        }
    }

    pub fn block_name(self) -> &'static str {
        match self {
            Self::Dependencies => "dependencies",
            Self::DevDependencies => "devDependencies",
            Self::PeerDependencies => "peerDependencies",
            Self::OptionalDependencies => "optionalDependencies",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.block_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMatch {
    pub name: String,
    pub kind: DependencyKind,
    /// The sibling string value, e.g. `^1.2.0`. Absent when the key has no
    /// scalar value (mid-edit, or an object value).
    pub declared: Option<String>,
    /// Byte range of the key, quotes included.
    pub range: Range<usize>,
}

/// Find the dependency key at `offset`, if the offset is on a package name
/// inside a dependency block.
pub fn locate(spans: &[Span], offset: usize) -> Option<KeyMatch> {
    let index = key_at(spans, offset).or_else(|| key_before_value(spans, offset))?;
    let key = &spans[index];

    // The enclosing object must be owned by a dependency block one level up.
    let block_name = key.parent.as_deref()?;
    let kind = DependencyKind::from_block_name(block_name)?;
    let block = spans[..index]
        .iter()
        .rev()
        .find(|s| s.kind == SpanKind::Key && s.depth + 1 == key.depth)?;
    if block.text != block_name {
        return None;
    }

    let declared = spans
        .get(index + 1)
        .filter(|s| s.kind == SpanKind::Value && s.depth == key.depth && s.start >= key.end)
        .map(|s| s.text.clone());

    Some(KeyMatch {
        name: key.text.clone(),
        kind,
        declared,
        range: key.start..key.end,
    })
}

/// Innermost key whose span contains `offset`. Overlapping candidates resolve
/// to the one with the larger start.
fn key_at(spans: &[Span], offset: usize) -> Option<usize> {
    spans
        .iter()
        .enumerate()
        .filter(|(_, s)| s.kind == SpanKind::Key && s.start <= offset && offset < s.end)
        .max_by_key(|(_, s)| s.start)
        .map(|(i, _)| i)
}

/// Key whose trailing gap (`"key"  :  ` up to the value) contains `offset`.
fn key_before_value(spans: &[Span], offset: usize) -> Option<usize> {
    spans
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            s.kind == SpanKind::Key
                && s.end <= offset
                && s.value_start.is_some_and(|value_start| offset < value_start)
        })
        .max_by_key(|(_, s)| s.start)
        .map(|(i, _)| i)
}
