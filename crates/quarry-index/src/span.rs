//! Addressable code spans with stable structural identifiers.

use serde::{Deserialize, Serialize};

use crate::languages::Lang;

/// Separator between the file path and the structural path in an id.
const ID_SEP: &str = "::";

/// Stable span identifier: repository-relative file path, `::`, then
/// the dot-joined chain of enclosing definition names, e.g.
/// `src/auth.rs::Session.refresh`. Anonymous top-level groups use
/// `block@N` by ordinal. Identical content produces identical ids
/// across rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(String);

impl SpanId {
    #[must_use]
    pub fn new(file_path: &str, structural_path: &str) -> Self {
        Self(format!("{file_path}{ID_SEP}{structural_path}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The file-path component of the id.
    #[must_use]
    pub fn file_path(&self) -> &str {
        self.0.find(ID_SEP).map_or(&self.0, |i| &self.0[..i])
    }

    /// Whether this span is owned by `file_path`. Used for per-file
    /// deletion during incremental updates.
    #[must_use]
    pub fn owned_by(&self, file_path: &str) -> bool {
        self.0.len() > file_path.len()
            && self.0.starts_with(file_path)
            && self.0[file_path.len()..].starts_with(ID_SEP)
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a span addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// A function or method definition.
    Function,
    /// A type-level definition: class, struct, enum, trait, impl.
    Class,
    /// A group of module-level statements between definitions.
    Module,
    /// A whole file, used as the fallback for unsupported or
    /// unparseable sources.
    File,
}

/// One addressable unit of source code.
///
/// Spans are immutable: a rebuild replaces them, nothing patches them
/// in place. The parent id is a weak back-reference for context
/// expansion; it never owns anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub file_path: String,
    /// Half-open byte range within the file.
    pub byte_range: (usize, usize),
    /// 1-based inclusive line range.
    pub line_range: (usize, usize),
    pub kind: SpanKind,
    pub text: String,
    pub parent: Option<SpanId>,
    /// `None` for files whose language is not recognized.
    pub language: Option<Lang>,
    pub content_hash: String,
}

impl Span {
    /// Whether `other` lies fully inside this span (same file,
    /// contained byte range, not identical).
    #[must_use]
    pub fn contains(&self, other: &Span) -> bool {
        self.file_path == other.file_path
            && self.byte_range != other.byte_range
            && self.byte_range.0 <= other.byte_range.0
            && other.byte_range.1 <= self.byte_range.1
    }

    /// Span length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.byte_range.1 - self.byte_range.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.byte_range.0 == self.byte_range.1
    }
}

pub(crate) fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(file: &str, path: &str, range: (usize, usize)) -> Span {
        Span {
            id: SpanId::new(file, path),
            file_path: file.to_string(),
            byte_range: range,
            line_range: (1, 1),
            kind: SpanKind::Function,
            text: String::new(),
            parent: None,
            language: Some(Lang::Rust),
            content_hash: String::new(),
        }
    }

    #[test]
    fn id_splits_into_file_and_structure() {
        let id = SpanId::new("src/auth.rs", "Session.refresh");
        assert_eq!(id.as_str(), "src/auth.rs::Session.refresh");
        assert_eq!(id.file_path(), "src/auth.rs");
    }

    #[test]
    fn owned_by_requires_exact_file_boundary() {
        let id = SpanId::new("src/auth.rs", "login");
        assert!(id.owned_by("src/auth.rs"));
        assert!(!id.owned_by("src/auth"));
        assert!(!id.owned_by("src/auth.rs2"));
        assert!(!id.owned_by("src/other.rs"));
    }

    #[test]
    fn ids_order_lexicographically() {
        let a = SpanId::new("a.rs", "x");
        let b = SpanId::new("b.rs", "x");
        assert!(a < b);
    }

    #[test]
    fn contains_requires_proper_nesting() {
        let outer = span("f.rs", "outer", (0, 100));
        let inner = span("f.rs", "outer.inner", (10, 50));
        let other_file = span("g.rs", "x", (10, 50));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(!outer.contains(&other_file));
        assert!(!outer.contains(&outer));
    }

    #[test]
    fn len_and_is_empty() {
        let s = span("f.rs", "a", (10, 30));
        assert_eq!(s.len(), 20);
        assert!(!s.is_empty());
        assert!(span("f.rs", "b", (5, 5)).is_empty());
    }
}
