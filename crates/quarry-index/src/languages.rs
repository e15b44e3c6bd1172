//! Language detection and tree-sitter grammar registry.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::span::SpanKind;

/// Supported language with its tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
}

impl Lang {
    /// Identifier used in span records and query filters.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// Parse a language tag. Used to validate query filters.
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "rust" => Some(Self::Rust),
            "python" => Some(Self::Python),
            "javascript" => Some(Self::JavaScript),
            "typescript" => Some(Self::TypeScript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Map an AST node kind to the span kind it defines, or `None` for
    /// nodes that are not definitions (those coalesce into module
    /// blocks).
    #[must_use]
    pub fn definition_kind(self, node_kind: &str) -> Option<SpanKind> {
        match self {
            Self::Rust => match node_kind {
                "function_item" => Some(SpanKind::Function),
                "struct_item" | "enum_item" | "trait_item" | "impl_item" | "mod_item" => {
                    Some(SpanKind::Class)
                }
                _ => None,
            },
            Self::Python => match node_kind {
                "function_definition" | "decorated_definition" => Some(SpanKind::Function),
                "class_definition" => Some(SpanKind::Class),
                _ => None,
            },
            Self::JavaScript | Self::TypeScript => match node_kind {
                "function_declaration" | "method_definition" | "generator_function_declaration" => {
                    Some(SpanKind::Function)
                }
                "class_declaration" => Some(SpanKind::Class),
                _ => None,
            },
            Self::Go => match node_kind {
                "function_declaration" | "method_declaration" => Some(SpanKind::Function),
                "type_declaration" => Some(SpanKind::Class),
                _ => None,
            },
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("file")), None);
    }

    #[test]
    fn from_id_roundtrip() {
        for lang in [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Go,
        ] {
            assert_eq!(Lang::from_id(lang.id()), Some(lang));
            assert_eq!(lang.to_string(), lang.id());
        }
    }

    #[test]
    fn from_id_unknown_tag() {
        assert_eq!(Lang::from_id("cobol"), None);
        assert_eq!(Lang::from_id(""), None);
    }

    #[test]
    fn rust_definition_kinds() {
        assert_eq!(
            Lang::Rust.definition_kind("function_item"),
            Some(SpanKind::Function)
        );
        assert_eq!(
            Lang::Rust.definition_kind("impl_item"),
            Some(SpanKind::Class)
        );
        assert_eq!(Lang::Rust.definition_kind("use_declaration"), None);
    }

    #[test]
    fn python_definition_kinds() {
        assert_eq!(
            Lang::Python.definition_kind("class_definition"),
            Some(SpanKind::Class)
        );
        assert_eq!(Lang::Python.definition_kind("import_statement"), None);
    }

    #[test]
    fn grammar_returns_some_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
    }
}
