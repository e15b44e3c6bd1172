//! Syntax-tree span extraction.
//!
//! A file's top-level spans tile its byte range exactly: the first
//! starts at 0, each starts where the previous one ends, the last ends
//! at the file's length. Definition nodes (functions, classes) become
//! their own spans — absorbing any leading trivia up to the previous
//! boundary — and consecutive non-definition statements coalesce into
//! module-block spans. Nested definitions produce child spans with
//! exact node ranges, contained in their parent.

use std::collections::HashMap;

use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::span::{Span, SpanId, SpanKind, blake3_hex};

/// Parse a source file and extract its spans.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] if no grammar is available, the parse
/// fails outright, or the tree contains syntax errors. Callers fall
/// back to [`whole_file_span`].
pub fn extract(file_path: &str, source: &str, lang: Lang) -> Result<Vec<Span>> {
    let grammar = lang
        .grammar()
        .ok_or_else(|| IndexError::Parse(format!("no grammar for {}", lang.id())))?;

    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| IndexError::Parse(format!("parse failed for {file_path}")))?;

    let root = tree.root_node();
    if root.has_error() {
        return Err(IndexError::Parse(format!("syntax errors in {file_path}")));
    }

    if source.is_empty() {
        return Ok(vec![]);
    }

    let ctx = ExtractCtx {
        source,
        file_path,
        lang,
        line_starts: line_starts(source),
    };

    let mut spans = Vec::new();
    extract_top_level(&ctx, &root, &mut spans);

    // No named children at all (e.g. a file of only whitespace as far
    // as the grammar is concerned): index it as one file span.
    if spans.is_empty() {
        spans.push(whole_file_span(file_path, source, Some(lang)));
    }

    Ok(spans)
}

/// Single span covering the entire file. Fallback for unsupported
/// languages and unparseable sources.
#[must_use]
pub fn whole_file_span(file_path: &str, source: &str, language: Option<Lang>) -> Span {
    let lines = source.lines().count().max(1);
    Span {
        id: SpanId::new(file_path, "file"),
        file_path: file_path.to_string(),
        byte_range: (0, source.len()),
        line_range: (1, lines),
        kind: SpanKind::File,
        text: source.to_string(),
        parent: None,
        language,
        content_hash: blake3_hex(source),
    }
}

struct ExtractCtx<'a> {
    source: &'a str,
    file_path: &'a str,
    lang: Lang,
    line_starts: Vec<usize>,
}

enum Segment<'t> {
    Definition { node: Node<'t>, kind: SpanKind },
    ModuleBlock { first_start: usize },
}

impl Segment<'_> {
    fn first_start(&self) -> usize {
        match self {
            Segment::Definition { node, .. } => node.start_byte(),
            Segment::ModuleBlock { first_start } => *first_start,
        }
    }
}

fn extract_top_level(ctx: &ExtractCtx<'_>, root: &Node, out: &mut Vec<Span>) {
    let mut segments: Vec<Segment> = Vec::new();
    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);

    for i in 0..child_count {
        let Some(child) = root.named_child(i) else {
            continue;
        };
        if let Some(kind) = ctx.lang.definition_kind(child.kind()) {
            segments.push(Segment::Definition { node: child, kind });
        } else if !matches!(segments.last(), Some(Segment::ModuleBlock { .. })) {
            segments.push(Segment::ModuleBlock {
                first_start: child.start_byte(),
            });
        }
    }

    if segments.is_empty() {
        return;
    }

    let mut names = NameDedup::default();
    let mut block_ordinal = 0usize;

    for i in 0..segments.len() {
        // Tiling boundaries: the first segment absorbs leading trivia,
        // every other segment starts at its own first node, and each
        // segment runs to the start of the next (or EOF).
        let start = if i == 0 { 0 } else { segments[i].first_start() };
        let end = segments
            .get(i + 1)
            .map_or(ctx.source.len(), Segment::first_start);

        match &segments[i] {
            Segment::Definition { node, kind } => {
                let resolved = resolve_def(*node);
                // A decorated definition may wrap a class; the resolved
                // node decides the kind.
                let kind = ctx.lang.definition_kind(resolved.kind()).unwrap_or(*kind);
                let name = entity_name(&resolved, ctx.source)
                    .unwrap_or_else(|| format!("{}@{i}", node.kind()));
                let path = names.disambiguate(&name);
                let id = SpanId::new(ctx.file_path, &path);
                out.push(make_span(ctx, &id, (start, end), kind, None));

                let mut child_names = NameDedup::default();
                collect_nested(ctx, &resolved, &path, &id, &mut child_names, out);
            }
            Segment::ModuleBlock { .. } => {
                let id = SpanId::new(ctx.file_path, &format!("block@{block_ordinal}"));
                block_ordinal += 1;
                out.push(make_span(ctx, &id, (start, end), SpanKind::Module, None));
            }
        }
    }
}

/// Walk a definition's subtree collecting nested definitions as child
/// spans. Nested spans use exact node ranges; only siblings must not
/// overlap.
fn collect_nested(
    ctx: &ExtractCtx<'_>,
    node: &Node,
    parent_path: &str,
    parent_id: &SpanId,
    names: &mut NameDedup,
    out: &mut Vec<Span>,
) {
    let child_count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    for i in 0..child_count {
        let Some(child) = node.named_child(i) else {
            continue;
        };
        if let Some(kind) = ctx.lang.definition_kind(child.kind()) {
            let resolved = resolve_def(child);
            let kind = ctx.lang.definition_kind(resolved.kind()).unwrap_or(kind);
            let name = entity_name(&resolved, ctx.source)
                .unwrap_or_else(|| format!("{}@{i}", child.kind()));
            let path = format!("{parent_path}.{}", names.disambiguate(&name));
            let id = SpanId::new(ctx.file_path, &path);
            out.push(make_span(
                ctx,
                &id,
                (child.start_byte(), child.end_byte()),
                kind,
                Some(parent_id.clone()),
            ));

            let mut child_names = NameDedup::default();
            collect_nested(ctx, &resolved, &path, &id, &mut child_names, out);
        } else {
            collect_nested(ctx, &child, parent_path, parent_id, names, out);
        }
    }
}

fn make_span(
    ctx: &ExtractCtx<'_>,
    id: &SpanId,
    byte_range: (usize, usize),
    kind: SpanKind,
    parent: Option<SpanId>,
) -> Span {
    let text = &ctx.source[byte_range.0..byte_range.1];
    let line_start = line_of(&ctx.line_starts, byte_range.0);
    let line_end = line_of(
        &ctx.line_starts,
        byte_range.1.saturating_sub(1).max(byte_range.0),
    );
    Span {
        id: id.clone(),
        file_path: ctx.file_path.to_string(),
        byte_range,
        line_range: (line_start, line_end),
        kind,
        text: text.to_string(),
        parent,
        language: Some(ctx.lang),
        content_hash: blake3_hex(text),
    }
}

/// `decorated_definition` (Python) wraps the real definition; name and
/// nested walk come from the inner node.
fn resolve_def(node: Node) -> Node {
    if node.kind() == "decorated_definition"
        && let Some(inner) = node.child_by_field_name("definition")
    {
        return inner;
    }
    node
}

fn entity_name(node: &Node, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses the "type" field, most grammars
    // use "name".
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .map(|n| source[n.byte_range()].to_string())
}

/// Appends `#2`, `#3`, ... to repeated names within one scope so ids
/// stay unique, keeping the first occurrence unsuffixed. Stable for
/// unchanged content.
#[derive(Default)]
struct NameDedup {
    seen: HashMap<String, usize>,
}

impl NameDedup {
    fn disambiguate(&mut self, name: &str) -> String {
        let count = self.seen.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            name.to_string()
        } else {
            format!("{name}#{count}")
        }
    }
}

fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// 1-based line number containing `byte`.
fn line_of(starts: &[usize], byte: usize) -> usize {
    starts.partition_point(|&s| s <= byte)
}
