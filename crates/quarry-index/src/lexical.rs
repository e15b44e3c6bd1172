//! Lexical span index: fuzzy symbol and path matching.

use std::collections::BTreeMap;

use nucleo_matcher::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32Str};

use crate::span::{Span, SpanId};

/// Weight of a definition-name match relative to path/token matches.
const NAME_WEIGHT: f32 = 2.0;

/// Flat bonus per query token that matches a symbol exactly. Large
/// enough that any exact hit outranks a purely fuzzy one.
const EXACT_BONUS: f32 = 1000.0;

/// Cap on identifier tokens kept per span.
const MAX_TOKENS: usize = 96;

struct LexDoc {
    /// Last segment of the structural path, lowercased.
    name: String,
    path: String,
    /// Deduplicated identifier tokens from the span text, lowercased.
    tokens: Vec<String>,
    /// Tokens joined for one fuzzy pass instead of per-token scoring.
    haystack: String,
    /// Name + path + tokens in one string. Every pattern atom must
    /// land in a single haystack, so a multi-word query whose atoms
    /// hit different fields still needs somewhere to match whole.
    combined: String,
}

/// Symbol-level index over span names, file paths, and identifier
/// tokens. Complements the vector store for queries that name code
/// directly, where fuzzy matching beats embedding similarity.
#[derive(Default)]
pub struct LexicalIndex {
    docs: BTreeMap<SpanId, LexDoc>,
}

impl LexicalIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn insert(&mut self, span: &Span) {
        let name = span
            .id
            .as_str()
            .rsplit("::")
            .next()
            .and_then(|s| s.rsplit('.').next())
            .unwrap_or_default()
            .to_lowercase();
        let path = span.file_path.to_lowercase();
        let tokens = tokenize(&span.text);
        let haystack = tokens.join(" ");
        let combined = format!("{name} {path} {haystack}");
        self.docs.insert(
            span.id.clone(),
            LexDoc {
                name,
                path,
                tokens,
                haystack,
                combined,
            },
        );
    }

    pub fn remove(&mut self, id: &SpanId) -> bool {
        self.docs.remove(id).is_some()
    }

    /// Remove every span owned by `file_path`. Returns the count.
    pub fn remove_file(&mut self, file_path: &str) -> usize {
        let before = self.docs.len();
        self.docs.retain(|id, _| !id.owned_by(file_path));
        before - self.docs.len()
    }

    /// Top `k` spans for `query`, score descending, span id ascending
    /// on ties. Exact symbol matches carry a flat bonus so they always
    /// outrank fuzzy-only hits. Spans scoring zero are dropped.
    #[must_use]
    pub fn search(&self, query: &str, k: usize) -> Vec<(SpanId, f32)> {
        let query = query.trim();
        if query.is_empty() || k == 0 || self.docs.is_empty() {
            return vec![];
        }

        let mut matcher = Matcher::new(Config::DEFAULT);
        let pattern = Pattern::new(
            query,
            CaseMatching::Ignore,
            Normalization::Smart,
            AtomKind::Fuzzy,
        );
        let query_tokens = tokenize(query);
        let mut buf = Vec::new();

        let mut scored: Vec<(SpanId, f32, usize)> = self
            .docs
            .iter()
            .filter_map(|(id, doc)| {
                let name_score = fuzzy(&pattern, &mut matcher, &mut buf, &doc.name);
                let path_score = fuzzy(&pattern, &mut matcher, &mut buf, &doc.path);
                let token_score = fuzzy(&pattern, &mut matcher, &mut buf, &doc.haystack);
                let combined_score = fuzzy(&pattern, &mut matcher, &mut buf, &doc.combined);

                let exact = query_tokens
                    .iter()
                    .filter(|t| doc.name == **t || doc.tokens.contains(t))
                    .count();

                #[allow(clippy::cast_precision_loss)]
                let score = NAME_WEIGHT * name_score
                    + path_score
                    + token_score
                    + combined_score
                    + exact as f32 * EXACT_BONUS;
                if score <= 0.0 {
                    return None;
                }
                Some((id.clone(), score, exact))
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored.into_iter().map(|(id, score, _)| (id, score)).collect()
    }
}

fn fuzzy(pattern: &Pattern, matcher: &mut Matcher, buf: &mut Vec<char>, haystack: &str) -> f32 {
    if haystack.is_empty() {
        return 0.0;
    }
    pattern
        .score(Utf32Str::new(haystack, buf), matcher)
        .map_or(0.0, |s| s as f32)
}

/// Identifier tokens: `[A-Za-z_][A-Za-z0-9_]*` runs of length >= 3,
/// lowercased, first occurrence kept.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            push_token(&mut tokens, &mut current);
            if tokens.len() >= MAX_TOKENS {
                return tokens;
            }
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &mut current);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, current: &mut String) {
    let token = std::mem::take(current);
    if token.len() >= 3
        && !token.starts_with(|c: char| c.is_ascii_digit())
        && !tokens.contains(&token)
    {
        tokens.push(token);
    }
}
