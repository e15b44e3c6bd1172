//! End-to-end tests: build a repository index with the deterministic
//! mock embedder, then retrieve through the fused orchestrator.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use quarry_embed::{EmbeddingProvider, MockEmbedder};
use quarry_index::{
    IndexBuilder, QueryOptions, Retriever, SearchFilters, Signal, SpanId, SpanKind,
};

const DIM: usize = 64;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn sample_repo(root: &Path) {
    write(
        root,
        "src/auth.rs",
        concat!(
            "fn foo(user: &str) -> bool {\n",
            "    validate_credentials(user)\n",
            "}\n",
            "\n",
            "fn check_token(token: &str) -> bool {\n",
            "    token.starts_with(\"sk-\")\n",
            "}\n",
        ),
    );
    write(
        root,
        "src/billing.rs",
        concat!(
            "fn bar(amount: u64) -> u64 {\n",
            "    amount + surcharge()\n",
            "}\n",
            "\n",
            "fn surcharge() -> u64 {\n",
            "    42\n",
            "}\n",
        ),
    );
    write(
        root,
        "scripts/report.py",
        concat!(
            "def monthly_report(rows):\n",
            "    return summarize(rows)\n",
            "\n",
            "def summarize(rows):\n",
            "    return len(rows)\n",
        ),
    );
}

async fn built(root: &Path) -> (Retriever, Arc<MockEmbedder>) {
    let provider = Arc::new(MockEmbedder::new(DIM));
    let builder = IndexBuilder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
    let (index, report) = builder.build(root).await.unwrap();
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
    (
        Retriever::new(Arc::new(index), Arc::clone(&provider) as Arc<dyn EmbeddingProvider>),
        provider,
    )
}

#[tokio::test]
async fn query_foo_ranks_foo_above_bar() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let (retriever, _) = built(dir.path()).await;

    let out = retriever
        .query("foo", &SearchFilters::default(), &QueryOptions::default())
        .await
        .unwrap();
    assert!(!out.is_empty());
    assert_eq!(out[0].id, SpanId::new("src/auth.rs", "foo"));

    let foo_pos = out.iter().position(|r| r.id.as_str() == "src/auth.rs::foo");
    let bar_pos = out.iter().position(|r| r.id.as_str() == "src/billing.rs::bar");
    if let (Some(f), Some(b)) = (foo_pos, bar_pos) {
        assert!(f < b);
    }
}

#[tokio::test]
async fn deleted_file_spans_never_resurface() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let provider = Arc::new(MockEmbedder::new(DIM));
    let builder = IndexBuilder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
    let (index, _) = builder.build(dir.path()).await.unwrap();
    let index = Arc::new(index);

    builder
        .update(&index, &[], &["src/billing.rs".to_string()])
        .await
        .unwrap();

    let retriever = Retriever::new(Arc::clone(&index), provider as Arc<dyn EmbeddingProvider>);
    let out = retriever
        .query("bar surcharge", &SearchFilters::default(), &QueryOptions::default())
        .await
        .unwrap();
    assert!(
        out.iter().all(|r| r.id.file_path() != "src/billing.rs"),
        "deleted file leaked into results: {out:?}"
    );
}

#[tokio::test]
async fn language_filter_restricts_to_python() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let (retriever, _) = built(dir.path()).await;

    let filters = SearchFilters {
        language: Some("python".into()),
        ..SearchFilters::default()
    };
    let out = retriever
        .query("summarize rows", &filters, &QueryOptions::default())
        .await
        .unwrap();
    assert!(!out.is_empty());
    assert!(out.iter().all(|r| r.id.file_path().ends_with(".py")));
}

#[tokio::test]
async fn kind_filter_excludes_file_spans() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    write(dir.path(), "README.txt", "authentication and billing notes\n");
    let (retriever, _) = built(dir.path()).await;

    let filters = SearchFilters {
        kind: Some(SpanKind::Function),
        ..SearchFilters::default()
    };
    let out = retriever
        .query("authentication", &filters, &QueryOptions::default())
        .await
        .unwrap();
    assert!(out.iter().all(|r| r.id.as_str() != "README.txt::file"));
}

#[tokio::test]
async fn results_are_bounded_by_k_and_never_padded() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let (retriever, _) = built(dir.path()).await;

    let one = QueryOptions {
        k: 1,
        ..QueryOptions::default()
    };
    let out = retriever
        .query("surcharge", &SearchFilters::default(), &one)
        .await
        .unwrap();
    assert_eq!(out.len(), 1);

    let many = QueryOptions {
        k: 500,
        ..QueryOptions::default()
    };
    let out = retriever
        .query("zzz_no_such_symbol_anywhere", &SearchFilters::default(), &many)
        .await
        .unwrap();
    assert!(out.len() < 500);
}

#[tokio::test]
async fn identical_queries_yield_identical_rankings() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let (retriever, _) = built(dir.path()).await;

    let mut runs = Vec::new();
    for _ in 0..3 {
        let out = retriever
            .query("validate credentials", &SearchFilters::default(), &QueryOptions::default())
            .await
            .unwrap();
        runs.push(
            out.iter()
                .map(|r| (r.id.clone(), r.score.to_bits()))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[1], runs[2]);
}

#[tokio::test]
async fn consensus_candidates_report_both_signals() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let (retriever, _) = built(dir.path()).await;

    let out = retriever
        .query("surcharge", &SearchFilters::default(), &QueryOptions::default())
        .await
        .unwrap();
    let hit = out
        .iter()
        .find(|r| r.id.as_str() == "src/billing.rs::surcharge")
        .expect("surcharge span retrieved");
    assert!(hit.matched_by.contains(&Signal::Lexical));
    assert!(hit.matched_by.contains(&Signal::Vector));
}

#[tokio::test]
async fn rebuild_after_edit_keeps_unchanged_ids_stable() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let provider = Arc::new(MockEmbedder::new(DIM));
    let builder = IndexBuilder::new(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>);
    let (index, _) = builder.build(dir.path()).await.unwrap();

    let before = index.get_span(&SpanId::new("src/auth.rs", "foo")).unwrap();
    write(
        dir.path(),
        "src/billing.rs",
        "fn bar(amount: u64) -> u64 { amount }\n",
    );
    builder
        .update(&index, &["src/billing.rs".to_string()], &[])
        .await
        .unwrap();

    let after = index.get_span(&SpanId::new("src/auth.rs", "foo")).unwrap();
    assert_eq!(before.content_hash, after.content_hash);
    assert_eq!(before.byte_range, after.byte_range);
}
