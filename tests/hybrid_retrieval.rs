//! End-to-end tests driving the engine through its public API with the
//! deterministic hash embedder.

use std::sync::Arc;

use hybrid_rag::{
    AccessScope, Decision, Document, DocumentStore, Engine, EngineConfig, HashEmbedder,
    InMemoryDenseIndex, InMemorySparseIndex, JobStatus, ReindexJobManager,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn engine_with_threshold(tmp: &TempDir, hit_threshold: f32) -> Engine {
    init_tracing();
    let store = Arc::new(DocumentStore::open(tmp.path()).await.unwrap());
    Engine::new(
        EngineConfig {
            chunk_size: 120,
            chunk_overlap: 20,
            hit_threshold,
            ..EngineConfig::default()
        },
        store,
        Arc::new(HashEmbedder::default()),
        Arc::new(InMemoryDenseIndex::new()),
        Arc::new(InMemorySparseIndex::new()),
        Arc::new(ReindexJobManager::new(1)),
    )
    .unwrap()
}

fn document(doc_id: &str, title: &str, scope: AccessScope, text: &str) -> Document {
    Document {
        doc_id: doc_id.to_string(),
        title: title.to_string(),
        source: "test".to_string(),
        doc_type: "txt".to_string(),
        version: String::new(),
        access_scope: scope,
        text: text.to_string(),
    }
}

#[tokio::test]
async fn exact_phrase_query_is_a_hit_with_scores_populated() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.2).await;

    engine
        .ingest(document(
            "runbook",
            "Incident Runbook",
            AccessScope::Public,
            "when paged, check the secret phrase dashboard first and page the on-call lead",
        ))
        .await
        .unwrap();
    engine
        .ingest(document(
            "lunch",
            "Lunch Menu",
            AccessScope::Public,
            "soup and sandwiches are served at noon in the cafeteria",
        ))
        .await
        .unwrap();

    let response = engine
        .query("secret phrase", 5, Some(AccessScope::Public))
        .await
        .unwrap();

    assert_eq!(response.decision, Decision::Hit);
    let top = &response.topk[0];
    assert_eq!(top.doc_id, "runbook");
    assert!(top.score_sparse > 0.0);
    assert!(top.score_fused >= 0.2);
    assert!(top.score_fused >= response.topk.last().unwrap().score_fused);
}

#[tokio::test]
async fn unrelated_query_is_no_hit_with_populated_topk() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.9).await;

    engine
        .ingest(document(
            "doc",
            "Doc",
            AccessScope::Public,
            "entirely unrelated content about gardening and soil ph levels",
        ))
        .await
        .unwrap();

    let response = engine
        .query("quarterly revenue forecast", 5, Some(AccessScope::Public))
        .await
        .unwrap();

    // Candidates are still returned for diagnostics; only the flag says
    // they are not good enough to show.
    assert_eq!(response.decision, Decision::NoHit);
    assert!(!response.topk.is_empty());
    assert!(response.topk[0].score_fused < 0.9);
}

#[tokio::test]
async fn private_documents_never_appear_in_public_queries() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.0).await;

    engine
        .ingest(document(
            "salary",
            "Salary Bands",
            AccessScope::Private,
            "salary bands for engineering are confidential",
        ))
        .await
        .unwrap();
    engine
        .ingest(document(
            "careers",
            "Careers Page",
            AccessScope::Public,
            "engineering roles are open across all bands",
        ))
        .await
        .unwrap();

    let response = engine
        .query("engineering salary bands", 10, Some(AccessScope::Public))
        .await
        .unwrap();
    assert!(!response.topk.is_empty());
    assert!(response.topk.iter().all(|hit| hit.doc_id != "salary"));

    // Without a scope restriction the private document is reachable.
    let unrestricted = engine
        .query("engineering salary bands", 10, None)
        .await
        .unwrap();
    assert!(unrestricted.topk.iter().any(|hit| hit.doc_id == "salary"));
}

#[tokio::test]
async fn double_ingestion_is_idempotent_for_the_index() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.0).await;
    let text = "the quick brown fox jumps over the lazy dog near the river bank every single morning";

    let first = engine
        .ingest(document("d", "D", AccessScope::Public, text))
        .await
        .unwrap();
    let second = engine
        .ingest(document("d", "D", AccessScope::Public, text))
        .await
        .unwrap();
    assert!(second.skipped_unchanged);

    let response = engine
        .query("quick brown fox", 50, Some(AccessScope::Public))
        .await
        .unwrap();
    assert_eq!(response.topk.len(), first.indexed_chunks);
}

#[tokio::test]
async fn versions_accumulate_and_revert_restores_old_content() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.2).await;

    engine
        .ingest(document(
            "policy",
            "Policy",
            AccessScope::Public,
            "rotate keys every ninety days",
        ))
        .await
        .unwrap();
    engine
        .ingest(document(
            "policy",
            "Policy",
            AccessScope::Public,
            "rotate credentials annually instead",
        ))
        .await
        .unwrap();

    let versions = engine.store().list_versions("policy").await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, "v1");
    assert_eq!(versions[1].version, "v2");

    assert!(engine.revert_document("policy", "v1").await.unwrap());

    let current = engine.store().load("policy").await.unwrap().unwrap();
    assert!(current.text.contains("ninety days"));
    // The revert is itself a new version, never a history rewrite.
    assert_eq!(engine.store().list_versions("policy").await.unwrap().len(), 3);

    let response = engine
        .query("ninety days", 5, Some(AccessScope::Public))
        .await
        .unwrap();
    assert_eq!(response.decision, Decision::Hit);
}

#[tokio::test]
async fn background_reindex_is_polled_to_completion() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.2).await;

    for i in 0..3 {
        engine
            .ingest(document(
                &format!("doc-{i}"),
                "Doc",
                AccessScope::Public,
                "shared corpus text for the reindex pass",
            ))
            .await
            .unwrap();
    }

    let job_id = engine.start_reindex();
    // Immediately after start the job is observable.
    assert!(engine.job_status(&job_id).is_some());

    let mut record = None;
    for _ in 0..200 {
        let snapshot = engine.job_status(&job_id).unwrap();
        if snapshot.status != JobStatus::Running {
            record = Some(snapshot);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    let record = record.expect("reindex job never finished");

    assert_eq!(record.status, JobStatus::Finished);
    let report = record.result.unwrap();
    assert_eq!(report.reindexed_documents, 3);
    assert!(report.reindexed_chunks > 0);

    assert!(engine.job_status("bogus-id").is_none());
}

#[tokio::test]
async fn concurrent_ingestion_assigns_distinct_versions() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.0).await;

    let reports = futures::future::join_all((0..8).map(|i| {
        let engine = engine.clone();
        async move {
            engine
                .ingest(document(
                    "shared",
                    "Shared",
                    AccessScope::Public,
                    &format!("revision number {i} of the shared document"),
                ))
                .await
                .unwrap()
        }
    }))
    .await;

    let mut versions: Vec<String> = reports.into_iter().map(|r| r.version).collect();
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), 8);
    assert_eq!(engine.store().list_versions("shared").await.unwrap().len(), 8);
}

#[tokio::test]
async fn citations_map_answers_back_to_retrieved_chunks() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with_threshold(&tmp, 0.0).await;

    engine
        .ingest(document(
            "handbook",
            "Security Handbook",
            AccessScope::Public,
            "rotate keys every 90 days",
        ))
        .await
        .unwrap();

    let response = engine
        .query("key rotation schedule", 5, Some(AccessScope::Public))
        .await
        .unwrap();
    assert!(!response.topk.is_empty());

    let answer = "According to the Security Handbook, rotate keys every 90 days.";
    let citations = engine.citations(answer, &response.topk);
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0].doc_id, "handbook");

    let uncited = engine.citations("no overlap with any source", &response.topk);
    assert!(uncited.is_empty());
}
