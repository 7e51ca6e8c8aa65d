//! End-to-end flows through the composed engines: NDJSON ingest, grounded
//! queries, re-ingestion, memory loading and personalized answers.

mod common;

use serde_json::json;
use wayfinder_core::models::{Degradation, QueryPath};
use wayfinder_core::RagError;
use wayfinder_server::subsystems::dispatch::RetrievalRequest;
use wayfinder_server::subsystems::engine::Corpus;

#[tokio::test]
async fn test_ingest_corpus_reports_and_becomes_ready() {
    let (state, _) = common::app();
    assert!(!state.documents.is_ready());

    let report = state
        .documents
        .ingest(Corpus::Ndjson(common::hotel_corpus()))
        .await
        .unwrap();

    let corpus = report.corpus.expect("NDJSON ingest carries a corpus report");
    assert_eq!(corpus.documents, 2);
    assert_eq!(corpus.malformed_lines, 1);
    assert_eq!(report.chunks_stored, report.datapoints_upserted);
    assert!(report.datapoints_upserted >= 2);
    assert!(state.documents.is_ready());
}

#[tokio::test]
async fn test_single_chunk_document_is_found_with_its_text() {
    let (state, _) = common::app();
    let doc = json!({
        "hotel_name": "Faena",
        "hotel_description": "Art deco hotel in Puerto Madero with a cabaret."
    });
    let path = common::temp_file("one.ndjson", &doc.to_string());
    state.documents.ingest(Corpus::Ndjson(path)).await.unwrap();

    let result = state
        .documents
        .query("Art deco hotel in Puerto Madero with a cabaret.", 1)
        .await;

    assert_eq!(result.path, QueryPath::Grounded);
    assert_eq!(result.hits.len(), 1);
    let hit = &result.hits[0];
    assert_eq!(hit.id, "one.ndjson_Faena_chunk_0");
    assert_eq!(hit.text, "Art deco hotel in Puerto Madero with a cabaret.");
    let stored = state.documents.store().get(&hit.id).await.unwrap();
    assert_eq!(stored.text, hit.text);
    assert!(result.context.starts_with("From hotel 'Faena' (chunk: one.ndjson_Faena_chunk_0):"));
    assert!(!result.response_text.is_empty());
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let (state, service) = common::app();
    let corpus = common::hotel_corpus();

    state.documents.ingest(Corpus::Ndjson(corpus.clone())).await.unwrap();
    let first = state.documents.store().len().await;
    state.documents.ingest(Corpus::Ndjson(corpus)).await.unwrap();

    assert_eq!(state.documents.store().len().await, first);
    let calls = service.call_counts().await;
    assert_eq!(calls.create_index, 1);
    assert_eq!(calls.deploy, 1);
}

#[tokio::test]
async fn test_missing_corpus_file_is_a_hard_error() {
    let (state, _) = common::app();
    let err = state
        .documents
        .ingest(Corpus::Ndjson("/nonexistent/wayfinder/corpus.ndjson".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Io(_)));
    assert!(!state.documents.is_ready());
}

#[tokio::test]
async fn test_query_before_any_ingest_is_a_rag_miss() {
    let (state, _) = common::app();
    let result = state.documents.query("Where can I dance tango?", 3).await;
    assert_eq!(result.path, QueryPath::RagMiss);
    assert_eq!(result.augmented_prompt, "Where can I dance tango?");
    assert!(!result.response_text.is_empty());
}

#[tokio::test]
async fn test_ask_before_memory_is_loaded_is_not_ready() {
    let (state, _) = common::app();
    state
        .documents
        .ingest(Corpus::Ndjson(common::hotel_corpus()))
        .await
        .unwrap();

    let err = state
        .composer
        .query_with_memory("tango", "user_001", 3)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::NotReady {
            documents: true,
            memory: false
        }
    ));
}

#[tokio::test]
async fn test_personalized_answer_uses_only_own_memory() {
    let (state, _) = common::loaded_app().await;

    let result = state
        .composer
        .query_with_memory("tango weekend in Recoleta", "user_001", 3)
        .await
        .unwrap();

    assert!(!result.response_text.is_empty());
    assert!(result.profile_summary.as_deref().unwrap_or_default().contains("Ana"));
    assert!(!result.personal_hits.is_empty());
    assert!(result
        .personal_hits
        .iter()
        .all(|h| h.meta_str("user_id") == Some("user_001")));
    assert!(!result.prompt.contains("Patagonia"));
    assert!(!result.document_hits.is_empty());
}

#[tokio::test]
async fn test_unknown_user_gets_document_only_answer() {
    let (state, _) = common::loaded_app().await;

    let result = state
        .composer
        .query_with_memory("boutique hotel in Palermo", "user_999", 3)
        .await
        .unwrap();

    assert!(!result.response_text.is_empty());
    assert!(result.personal_hits.is_empty());
    assert!(result.degradations.contains(&Degradation::NoProfile));
    assert!(result.degradations.contains(&Degradation::NoUserContext));
    assert!(result.prompt.contains("Magnolia"));
}

#[tokio::test]
async fn test_dispatcher_merges_documents_and_user_memory() {
    let (state, _) = common::loaded_app().await;

    let with_user = state
        .dispatcher
        .retrieve(&RetrievalRequest {
            query: "tango".to_string(),
            top_k: 10,
            user_id: Some("user_002".to_string()),
        })
        .await;
    assert!(with_user.failures.is_empty());
    assert!(with_user.hits.iter().any(|h| h.source == "documents"));
    assert!(with_user
        .hits
        .iter()
        .filter(|h| h.source == "user_memory")
        .all(|h| h.chunk.meta_str("user_id") == Some("user_002")));
    let distances: Vec<f32> = with_user.hits.iter().map(|h| h.chunk.distance).collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));

    // Without a user id the memory retriever refuses and documents still answer.
    let anonymous = state
        .dispatcher
        .retrieve(&RetrievalRequest {
            query: "tango".to_string(),
            top_k: 5,
            user_id: None,
        })
        .await;
    assert_eq!(anonymous.failures.len(), 1);
    assert_eq!(anonymous.failures[0].source, "user_memory");
    assert!(!anonymous.hits.is_empty());
}

#[tokio::test]
async fn test_insights_come_from_the_users_own_chunks() {
    let (state, _) = common::loaded_app().await;
    let insights = state
        .composer
        .personalization_insights("user_002", "past trip trekking Patagonia")
        .await
        .unwrap();

    assert!(insights.has_user_context);
    assert!(insights
        .relevant_experiences
        .iter()
        .all(|e| e.destination.as_deref() == Some("Patagonia")));
    assert!(insights.profile_summary.unwrap_or_default().contains("Ben"));
}

#[tokio::test]
async fn test_user_memory_retriever_refuses_ndjson_corpora() {
    let (state, _) = common::app();

    let err = state
        .dispatcher
        .ingest("user_memory", Corpus::Ndjson(common::hotel_corpus()))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert!(state.composer.memory().store().is_empty().await);

    let report = state
        .dispatcher
        .ingest("documents", Corpus::Ndjson(common::hotel_corpus()))
        .await
        .unwrap();
    assert!(report.datapoints_upserted >= 2);
    assert!(state.documents.is_ready());
}
