use kg_core::session::TaskSession;
use kg_core::tool::{Tool, ToolError};
use kg_store::tool::{ENTITY_DESCRIPTION_CHARS, MAX_PREDICATES, NO_MATCHES, PAGE_SIZE};
use kg_store::{GraphStore, KnowledgeGraphTool, MemoryStore, StoreError};
use serde_json::{Map, Value, json};
use std::sync::Arc;

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn basketball_store() -> MemoryStore {
    MemoryStore::new()
        .with_label("Q41421", "Michael Jordan")
        .with_description("Q41421", "American basketball player")
        .with_description("Q41421", "businessman")
        .with_label("Q128109", "Chicago Bulls")
        .with_description("Q128109", "NBA team based in Chicago")
        .with_label("P54", "member of sports team")
        .with_description("P54", "sports teams or clubs that the subject represents")
        .with_label("P27", "country of citizenship")
        .with_triple("Q41421", "P54", "Q128109")
        .with_triple("Q41421", "P27", "Q30")
}

fn tool_over(store: MemoryStore) -> (Arc<MemoryStore>, KnowledgeGraphTool) {
    let store = Arc::new(store);
    let dyn_store: Arc<dyn GraphStore> = store.clone();
    (store, KnowledgeGraphTool::new(dyn_store, 10))
}

#[tokio::test]
async fn test_search_records_returned_ids() {
    let (_, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke(
            "search_entities",
            args(json!({"query": "michael jordan"})),
            &mut session,
        )
        .await
        .unwrap();

    assert!(!out.terminal);
    assert!(out.value.get("Q41421").is_some());
    assert!(session.provenance.contains("Q41421"));
}

#[tokio::test]
async fn test_search_without_matches_returns_literal_text() {
    let (_, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke("search_predicates", args(json!({"query": "zzz"})), &mut session)
        .await
        .unwrap();

    assert_eq!(out.value, Value::String(NO_MATCHES.to_string()));
    assert!(session.provenance.is_empty());
}

#[tokio::test]
async fn test_missing_id_stops_after_existence_check() {
    let (store, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    for (capability, params) in [
        ("get_entity_description", json!({"entity_id": "Q999"})),
        ("get_predicates_with_subject", json!({"entity_id": "Q999"})),
        ("get_predicates_with_object", json!({"entity_id": "Q999"})),
        ("get_predicate_description", json!({"predicate_id": "P999"})),
        ("get_subject_entities", json!({"predicate_id": "P999"})),
        ("get_object_entities", json!({"predicate_id": "P999"})),
    ] {
        let before = store.query_count();
        let out = tool
            .invoke(capability, args(params), &mut session)
            .await
            .unwrap();
        let text = out.value.as_str().unwrap_or_default().to_string();
        assert!(text.contains("not found"), "{capability}: {text}");
        assert_eq!(store.query_count(), before + 1, "{capability}");
    }
    assert!(session.provenance.is_empty());
}

#[tokio::test]
async fn test_malformed_id_never_reaches_store() {
    let (store, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke(
            "get_entity_description",
            args(json!({"entity_id": "Q1> ?p ?o } #"})),
            &mut session,
        )
        .await
        .unwrap();

    assert!(out.value.as_str().unwrap().contains("not a valid entity identifier"));
    assert_eq!(store.query_count(), 0);
}

#[tokio::test]
async fn test_entity_description_is_joined() {
    let (_, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke(
            "get_entity_description",
            args(json!({"entity_id": "Q41421"})),
            &mut session,
        )
        .await
        .unwrap();

    assert_eq!(out.value, json!("American basketball player, businessman"));
    assert!(session.provenance.contains("Q41421"));
}

#[tokio::test]
async fn test_long_description_is_truncated() {
    let long = "x".repeat(ENTITY_DESCRIPTION_CHARS + 50);
    let store = MemoryStore::new().with_description("Q1", &long);
    let (_, tool) = tool_over(store);
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke("get_entity_description", args(json!({"entity_id": "Q1"})), &mut session)
        .await
        .unwrap();

    assert_eq!(
        out.value.as_str().unwrap().chars().count(),
        ENTITY_DESCRIPTION_CHARS
    );
}

#[tokio::test]
async fn test_predicates_with_subject_are_capped_and_recorded() {
    let mut store = MemoryStore::new();
    for p in 1..=8 {
        store = store.with_triple("Q1", &format!("P{p}"), "Q2");
    }
    let (_, tool) = tool_over(store);
    let mut session = TaskSession::new(None);

    let out = tool
        .invoke(
            "get_predicates_with_subject",
            args(json!({"entity_id": "Q1"})),
            &mut session,
        )
        .await
        .unwrap();

    let map = out.value.as_object().unwrap();
    assert_eq!(map.len(), MAX_PREDICATES);
    for pid in map.keys() {
        assert!(session.provenance.contains(pid));
    }
    assert_eq!(session.provenance.len(), MAX_PREDICATES);
}

#[tokio::test]
async fn test_subject_entities_page_is_bounded() {
    let mut store = MemoryStore::new();
    for q in 1..=12 {
        store = store.with_triple(&format!("Q{q}"), "P31", "Q5");
    }
    let (_, tool) = tool_over(store);

    for _ in 0..20 {
        let mut session = TaskSession::new(None);
        let out = tool
            .invoke(
                "get_subject_entities",
                args(json!({"predicate_id": "P31"})),
                &mut session,
            )
            .await
            .unwrap();
        let map = out.value.as_object().unwrap();
        assert!(!map.is_empty());
        assert!(map.len() as u64 <= PAGE_SIZE);
        assert_eq!(session.provenance.len(), map.len());
    }
}

#[tokio::test]
async fn test_provenance_only_grows_across_calls() {
    let (_, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);
    let mut last = 0;

    for (capability, params) in [
        ("search_entities", json!({"query": "bulls"})),
        ("get_predicates_with_subject", json!({"entity_id": "Q41421"})),
        ("search_entities", json!({"query": "nothing here"})),
        ("get_object_entities", json!({"predicate_id": "P54"})),
    ] {
        tool.invoke(capability, args(params), &mut session)
            .await
            .unwrap();
        assert!(session.provenance.len() >= last);
        last = session.provenance.len();
    }
    assert!(session.provenance.contains("Q128109"));
    assert!(session.provenance.contains("P54"));
}

#[tokio::test]
async fn test_bad_arguments_are_invalid_arguments() {
    let (_, tool) = tool_over(basketball_store());
    let mut session = TaskSession::new(None);

    let err = tool
        .invoke("search_entities", args(json!({"text": "x"})), &mut session)
        .await
        .unwrap_err();

    assert!(matches!(err, ToolError::InvalidArguments { .. }));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_store_outage_is_fatal_and_records_nothing() {
    let store = basketball_store().with_failure(StoreError::ConnectionFailed("refused".into()));
    let (_, tool) = tool_over(store);
    let mut session = TaskSession::new(None);

    let err = tool
        .invoke(
            "search_entities",
            args(json!({"query": "michael jordan"})),
            &mut session,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ToolError::ConnectionFailed(_)));
    assert!(err.is_fatal());
    assert!(session.provenance.is_empty());
}
