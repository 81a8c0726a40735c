//! End-to-end scenarios across the whole engine: append, threshold
//! compaction, dedupe, retrieval and budgeted context builds.

use async_trait::async_trait;
use std::sync::Arc;
use strata_config::EngineConfig;
use strata_core::{
    AssemblyError, CompactError, Error, ExtractedFacts, HeuristicCounter, Role, SessionId, Turn,
};
use strata_engine::{CompactionOutcome, FactExtractor, MemoryEngine, RuleBasedExtractor};
use tempfile::TempDir;
use tokio::sync::Notify;

async fn engine_with(configure: impl FnOnce(&mut EngineConfig)) -> (TempDir, MemoryEngine) {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.storage.db_path = format!("sqlite://{}/test.db", dir.path().display());
    config.storage.workspace = dir.path().join("workspace");
    configure(&mut config);
    let engine = MemoryEngine::with_parts(
        config,
        Arc::new(HeuristicCounter),
        Arc::new(RuleBasedExtractor),
    )
    .await
    .unwrap();
    (dir, engine)
}

async fn default_engine() -> (TempDir, MemoryEngine) {
    engine_with(|_| {}).await
}

#[tokio::test]
async fn threshold_compaction_leaves_newer_turns_untouched() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");

    let mut compaction = None;
    let mut ids = Vec::new();
    for i in 1..=16 {
        let out = engine
            .append_turn(&s, Role::User, None, &format!("fact number {i} is recorded"))
            .await
            .unwrap();
        ids.push(out.turn.id);
        if let Some(handle) = out.compaction {
            assert!(compaction.is_none(), "compaction must fire exactly once");
            assert_eq!(i, 15, "default threshold is 15 turns");
            compaction = Some(handle.await.unwrap().unwrap());
        }
    }

    let report = compaction.expect("threshold must have fired");
    assert_eq!(report.outcome, CompactionOutcome::Completed);
    assert_eq!(report.turns_processed, 15);
    let range = report.range.unwrap();
    assert_eq!(range.first, ids[0]);
    assert_eq!(range.last, ids[14]);

    // Turn 16 stays in the short-term buffer
    assert_eq!(engine.store().count_unsummarized(&s).await.unwrap(), 1);
    let summary = engine.store().latest_summary(&s).await.unwrap().unwrap();
    assert!(summary.range.contains(ids[14]));
    assert!(!summary.range.contains(ids[15]));
}

/// Delegates to the rule-based extractor, but only once released.
struct GatedExtractor {
    gate: Arc<Notify>,
}

#[async_trait]
impl FactExtractor for GatedExtractor {
    async fn extract(&self, turns: &[Turn]) -> Result<ExtractedFacts, CompactError> {
        self.gate.notified().await;
        RuleBasedExtractor.extract(turns).await
    }
}

#[tokio::test]
async fn threshold_compaction_runs_off_the_append_path() {
    let gate = Arc::new(Notify::new());
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.storage.db_path = format!("sqlite://{}/test.db", dir.path().display());
    config.storage.workspace = dir.path().join("workspace");
    config.compaction.every_turns = 3;
    let engine = MemoryEngine::with_parts(
        config,
        Arc::new(HeuristicCounter),
        Arc::new(GatedExtractor { gate: gate.clone() }),
    )
    .await
    .unwrap();
    let s = SessionId::from("s1");

    let mut handle = None;
    for i in 1..=3 {
        let out = engine
            .append_turn(&s, Role::User, None, &format!("note {i} is on record"))
            .await
            .unwrap();
        if out.compaction.is_some() {
            handle = out.compaction;
        }
    }
    let handle = handle.expect("threshold must have fired");

    // Append returned while extraction is still held at the gate: nothing
    // has been summarized yet
    assert_eq!(engine.store().count_unsummarized(&s).await.unwrap(), 3);

    gate.notify_one();
    let report = handle.await.unwrap().unwrap();
    assert_eq!(report.outcome, CompactionOutcome::Completed);
    assert_eq!(report.turns_processed, 3);
    assert_eq!(engine.store().count_unsummarized(&s).await.unwrap(), 0);
}

#[tokio::test]
async fn turn_ids_are_monotonic_across_sessions() {
    let (_dir, engine) = default_engine().await;
    let s1 = SessionId::from("s1");
    let s2 = SessionId::from("s2");

    let mut per_session: Vec<(SessionId, i64)> = Vec::new();
    for i in 0..6 {
        let session = if i % 2 == 0 { &s1 } else { &s2 };
        let out = engine
            .append_turn(session, Role::User, None, "interleaved")
            .await
            .unwrap();
        per_session.push((session.clone(), out.turn.id));
    }
    for session in [&s1, &s2] {
        let ids: Vec<i64> = per_session
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, id)| *id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}

#[tokio::test]
async fn verbatim_restatement_is_a_document_noop() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");

    engine
        .append_turn(&s, Role::User, None, "I prefer short answers")
        .await
        .unwrap();
    let first = engine.trigger_compaction(&s).await.unwrap();
    assert!(first.document_changed);

    engine
        .append_turn(&s, Role::User, None, "I prefer short answers")
        .await
        .unwrap();
    let second = engine.trigger_compaction(&s).await.unwrap();
    assert_eq!(second.outcome, CompactionOutcome::Completed);
    assert!(
        !second.document_changed,
        "identical content must skip the write and the reindex"
    );
    assert!(second.sections_touched.is_empty());
}

#[tokio::test]
async fn retrigger_after_compaction_processes_zero_turns() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");
    engine
        .append_turn(&s, Role::User, None, "we decided to ship on friday")
        .await
        .unwrap();

    assert_eq!(
        engine.trigger_compaction(&s).await.unwrap().outcome,
        CompactionOutcome::Completed
    );
    let again = engine.trigger_compaction(&s).await.unwrap();
    assert_eq!(again.outcome, CompactionOutcome::NothingToDo);
    assert_eq!(again.turns_processed, 0);
}

#[tokio::test]
async fn search_spans_turns_and_compacted_memory() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");

    engine
        .append_turn(&s, Role::Assistant, None, "the deployment target is kubernetes")
        .await
        .unwrap();
    engine.trigger_compaction(&s).await.unwrap();
    engine
        .append_turn(&s, Role::User, None, "check the kubernetes dashboard")
        .await
        .unwrap();

    // Hits from both the live turn and the permanent chunk
    let hits = engine.search("kubernetes", None, 10).await.unwrap();
    assert!(hits.len() >= 2);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn context_includes_summary_when_buffer_is_short() {
    let (_dir, engine) = engine_with(|c| {
        c.compaction.every_turns = 5;
        c.assembly.short_term_cap = 3;
    })
    .await;
    let s = SessionId::from("s1");

    for i in 1..=5 {
        let out = engine
            .append_turn(&s, Role::User, None, &format!("decision {i} was made early"))
            .await
            .unwrap();
        if let Some(handle) = out.compaction {
            handle.await.unwrap().unwrap();
        }
    }
    // Threshold hit at 5; now four fresh turns, one more than the cap
    for i in 1..=4 {
        engine
            .append_turn(&s, Role::User, None, &format!("recent message {i}"))
            .await
            .unwrap();
    }

    let payload = engine.build_context(&s, None, None).await.unwrap();
    assert!(payload.text.contains("[Recent Conversation]"));
    assert!(payload.text.contains("recent message 4"));
    assert!(
        !payload.text.contains("recent message 1"),
        "buffer cap is 3"
    );
    assert!(payload.text.contains("[Earlier Summary]"));
    assert!(payload.text.contains("[Permanent Memory]"));
    assert!(payload.text.contains("[Daily Log]"));
}

#[tokio::test]
async fn context_never_exceeds_budget() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");
    for i in 0..10 {
        engine
            .append_turn(&s, Role::User, None, &format!("note {i} about the migration plan"))
            .await
            .unwrap();
    }

    for budget in [64, 128, 512, 4096] {
        let payload = engine
            .build_context(&s, None, Some(budget))
            .await
            .unwrap();
        assert!(
            payload.used_tokens <= budget,
            "used {} for budget {budget}",
            payload.used_tokens
        );
    }
}

#[tokio::test]
async fn impossible_budget_is_an_explicit_error() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");
    engine
        .append_turn(&s, Role::User, None, &"a long rambling message ".repeat(10))
        .await
        .unwrap();

    let err = engine.build_context(&s, None, Some(2)).await.unwrap_err();
    match err {
        Error::Assembly(AssemblyError::BudgetExceededBeforeAnyContent { budget, .. }) => {
            assert_eq!(budget, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn context_build_is_deterministic_and_read_only() {
    let (_dir, engine) = default_engine().await;
    let s = SessionId::from("s1");
    engine
        .append_turn(&s, Role::User, None, "the cache backend is redis")
        .await
        .unwrap();
    engine.trigger_compaction(&s).await.unwrap();
    engine
        .append_turn(&s, Role::User, None, "what backend do we use?")
        .await
        .unwrap();

    let a = engine.build_context(&s, Some("redis"), None).await.unwrap();
    let b = engine.build_context(&s, Some("redis"), None).await.unwrap();
    assert_eq!(a.text, b.text);
    assert_eq!(a.used_tokens, b.used_tokens);

    // Builds did not change store state
    assert_eq!(engine.store().count_unsummarized(&s).await.unwrap(), 1);
}

#[tokio::test]
async fn empty_session_builds_from_shared_memory_only() {
    let (_dir, engine) = default_engine().await;
    let seeded = SessionId::from("seeded");
    engine
        .append_turn(&seeded, Role::User, None, "the api gateway is nginx")
        .await
        .unwrap();
    engine.trigger_compaction(&seeded).await.unwrap();

    // A brand-new session still sees the permanent tier
    let fresh = SessionId::from("fresh");
    let payload = engine.build_context(&fresh, None, None).await.unwrap();
    assert!(payload.text.contains("[Permanent Memory]"));
    assert!(!payload.text.contains("[Recent Conversation]"));
}
