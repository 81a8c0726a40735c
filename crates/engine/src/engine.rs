//! The `MemoryEngine` facade.
//!
//! Owns every component and enforces the cross-component ordering rules:
//! append then index, threshold check after every append, read-only
//! context builds. Hosts plug in their own token counter and fact
//! extractor; the defaults are the character heuristic and the rule-based
//! extractor.

use chrono::Utc;
use std::sync::Arc;
use strata_config::EngineConfig;
use strata_core::{
    HeuristicCounter, Result, Role, ScoredHit, SessionId, TokenCounter, Turn,
};
use strata_index::{DocumentChanged, Indexer, spawn_watcher};
use strata_store::{DailyLog, PermanentDocument, SqliteStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::assembler::{AssemblyInput, ContextAssembler, ContextPayload};
use crate::compactor::{CompactionReport, Compactor};
use crate::extract::{FactExtractor, RuleBasedExtractor};
use crate::retriever::Retriever;

/// The result of one append: the stored turn, and a handle to the
/// background compaction run when this append pushed the session over
/// the threshold. The handle can be awaited for the report or ignored.
#[derive(Debug)]
pub struct AppendOutcome {
    pub turn: Turn,
    pub compaction: Option<JoinHandle<Result<CompactionReport>>>,
}

pub struct MemoryEngine {
    config: EngineConfig,
    counter: Arc<dyn TokenCounter>,
    store: Arc<SqliteStore>,
    indexer: Arc<Indexer>,
    retriever: Retriever,
    compactor: Arc<Compactor>,
    daily_log: DailyLog,
    permanent: PermanentDocument,
    assembler: ContextAssembler,
}

impl MemoryEngine {
    /// Open an engine with the default counter and extractor.
    pub async fn new(config: EngineConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(HeuristicCounter),
            Arc::new(RuleBasedExtractor),
        )
        .await
    }

    /// Open an engine with caller-supplied token counting and extraction.
    pub async fn with_parts(
        config: EngineConfig,
        counter: Arc<dyn TokenCounter>,
        extractor: Arc<dyn FactExtractor>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(SqliteStore::new(&config.storage).await?);
        let indexer = Arc::new(Indexer::new(store.pool()).await?);
        let retriever = Retriever::new(indexer.clone(), config.retrieval.clone());
        let compactor = Arc::new(Compactor::new(
            store.clone(),
            DailyLog::new(&config.storage.workspace),
            PermanentDocument::new(&config.storage.workspace),
            indexer.clone(),
            extractor,
            config.compaction.clone(),
        ));
        let assembler = ContextAssembler::new(counter.clone());

        info!(workspace = %config.storage.workspace.display(), "memory engine ready");
        Ok(Self {
            daily_log: DailyLog::new(&config.storage.workspace),
            permanent: PermanentDocument::new(&config.storage.workspace),
            config,
            counter,
            store,
            indexer,
            retriever,
            compactor,
            assembler,
        })
    }

    /// Append one turn. The turn is durable and indexed before return;
    /// when the append crosses the compaction threshold, a compaction is
    /// spawned in the background so a slow extractor never stalls the
    /// conversation. Use [`trigger_compaction`](Self::trigger_compaction)
    /// to run one inline instead.
    pub async fn append_turn(
        &self,
        session: &SessionId,
        role: Role,
        agent: Option<&str>,
        content: &str,
    ) -> Result<AppendOutcome> {
        let tokens = self.counter.count(content);
        let turn = self
            .store
            .append_turn(session, role, agent, content, tokens)
            .await?;
        self.indexer.index_turn(&turn).await?;

        let pending = self.store.count_unsummarized(session).await?;
        let compaction = if pending >= self.config.compaction.every_turns {
            debug!(session = %session, pending, "compaction threshold reached");
            let compactor = self.compactor.clone();
            let session = session.clone();
            Some(tokio::spawn(async move { compactor.run(&session).await }))
        } else {
            None
        };

        Ok(AppendOutcome { turn, compaction })
    }

    /// Explicitly run compaction for a session, regardless of threshold.
    pub async fn trigger_compaction(&self, session: &SessionId) -> Result<CompactionReport> {
        self.compactor.run(session).await
    }

    /// Hybrid search over turns and permanent memory.
    pub async fn search(
        &self,
        query: &str,
        session: Option<&SessionId>,
        limit: usize,
    ) -> Result<Vec<ScoredHit>> {
        Ok(self.retriever.search(query, session, limit).await?)
    }

    /// Assemble a context payload for a session. Read-only: cancelling the
    /// returned future has no side effects. `budget` defaults from config.
    pub async fn build_context(
        &self,
        session: &SessionId,
        query: Option<&str>,
        budget: Option<usize>,
    ) -> Result<ContextPayload> {
        let budget = budget.unwrap_or(self.config.assembly.default_token_budget);

        let sections = self.permanent.sections()?;
        let daily_log = self
            .daily_log
            .load_recent(Utc::now().date_naive(), self.config.assembly.daily_log_days)?;
        let retrieved = match query {
            Some(q) => {
                self.retriever
                    .search(q, Some(session), self.config.assembly.retrieved_limit)
                    .await?
            }
            None => Vec::new(),
        };
        let recent = self
            .store
            .recent_unsummarized(session, self.config.assembly.short_term_cap)
            .await?;
        let pending = self.store.count_unsummarized(session).await?;
        let turns_trimmed = pending > recent.len();
        let latest_summary = self.store.latest_summary(session).await?;

        let input = AssemblyInput {
            permanent_sections: &sections,
            daily_log: &daily_log,
            retrieved: &retrieved,
            recent_turns: &recent,
            turns_trimmed,
            latest_summary: latest_summary.as_ref(),
        };
        let payload = self.assembler.assemble(&input, budget)?;
        Ok(payload)
    }

    /// Start the reindex-on-external-edit loop. Send [`DocumentChanged`]
    /// on the returned channel whenever the permanent document may have
    /// changed on disk; drop the sender to stop the loop.
    pub fn start_document_watcher(&self) -> mpsc::Sender<DocumentChanged> {
        let (tx, rx) = mpsc::channel(16);
        let path = self.permanent.path().to_path_buf();
        let _task = spawn_watcher(self.indexer.clone(), rx, move || {
            match std::fs::read_to_string(&path) {
                Ok(t) => Ok(t),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(e),
            }
        });
        tx
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
