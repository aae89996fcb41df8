//! Sequential multi-stage pipeline execution
//!
//! The orchestrator pulls items from a (possibly unbounded) stream one at a
//! time, pushes each through every stage in order, and hands survivors to a
//! sink immediately. A run moves `Idle -> Running -> Completed | Aborted`.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::{ItemSink, PipelineContext, PipelineStage, ScrapedItem, StageControl};
use crate::types::{PipelineEvent, PipelineStats, RunState};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Context counter mirroring [`PipelineStats::total`]
pub const ITEMS_TOTAL: &str = "items_total";
/// Context counter mirroring [`PipelineStats::emitted`]
pub const ITEMS_EMITTED: &str = "items_emitted";
/// Context counter mirroring [`PipelineStats::dropped`]
pub const ITEMS_DROPPED: &str = "items_dropped";

/// Everything a finished [`PipelineOrchestrator::execute`] call produced
#[derive(Debug)]
pub struct PipelineRun {
    /// Items that survived every stage, in input order
    pub items: Vec<ScrapedItem>,
    /// Final run state (`Completed` or `Aborted`)
    pub state: RunState,
    /// Item counts
    pub stats: PipelineStats,
    /// Why the run ended early, if it did
    pub error: Option<PipelineError>,
    /// The run's context, with final counters
    pub context: PipelineContext,
}

impl PipelineRun {
    /// Whether the input was exhausted without an abort
    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    /// Survivors on completion, or the run-level error
    pub fn into_result(self) -> Result<Vec<ScrapedItem>> {
        match self.error {
            Some(e) => Err(e.into()),
            None => Ok(self.items),
        }
    }
}

enum ItemOutcome {
    Emitted(ScrapedItem),
    Dropped {
        name: String,
        stage: String,
        reason: Option<String>,
    },
    Aborted {
        stage: String,
        reason: String,
    },
}

/// Runs a fixed, ordered list of stages over a stream of items
///
/// # Example
///
/// ```
/// use futures::stream;
/// use scrape_toolkit::pipeline::{
///     FnStage, NormalizeNameStage, PipelineContext, PipelineOrchestrator, ScrapedItem,
///     StageControl,
/// };
///
/// # #[tokio::main]
/// # async fn main() {
/// let mut orchestrator = PipelineOrchestrator::new(vec![
///     Box::new(NormalizeNameStage),
///     Box::new(FnStage::new("skip_drafts", |item: ScrapedItem, _ctx: &mut PipelineContext| {
///         if item.name.starts_with("draft") {
///             Err(StageControl::dropped("draft"))
///         } else {
///             Ok(item)
///         }
///     })),
/// ]);
///
/// let items = stream::iter(vec![
///     ScrapedItem::new("blog", "  first   post "),
///     ScrapedItem::new("blog", "draft two"),
/// ]);
/// let run = orchestrator.execute(items).await;
///
/// assert!(run.is_completed());
/// assert_eq!(run.items.len(), 1);
/// assert_eq!(run.items[0].name, "first post");
/// # }
/// ```
pub struct PipelineOrchestrator {
    stages: Vec<Box<dyn PipelineStage>>,
    config: PipelineConfig,
    state: RunState,
    stats: PipelineStats,
    event_tx: broadcast::Sender<PipelineEvent>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("stages", &self.stage_names())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish()
    }
}

impl PipelineOrchestrator {
    /// Orchestrator with default settings
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        let config = PipelineConfig::default();
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            stages,
            config,
            state: RunState::Idle,
            stats: PipelineStats::default(),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Orchestrator with explicit settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) for invalid settings.
    pub fn with_config(stages: Vec<Box<dyn PipelineStage>>, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            stages,
            config,
            state: RunState::Idle,
            stats: PipelineStats::default(),
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Append a stage
    pub fn add_stage(&mut self, stage: Box<dyn PipelineStage>) {
        debug!(stage = stage.name(), "added pipeline stage");
        self.stages.push(stage);
    }

    /// Insert a stage at `index`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if `index` is past the end.
    pub fn insert_stage(&mut self, index: usize, stage: Box<dyn PipelineStage>) -> Result<()> {
        if index > self.stages.len() {
            return Err(crate::Error::config(
                "pipeline.stages",
                format!(
                    "cannot insert stage at {} into {} stages",
                    index,
                    self.stages.len()
                ),
            ));
        }
        debug!(stage = stage.name(), index, "inserted pipeline stage");
        self.stages.insert(index, stage);
        Ok(())
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// State of the current or most recent run
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Counts of the current or most recent run
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// Token that cancels the next (or current) run
    ///
    /// Cancellation is checked at every item boundary and between download
    /// retries. A token that ended a run is replaced afterwards, so fetch a
    /// fresh one for each run you may want to cancel.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A fresh context for one run, using the configured session id if any
    pub fn new_context(&self) -> PipelineContext {
        match &self.config.session_id {
            Some(id) => PipelineContext::new(id.clone()),
            None => PipelineContext::generated(),
        }
    }

    /// Run over `items` with a fresh context, collecting survivors
    pub async fn execute<S>(&mut self, items: S) -> PipelineRun
    where
        S: Stream<Item = ScrapedItem>,
    {
        let context = self.new_context();
        self.execute_with_context(items, context).await
    }

    /// Run over any iterator of items
    pub async fn execute_iter<I>(&mut self, items: I) -> PipelineRun
    where
        I: IntoIterator<Item = ScrapedItem>,
    {
        self.execute(futures::stream::iter(items)).await
    }

    /// Run over `items` with a caller-built context, collecting survivors
    pub async fn execute_with_context<S>(&mut self, items: S, mut context: PipelineContext) -> PipelineRun
    where
        S: Stream<Item = ScrapedItem>,
    {
        let mut collected = Vec::new();
        let error = self.run(items, &mut context, &mut collected).await.err();
        PipelineRun {
            items: collected,
            state: self.state,
            stats: self.stats,
            error,
            context,
        }
    }

    /// Run over `items`, handing each survivor to `sink` as soon as it is ready
    ///
    /// Items are pulled lazily; an unbounded stream is processed until it ends,
    /// a stage aborts, or the run is cancelled. Items delivered before an abort
    /// stay delivered.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] that ended the run early.
    pub async fn run<S, K>(
        &mut self,
        items: S,
        ctx: &mut PipelineContext,
        sink: &mut K,
    ) -> std::result::Result<PipelineStats, PipelineError>
    where
        S: Stream<Item = ScrapedItem>,
        K: ItemSink,
    {
        let span = info_span!(
            "pipeline_run",
            session_id = %ctx.session_id(),
            stages = self.stages.len()
        );
        self.run_inner(items, ctx, sink).instrument(span).await
    }

    async fn run_inner<S, K>(
        &mut self,
        items: S,
        ctx: &mut PipelineContext,
        sink: &mut K,
    ) -> std::result::Result<PipelineStats, PipelineError>
    where
        S: Stream<Item = ScrapedItem>,
        K: ItemSink,
    {
        self.stats = PipelineStats::default();
        ctx.set_cancellation(self.cancel.clone());
        let session_id = ctx.session_id().to_string();

        info!(stages = self.stages.len(), "starting pipeline run");
        self.event_tx
            .send(PipelineEvent::RunStarted {
                session_id: session_id.clone(),
                stages: self.stages.len(),
            })
            .ok();

        for index in 0..self.stages.len() {
            if let Err(e) = self.stages[index].initialize(ctx).await {
                let stage = self.stages[index].name().to_string();
                error!(stage = %stage, error = %e, "stage initialization failed");
                self.finalize_stages(index, ctx).await;
                return self.finish(
                    Err(PipelineError::InitializationFailed {
                        stage,
                        reason: e.to_string(),
                    }),
                    ctx,
                    &session_id,
                );
            }
        }

        self.state = RunState::Running;
        let mut items = std::pin::pin!(items);

        let outcome = loop {
            let cancel = self.cancel.clone();
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(PipelineError::Cancelled),
                next = items.next() => next,
            };
            let Some(item) = next else {
                break Ok(());
            };
            self.stats.total += 1;

            match self.process_item(item, ctx).await {
                ItemOutcome::Emitted(item) => {
                    let index = self.stats.emitted;
                    let name = item.name.clone();
                    sink.accept(item).await;
                    self.stats.emitted += 1;
                    self.event_tx
                        .send(PipelineEvent::ItemEmitted { name, index })
                        .ok();
                }
                ItemOutcome::Dropped {
                    name,
                    stage,
                    reason,
                } => {
                    self.stats.dropped += 1;
                    debug!(item = %name, stage = %stage, reason = ?reason, "item dropped");
                    self.event_tx
                        .send(PipelineEvent::ItemDropped {
                            name,
                            stage,
                            reason,
                        })
                        .ok();
                }
                // A stage giving up because the run was cancelled is a cancellation
                ItemOutcome::Aborted { .. } if self.cancel.is_cancelled() => {
                    break Err(PipelineError::Cancelled);
                }
                ItemOutcome::Aborted { stage, reason } => {
                    break Err(PipelineError::Aborted { stage, reason });
                }
            }
        };

        self.finalize_stages(self.stages.len(), ctx).await;
        self.finish(outcome, ctx, &session_id)
    }

    async fn process_item(&mut self, item: ScrapedItem, ctx: &mut PipelineContext) -> ItemOutcome {
        let mut current = item;
        for stage in self.stages.iter_mut() {
            let name = current.name.clone();
            match stage.process(current, ctx).await {
                Ok(next) => current = next,
                Err(StageControl::Drop { reason }) => {
                    return ItemOutcome::Dropped {
                        name,
                        stage: stage.name().to_string(),
                        reason,
                    };
                }
                Err(StageControl::Abort { reason }) => {
                    warn!(item = %name, stage = stage.name(), %reason, "stage aborted the run");
                    return ItemOutcome::Aborted {
                        stage: stage.name().to_string(),
                        reason,
                    };
                }
            }
        }
        ItemOutcome::Emitted(current)
    }

    async fn finalize_stages(&mut self, count: usize, ctx: &mut PipelineContext) {
        for stage in self.stages.iter_mut().take(count) {
            if let Err(e) = stage.finalize(ctx).await {
                warn!(stage = stage.name(), error = %e, "stage finalization failed");
            }
        }
    }

    fn finish(
        &mut self,
        outcome: std::result::Result<(), PipelineError>,
        ctx: &mut PipelineContext,
        session_id: &str,
    ) -> std::result::Result<PipelineStats, PipelineError> {
        ctx.increment(ITEMS_TOTAL, self.stats.total);
        ctx.increment(ITEMS_EMITTED, self.stats.emitted);
        ctx.increment(ITEMS_DROPPED, self.stats.dropped);

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        match outcome {
            Ok(()) => {
                self.state = RunState::Completed;
                info!(
                    total = self.stats.total,
                    emitted = self.stats.emitted,
                    dropped = self.stats.dropped,
                    duration_ms = ctx.duration().as_millis() as u64,
                    "pipeline run completed"
                );
                self.event_tx
                    .send(PipelineEvent::RunCompleted {
                        session_id: session_id.to_string(),
                        stats: self.stats,
                    })
                    .ok();
                Ok(self.stats)
            }
            Err(e) => {
                self.state = RunState::Aborted;
                error!(
                    error = %e,
                    total = self.stats.total,
                    emitted = self.stats.emitted,
                    dropped = self.stats.dropped,
                    "pipeline run aborted"
                );
                self.event_tx
                    .send(PipelineEvent::RunAborted {
                        session_id: session_id.to_string(),
                        error: e.to_string(),
                        stats: self.stats,
                    })
                    .ok();
                Err(e)
            }
        }
    }
}
