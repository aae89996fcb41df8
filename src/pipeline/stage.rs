//! Pipeline stage interface

use crate::error::Result;
use crate::pipeline::{PipelineContext, ScrapedItem};
use async_trait::async_trait;

/// Non-success outcome of processing one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageControl {
    /// Discard this item; later stages never see it and the run continues
    Drop {
        /// Optional reason, for logs and events
        reason: Option<String>,
    },
    /// Stop the whole run; already emitted items stay valid
    Abort {
        /// Why the run cannot continue
        reason: String,
    },
}

impl StageControl {
    /// Drop with a reason
    pub fn dropped(reason: impl Into<String>) -> Self {
        StageControl::Drop {
            reason: Some(reason.into()),
        }
    }

    /// Drop without a reason
    pub fn dropped_silently() -> Self {
        StageControl::Drop { reason: None }
    }

    /// Abort the run
    pub fn abort(reason: impl Into<String>) -> Self {
        StageControl::Abort {
            reason: reason.into(),
        }
    }
}

/// Result of [`PipelineStage::process`]: the (possibly transformed) item, or a control signal
pub type StageResult = std::result::Result<ScrapedItem, StageControl>;

/// One step of a pipeline
///
/// Stages are called strictly sequentially: one item at a time, in configured
/// order. Failures other than [`StageControl::Drop`] and [`StageControl::Abort`]
/// are the stage's own business and must be handled inside `process`.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use scrape_toolkit::pipeline::{PipelineContext, PipelineStage, ScrapedItem, StageControl, StageResult};
///
/// /// Drops items from sources we are not interested in
/// struct SourceFilter(&'static str);
///
/// #[async_trait]
/// impl PipelineStage for SourceFilter {
///     fn name(&self) -> &str {
///         "source_filter"
///     }
///
///     async fn process(&mut self, item: ScrapedItem, ctx: &mut PipelineContext) -> StageResult {
///         if item.source != self.0 {
///             ctx.increment("foreign_items", 1);
///             return Err(StageControl::dropped(format!("source {}", item.source)));
///         }
///         Ok(item)
///     }
/// }
/// ```
#[async_trait]
pub trait PipelineStage: Send {
    /// Name used in logs, events and abort reports
    fn name(&self) -> &str;

    /// Called once before the first item of a run
    ///
    /// An error here fails the run before any item is pulled.
    async fn initialize(&mut self, _ctx: &mut PipelineContext) -> Result<()> {
        Ok(())
    }

    /// Transform, veto, or abort on one item
    async fn process(&mut self, item: ScrapedItem, ctx: &mut PipelineContext) -> StageResult;

    /// Called once after the last item of a run, on every exit path
    ///
    /// Errors are logged and otherwise ignored.
    async fn finalize(&mut self, _ctx: &mut PipelineContext) -> Result<()> {
        Ok(())
    }
}

/// Stage built from a synchronous closure
pub struct FnStage<F> {
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: FnMut(ScrapedItem, &mut PipelineContext) -> StageResult + Send,
{
    /// Wrap `f` as a stage called `name`
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> PipelineStage for FnStage<F>
where
    F: FnMut(ScrapedItem, &mut PipelineContext) -> StageResult + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&mut self, item: ScrapedItem, ctx: &mut PipelineContext) -> StageResult {
        (self.f)(item, ctx)
    }
}
