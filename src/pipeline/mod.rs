//! Staged item pipeline
//!
//! A [`PipelineOrchestrator`] owns an ordered list of [`PipelineStage`]s and
//! pushes every [`ScrapedItem`] through them one at a time. Each stage returns
//! the (possibly transformed) item, or a [`StageControl`] that drops the item
//! or aborts the run. Survivors reach an [`ItemSink`] in input order.
//!
//! Stages share a per-run [`PipelineContext`] for counters, arbitrary values
//! and the run's cancellation token.

mod context;
mod item;
mod orchestrator;
mod sink;
mod stage;
pub mod stages;

pub use context::PipelineContext;
pub use item::ScrapedItem;
pub use orchestrator::{
    ITEMS_DROPPED, ITEMS_EMITTED, ITEMS_TOTAL, PipelineOrchestrator, PipelineRun,
};
pub use sink::ItemSink;
pub use stage::{FnStage, PipelineStage, StageControl, StageResult};
pub use stages::{DownloadStage, NormalizeNameStage, OnFailure, ValidationStage};
