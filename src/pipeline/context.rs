//! Run-scoped state shared by every stage

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Mutable state for one orchestrator run
///
/// Stages receive it by `&mut` one item at a time, so counters need no
/// synchronization. A context belongs to exactly one run.
#[derive(Debug)]
pub struct PipelineContext {
    session_id: String,
    start_time: DateTime<Utc>,
    counters: HashMap<String, u64>,
    values: HashMap<String, Value>,
    cancel: CancellationToken,
}

impl PipelineContext {
    /// Context with an explicit session id
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            start_time: Utc::now(),
            counters: HashMap::new(),
            values: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Context with a generated session id (`<UTC timestamp>-<random hex>`)
    pub fn generated() -> Self {
        let now = Utc::now();
        let id = format!("{}-{:08x}", now.format("%Y%m%dT%H%M%SZ"), rand::random::<u32>());
        Self::new(id)
    }

    /// Builder-style run-scoped setting
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Session id, stable for the whole run
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the context was created
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Wall-clock time since the context was created
    pub fn duration(&self) -> Duration {
        (Utc::now() - self.start_time).to_std().unwrap_or_default()
    }

    /// Store a run-scoped value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Read a run-scoped value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Add `amount` to a counter, creating it at zero
    pub fn increment(&mut self, counter: &str, amount: u64) -> u64 {
        let value = self.counters.entry(counter.to_string()).or_insert(0);
        *value = value.saturating_add(amount);
        *value
    }

    /// Current value of a counter (zero if never touched)
    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// All counters
    pub fn counters(&self) -> &HashMap<String, u64> {
        &self.counters
    }

    /// Cancellation signal of the run this context belongs to
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run has been asked to stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::generated()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counters_accumulate() {
        let mut ctx = PipelineContext::new("s1");
        assert_eq!(ctx.counter("seen"), 0);
        assert_eq!(ctx.increment("seen", 1), 1);
        assert_eq!(ctx.increment("seen", 4), 5);
        assert_eq!(ctx.counter("seen"), 5);
        assert_eq!(ctx.counters().len(), 1);
    }

    #[test]
    fn values_round_trip() {
        let ctx = PipelineContext::new("s1").with_value("limit", 10);
        assert_eq!(ctx.get("limit"), Some(&json!(10)));
        assert_eq!(ctx.get("other"), None);
        assert_eq!(ctx.session_id(), "s1");
    }

    #[test]
    fn generated_ids_differ() {
        let a = PipelineContext::generated();
        let b = PipelineContext::generated();
        assert_ne!(a.session_id(), b.session_id());
        assert!(!a.session_id().is_empty());
    }
}
