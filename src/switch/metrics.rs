//! Instrumentation points for the journal and apply paths.
//!
//! Rather than a generic counter/gauge bus, the switch reports the handful
//! of events it actually has: journal appends (with outcome and latency),
//! applied ops, and the recovery totals. Consumers implement `MetricSink`;
//! the default sink logs under the `metrics` tracing target, and tests swap
//! in a recording sink.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

/// How a journal append ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Durable,
    Failed,
}

pub trait MetricSink: Send + Sync {
    /// One append attempt against the redo log.
    fn journal_append(&self, outcome: AppendOutcome, elapsed: Duration);

    /// One op run through the reducer.
    fn op_applied(&self, elapsed: Duration);

    /// Recovery finished: records replayed, records dropped as
    /// undecodable, and the resulting queue count.
    fn recovered(&self, replayed: usize, dropped: usize, queues: usize);
}

struct LogSink;

impl MetricSink for LogSink {
    fn journal_append(&self, outcome: AppendOutcome, elapsed: Duration) {
        tracing::info!(
            target: "metrics",
            ?outcome,
            elapsed_us = elapsed.as_micros() as u64,
            "journal_append"
        );
    }

    fn op_applied(&self, elapsed: Duration) {
        tracing::info!(
            target: "metrics",
            elapsed_us = elapsed.as_micros() as u64,
            "op_applied"
        );
    }

    fn recovered(&self, replayed: usize, dropped: usize, queues: usize) {
        tracing::info!(target: "metrics", replayed, dropped, queues, "recovered");
    }
}

static SINK: OnceLock<RwLock<Arc<dyn MetricSink>>> = OnceLock::new();

fn slot() -> &'static RwLock<Arc<dyn MetricSink>> {
    SINK.get_or_init(|| RwLock::new(Arc::new(LogSink)))
}

/// Replace the process-wide sink.
pub fn set_sink(new_sink: Arc<dyn MetricSink>) {
    *slot().write().expect("metric sink lock poisoned") = new_sink;
}

pub(crate) fn sink() -> Arc<dyn MetricSink> {
    slot().read().expect("metric sink lock poisoned").clone()
}
