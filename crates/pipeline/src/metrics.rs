use crate::config::ErrorBudgetConfig;
use extract::{ExtractionError, ValidationError};
use graph::BatchReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use uuid::Uuid;

/// Recoverable failure categories reported in a run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DanglingReference,
    MalformedMention,
    ExtractionTimeout,
    ExtractionRateLimit,
    ExtractionFailed,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 5] = [
        ErrorKind::DanglingReference,
        ErrorKind::MalformedMention,
        ErrorKind::ExtractionTimeout,
        ErrorKind::ExtractionRateLimit,
        ErrorKind::ExtractionFailed,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl From<&ExtractionError> for ErrorKind {
    fn from(error: &ExtractionError) -> Self {
        match error {
            ExtractionError::Timeout(_) => ErrorKind::ExtractionTimeout,
            ExtractionError::RateLimited { .. } => ErrorKind::ExtractionRateLimit,
            ExtractionError::Transport(_) | ExtractionError::InvalidResponse(_) => {
                ErrorKind::ExtractionFailed
            }
        }
    }
}

/// Counters for one ingestion run. Shared between the consumer and the
/// caller, so everything is atomic.
pub struct RunMetrics {
    run_id: Uuid,
    started: TimedOperation,
    chunks_total: AtomicUsize,
    chunks_succeeded: AtomicUsize,
    chunks_failed: AtomicUsize,
    entities_created: AtomicUsize,
    entities_merged: AtomicUsize,
    relationships_created: AtomicUsize,
    relationships_merged: AtomicUsize,
    filtered: AtomicUsize,
    // Mentions + relationships seen by validation, plus failed chunks
    items_attempted: AtomicUsize,
    errors: [AtomicUsize; ErrorKind::ALL.len()],
    cancelled: AtomicBool,
}

impl RunMetrics {
    pub fn new(chunks_total: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: TimedOperation::start(),
            chunks_total: AtomicUsize::new(chunks_total),
            chunks_succeeded: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            entities_created: AtomicUsize::new(0),
            entities_merged: AtomicUsize::new(0),
            relationships_created: AtomicUsize::new(0),
            relationships_merged: AtomicUsize::new(0),
            filtered: AtomicUsize::new(0),
            items_attempted: AtomicUsize::new(0),
            errors: Default::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    fn record_error(&self, kind: ErrorKind, count: usize) {
        self.errors[kind.slot()].fetch_add(count, Ordering::Relaxed);
    }

    /// Items dropped by validation before they reached the graph.
    pub fn record_rejected(&self, rejected: &[ValidationError]) {
        self.items_attempted.fetch_add(rejected.len(), Ordering::Relaxed);
        self.record_error(ErrorKind::MalformedMention, rejected.len());
    }

    pub fn record_filtered(&self, count: usize) {
        self.filtered.fetch_add(count, Ordering::Relaxed);
    }

    /// A chunk whose batch was applied, whatever its per-item failures.
    pub fn record_batch(&self, attempted: usize, report: &BatchReport) {
        self.chunks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.items_attempted.fetch_add(attempted, Ordering::Relaxed);
        self.entities_created.fetch_add(report.entities_created, Ordering::Relaxed);
        self.entities_merged.fetch_add(report.entities_merged, Ordering::Relaxed);
        self.relationships_created
            .fetch_add(report.relationships_created, Ordering::Relaxed);
        self.relationships_merged
            .fetch_add(report.relationships_merged, Ordering::Relaxed);
        self.record_error(ErrorKind::DanglingReference, report.dangling());
        self.record_error(ErrorKind::MalformedMention, report.malformed());
    }

    pub fn record_chunk_failure(&self, kind: ErrorKind) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        self.items_attempted.fetch_add(1, Ordering::Relaxed);
        self.record_error(kind, 1);
    }

    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn failures(&self) -> usize {
        self.errors.iter().map(|count| count.load(Ordering::Relaxed)).sum()
    }

    pub fn attempted(&self) -> usize {
        self.items_attempted.load(Ordering::Relaxed)
    }

    /// `Some((failures, attempted))` once the failure rate breaches the budget.
    pub fn budget_exceeded(&self, budget: &ErrorBudgetConfig) -> Option<(usize, usize)> {
        let attempted = self.attempted();
        if attempted == 0 || attempted < budget.min_samples {
            return None;
        }
        let failures = self.failures();
        let rate = failures as f64 / attempted as f64;
        (rate > budget.max_failure_rate).then_some((failures, attempted))
    }

    pub fn summary(&self) -> RunSummary {
        let errors = ErrorKind::ALL
            .iter()
            .filter_map(|kind| {
                let count = self.errors[kind.slot()].load(Ordering::Relaxed);
                (count > 0).then_some((*kind, count))
            })
            .collect();

        RunSummary {
            run_id: self.run_id,
            chunks_total: self.chunks_total.load(Ordering::Relaxed),
            chunks_succeeded: self.chunks_succeeded.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            entities_created: self.entities_created.load(Ordering::Relaxed),
            entities_merged: self.entities_merged.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            relationships_merged: self.relationships_merged.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            errors,
            cancelled: self.cancelled.load(Ordering::Relaxed),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// What a run did, including every recoverable failure by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub entities_created: usize,
    pub entities_merged: usize,
    pub relationships_created: usize,
    pub relationships_merged: usize,
    pub filtered: usize,
    pub errors: BTreeMap<ErrorKind, usize>,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl RunSummary {
    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.errors.get(&kind).copied().unwrap_or(0)
    }

    pub fn total_errors(&self) -> usize {
        self.errors.values().sum()
    }
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
