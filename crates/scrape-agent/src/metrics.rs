use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    reports_scraped: AtomicU64,
    reports_failed: AtomicU64,
    batches_completed: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_report_scraped() {
    increment(&COUNTERS.reports_scraped);
}

pub fn record_report_failed() {
    increment(&COUNTERS.reports_failed);
}

pub fn record_batch_completed() {
    increment(&COUNTERS.batches_completed);
}

pub fn record_run_completed() {
    increment(&COUNTERS.runs_completed);
}

pub fn record_run_failed() {
    increment(&COUNTERS.runs_failed);
}

#[derive(Clone, Debug, Default)]
pub struct AgentMetricsSnapshot {
    pub reports_scraped: u64,
    pub reports_failed: u64,
    pub batches_completed: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
}

pub fn snapshot() -> AgentMetricsSnapshot {
    AgentMetricsSnapshot {
        reports_scraped: COUNTERS.reports_scraped.load(Ordering::Relaxed),
        reports_failed: COUNTERS.reports_failed.load(Ordering::Relaxed),
        batches_completed: COUNTERS.batches_completed.load(Ordering::Relaxed),
        runs_completed: COUNTERS.runs_completed.load(Ordering::Relaxed),
        runs_failed: COUNTERS.runs_failed.load(Ordering::Relaxed),
    }
}
