use std::fmt;

mod payout;
pub mod scheduler;
mod settlement;

pub use payout::PayoutProcessor;
pub use settlement::SettlementEngine;

/// What happened to a single request in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Completed,
    Failed,
    Deferred,
    Skipped,
}

/// Per-cycle counters of the settlement and payout jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl CycleReport {
    pub(crate) fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Completed => self.completed += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Deferred => self.deferred += 1,
            Disposition::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed={} failed={} deferred={} skipped={} errors={}",
            self.completed, self.failed, self.deferred, self.skipped, self.errors
        )
    }
}
