//! Where a trace has to be split into independently matched segments.
//!
//! A break at boundary `(t - 1, t)` happens when no state at `t` is reachable
//! from the states at `t - 1`, when either side has no candidates at all, or
//! (optionally) when the two fixes are too far apart in time.

use log::debug;

use crate::lattice::CandidateLattice;
use crate::probability::is_impossible;
use crate::types::{Breakage, BreakageReason, Fix};

/// True when every state at `t` is unreachable
pub fn is_unreachable(lattice: &CandidateLattice, t: usize) -> bool {
    is_impossible(lattice.max_score(t))
}

/// True when `next` was recorded more than `max_gap_seconds` after `prev`
pub fn exceeds_time_gap(prev: &Fix, next: &Fix, max_gap_seconds: Option<f64>) -> bool {
    let Some(max_gap) = max_gap_seconds else {
        return false;
    };
    let gap = (next.timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
    gap > max_gap
}

/// Ordered record of the boundaries at which a trace was split
#[derive(Debug, Default, Clone)]
pub struct BreakageLog {
    breakages: Vec<Breakage>,
}

impl BreakageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the boundary between `after` and `after + 1`. Boundaries must arrive in
    /// non-decreasing order; a repeated boundary keeps its first reason.
    pub fn record(&mut self, after: usize, reason: BreakageReason) {
        if let Some(last) = self.breakages.last() {
            debug_assert!(after >= last.after, "breakage {after} recorded after {}", last.after);
            if last.after == after {
                return;
            }
        }
        debug!("Breakage between {} and {}: {:?}", after, after + 1, reason);
        self.breakages.push(Breakage { after, reason });
    }

    pub fn len(&self) -> usize {
        self.breakages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakages.is_empty()
    }

    /// Recorded breakages, in trace order
    pub fn into_breakages(self) -> Vec<Breakage> {
        self.breakages
    }
}
