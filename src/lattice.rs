use crate::probability::{IMPOSSIBLE_LOG_PROB, is_impossible};
use crate::types::{Candidate, StateId};

/// Viterbi bookkeeping of one lattice state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViterbiCell {
    /// Best cumulative log-probability of any path ending in this state
    pub score: f64,
    /// State at the previous timestamp on that path; `None` at a segment start
    pub predecessor: Option<StateId>,
    /// Excluded from further transitions
    pub pruned: bool,
}

impl Default for ViterbiCell {
    fn default() -> Self {
        Self {
            score: IMPOSSIBLE_LOG_PROB,
            predecessor: None,
            pruned: false,
        }
    }
}

impl ViterbiCell {
    pub fn is_reachable(&self) -> bool {
        !is_impossible(self.score)
    }

    /// Whether the cell may act as a predecessor
    pub fn is_viable(&self) -> bool {
        self.is_reachable() && !self.pruned
    }
}

/// Per-timestamp candidate states of one matching request.
///
/// Cells live in a single flat vector indexed through per-timestamp offsets;
/// predecessors are `StateId`s rather than references.
#[derive(Debug, Clone)]
pub struct CandidateLattice {
    candidates: Vec<Vec<Candidate>>,
    offsets: Vec<usize>,
    cells: Vec<ViterbiCell>,
}

impl CandidateLattice {
    pub fn new(candidates: Vec<Vec<Candidate>>) -> Self {
        let mut offsets = Vec::with_capacity(candidates.len() + 1);
        let mut total = 0;
        for layer in &candidates {
            offsets.push(total);
            total += layer.len();
        }
        offsets.push(total);

        Self {
            candidates,
            offsets,
            cells: vec![ViterbiCell::default(); total],
        }
    }

    /// Number of timestamps
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn state_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of candidates at timestamp `t`
    pub fn width(&self, t: usize) -> usize {
        self.offsets[t + 1] - self.offsets[t]
    }

    /// Timestamps that have at least one candidate
    pub fn usable_timestamps(&self) -> usize {
        (0..self.len()).filter(|&t| self.width(t) > 0).count()
    }

    pub fn candidates(&self, t: usize) -> &[Candidate] {
        &self.candidates[t]
    }

    pub fn candidate(&self, state: StateId) -> &Candidate {
        &self.candidates[state.timestamp][state.candidate]
    }

    pub fn states(&self, t: usize) -> impl Iterator<Item = StateId> + use<> {
        (0..self.width(t)).map(move |s| StateId::new(t, s))
    }

    pub fn cells(&self, t: usize) -> &[ViterbiCell] {
        &self.cells[self.offsets[t]..self.offsets[t + 1]]
    }

    pub fn cells_mut(&mut self, t: usize) -> &mut [ViterbiCell] {
        &mut self.cells[self.offsets[t]..self.offsets[t + 1]]
    }

    pub fn cell(&self, state: StateId) -> &ViterbiCell {
        &self.cells[self.offsets[state.timestamp] + state.candidate]
    }

    pub fn cell_mut(&mut self, state: StateId) -> &mut ViterbiCell {
        &mut self.cells[self.offsets[state.timestamp] + state.candidate]
    }

    /// Forget everything computed for timestamp `t`
    pub fn reset(&mut self, t: usize) {
        self.cells_mut(t).fill(ViterbiCell::default());
    }

    /// Highest score at `t`, [`IMPOSSIBLE_LOG_PROB`] if no state is reachable
    pub fn max_score(&self, t: usize) -> f64 {
        self.best_state(t)
            .map_or(IMPOSSIBLE_LOG_PROB, |(_, score)| score)
    }

    /// Highest scoring reachable state at `t`; ties go to the lowest candidate index
    pub fn best_state(&self, t: usize) -> Option<(StateId, f64)> {
        let mut best: Option<(StateId, f64)> = None;
        for (s, cell) in self.cells(t).iter().enumerate() {
            if !cell.is_reachable() {
                continue;
            }
            if best.is_none_or(|(_, score)| cell.score > score) {
                best = Some((StateId::new(t, s), cell.score));
            }
        }
        best
    }
}
