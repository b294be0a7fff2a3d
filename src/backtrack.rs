use log::{debug, warn};

use crate::lattice::CandidateLattice;
use crate::probability::ProbabilityModel;
use crate::types::{Fix, MatchedPoint, Segment, StateId};

/// Highest cumulative log-probability a segment over `fixes` could reach: every
/// candidate exactly on its fix and every hop exactly as long as the straight line
pub fn peak_log_probability(model: &ProbabilityModel, fixes: &[Fix]) -> f64 {
    let emissions: f64 = fixes.iter().map(|f| model.emission_peak(f)).sum();
    let hops = fixes.len().saturating_sub(1) as f64;
    emissions + hops * model.transition_peak()
}

/// Map a segment's final log-probability to (0, 1]: the geometric mean of its
/// likelihood relative to the best achievable one
pub fn segment_confidence(log_probability: f64, peak: f64, len: usize) -> f64 {
    if len == 0 || !log_probability.is_finite() {
        return 0.0;
    }
    ((log_probability - peak) / len as f64).exp().clamp(0.0, 1.0)
}

/// Recover the maximum-likelihood path of the completed segment `start..=end`.
///
/// Returns `None` if the last timestamp has no reachable state or a predecessor
/// chain does not lead back to `start`.
pub fn backtrack(
    lattice: &CandidateLattice,
    fixes: &[Fix],
    model: &ProbabilityModel,
    start: usize,
    end: usize,
) -> Option<Segment> {
    let (best, log_probability) = lattice.best_state(end)?;

    let mut path: Vec<StateId> = Vec::with_capacity(end - start + 1);
    let mut state = best;
    loop {
        path.push(state);
        if state.timestamp == start {
            break;
        }
        match lattice.cell(state).predecessor {
            Some(prev) if prev.timestamp + 1 == state.timestamp => state = prev,
            other => {
                warn!(
                    "Broken predecessor chain at {:?} (found {:?}) in segment {}..={}",
                    state, other, start, end
                );
                return None;
            }
        }
    }
    path.reverse();

    let points: Vec<MatchedPoint> = path
        .iter()
        .map(|&s| MatchedPoint {
            timestamp: s.timestamp,
            candidate_index: s.candidate,
            candidate: lattice.candidate(s).clone(),
            log_probability: lattice.cell(s).score,
        })
        .collect();

    let peak = peak_log_probability(model, &fixes[start..=end]);
    let confidence = segment_confidence(log_probability, peak, points.len());

    debug!(
        "Segment {}..={}: {} points, log-probability {:.3}, confidence {:.3}",
        start,
        end,
        points.len(),
        log_probability,
        confidence
    );

    Some(Segment {
        start,
        end,
        points,
        log_probability,
        confidence,
    })
}
