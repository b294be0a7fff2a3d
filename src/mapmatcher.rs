use std::time::Instant;

use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backtrack::backtrack;
use crate::breakage::{BreakageLog, exceeds_time_gap, is_unreachable};
use crate::debug::{Introspection, MatchObserver, TransitionRecord};
use crate::error::MatchError;
use crate::lattice::{CandidateLattice, ViterbiCell};
use crate::probability::{IMPOSSIBLE_LOG_PROB, ProbabilityModel, haversine_distance, is_impossible};
use crate::road_network::CandidateSource;
use crate::routing::DistanceOracle;
use crate::types::{BreakageReason, Candidate, Fix, MatchOutput, Segment, StateId};

/// Core map matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Expected GPS error, the deviation of the emission model (meters)
    pub emission_sigma: f64,
    /// Deviation of the gap between network and straight-line distance (meters)
    pub transition_sigma: f64,
    /// Network distance above this multiple of the straight-line distance is implausible
    pub max_detour_ratio: f64,
    /// Straight-line distances below this are treated as this for the detour ratio (meters)
    pub detour_floor_meters: f64,
    /// States scoring more than this below the best at their timestamp are pruned
    pub prune_margin: Option<f64>,
    /// Use a fix's own accuracy as its emission deviation when present
    pub use_fix_accuracy: bool,
    /// Split the trace when consecutive fixes are further apart than this (seconds)
    pub max_time_gap_seconds: Option<f64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            emission_sigma: 5.0,
            transition_sigma: 10.0,
            max_detour_ratio: 4.0,
            detour_floor_meters: 50.0,
            prune_margin: None,
            use_fix_accuracy: true,
            max_time_gap_seconds: None,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), MatchError> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(MatchError::InvalidConfig(format!(
                    "{name} must be positive and finite, got {value}"
                )))
            }
        };
        let non_negative = |name: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(MatchError::InvalidConfig(format!(
                    "{name} must be non-negative and finite, got {value}"
                )))
            }
        };

        positive("emission_sigma", self.emission_sigma)?;
        positive("transition_sigma", self.transition_sigma)?;
        non_negative("detour_floor_meters", self.detour_floor_meters)?;
        if !(self.max_detour_ratio.is_finite() && self.max_detour_ratio >= 1.0) {
            return Err(MatchError::InvalidConfig(format!(
                "max_detour_ratio must be at least 1, got {}",
                self.max_detour_ratio
            )));
        }
        if let Some(margin) = self.prune_margin {
            non_negative("prune_margin", margin)?;
        }
        if let Some(gap) = self.max_time_gap_seconds {
            non_negative("max_time_gap_seconds", gap)?;
        }
        Ok(())
    }
}

/// Main map matching entry point
#[derive(Debug, Clone)]
pub struct MapMatcher {
    config: MatcherConfig,
    model: ProbabilityModel,
}

impl MapMatcher {
    /// Create a new map matcher with given configuration
    pub fn new(config: MatcherConfig) -> Result<Self, MatchError> {
        config.validate()?;
        let model = ProbabilityModel::from_config(&config);
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn model(&self) -> &ProbabilityModel {
        &self.model
    }

    /// Look up the candidates of every fix and match the trace
    pub fn match_trace<S, D>(
        &self,
        fixes: &[Fix],
        source: &S,
        oracle: &D,
        observer: Option<&mut dyn MatchObserver>,
    ) -> Result<MatchOutput, MatchError>
    where
        S: CandidateSource + ?Sized,
        D: DistanceOracle + ?Sized,
    {
        validate_timestamps(fixes)?;
        let candidates = fixes
            .iter()
            .enumerate()
            .map(|(i, fix)| {
                source
                    .candidates(fix)
                    .map_err(|e| MatchError::candidate_source(i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.match_candidates(fixes, candidates, oracle, observer)
    }

    /// Match a trace whose candidates were generated beforehand, one list per fix
    pub fn match_candidates<D>(
        &self,
        fixes: &[Fix],
        candidates: Vec<Vec<Candidate>>,
        oracle: &D,
        observer: Option<&mut dyn MatchObserver>,
    ) -> Result<MatchOutput, MatchError>
    where
        D: DistanceOracle + ?Sized,
    {
        if fixes.len() != candidates.len() {
            return Err(MatchError::CandidateCountMismatch {
                fixes: fixes.len(),
                lists: candidates.len(),
            });
        }
        validate_timestamps(fixes)?;

        let lattice = CandidateLattice::new(candidates);
        if lattice.usable_timestamps() == 0 {
            return Err(MatchError::InsufficientInput);
        }

        info!(
            "Starting map matching for {} fixes ({} candidate states)",
            fixes.len(),
            lattice.state_count()
        );
        let start_time = Instant::now();

        let mut run = ViterbiRun {
            model: self.model,
            prune_margin: self.config.prune_margin,
            fixes,
            oracle,
            lattice,
            introspection: Introspection::new(observer),
        };
        run.introspection.initialize(&run.lattice);

        let n = fixes.len();
        let mut breakages = BreakageLog::new();
        let mut unmatched = Vec::new();
        let mut bounds: Vec<(usize, usize)> = Vec::new();
        let mut open: Option<usize> = None;

        for t in 0..n {
            if run.lattice.width(t) == 0 {
                warn!("No candidates for fix {}, leaving it unmatched", t);
                unmatched.push(t);
                if let Some(start) = open.take() {
                    bounds.push((start, t - 1));
                }
                if t > 0 {
                    breakages.record(t - 1, BreakageReason::NoCandidates);
                }
                if t + 1 < n {
                    breakages.record(t, BreakageReason::NoCandidates);
                }
                continue;
            }

            match open {
                None => {
                    run.start_segment(t);
                    open = Some(t);
                }
                Some(start)
                    if exceeds_time_gap(
                        &fixes[t - 1],
                        &fixes[t],
                        self.config.max_time_gap_seconds,
                    ) =>
                {
                    bounds.push((start, t - 1));
                    breakages.record(t - 1, BreakageReason::TimeGap);
                    run.start_segment(t);
                    open = Some(t);
                }
                Some(start) => {
                    run.advance(t - 1, t)?;
                    if is_unreachable(&run.lattice, t) {
                        bounds.push((start, t - 1));
                        breakages.record(t - 1, BreakageReason::Unreachable);
                        run.lattice.reset(t);
                        run.start_segment(t);
                        open = Some(t);
                    }
                }
            }

            run.introspection.set_viterbi(t, run.lattice.cells(t));
            trace!(
                "Timestamp {}: best log-probability {:.3}",
                t,
                run.lattice.max_score(t)
            );
        }
        if let Some(start) = open {
            bounds.push((start, n - 1));
        }

        let segments = recover_segments(
            &run.lattice,
            fixes,
            &self.model,
            &bounds,
            &mut run.introspection,
        )?;

        let output = MatchOutput {
            trace_len: n,
            segments,
            unmatched,
            breakages: breakages.into_breakages(),
        };
        run.introspection.add_breakage(&output.breakage_flags());

        info!(
            "Map matching completed in {:.2?}: {} segments, {} breakages, {} unmatched fixes",
            start_time.elapsed(),
            output.segments.len(),
            output.breakages.len(),
            output.unmatched.len()
        );

        Ok(output)
    }

    /// Match independent traces in parallel. Every trace gets its own lattice; the
    /// candidate source and the oracle are only read.
    pub fn match_batch<S, D>(
        &self,
        traces: &[Vec<Fix>],
        source: &S,
        oracle: &D,
    ) -> Vec<Result<MatchOutput, MatchError>>
    where
        S: CandidateSource + ?Sized,
        D: DistanceOracle + ?Sized,
    {
        debug!("Matching batch of {} traces", traces.len());
        traces
            .par_iter()
            .map(|fixes| self.match_trace(fixes, source, oracle, None))
            .collect()
    }
}

fn validate_timestamps(fixes: &[Fix]) -> Result<(), MatchError> {
    match fixes
        .windows(2)
        .position(|w| w[1].timestamp < w[0].timestamp)
    {
        Some(i) => Err(MatchError::UnorderedTimestamps { index: i + 1 }),
        None => Ok(()),
    }
}

/// Backtrack every completed segment, marking the chosen states on the observer
fn recover_segments(
    lattice: &CandidateLattice,
    fixes: &[Fix],
    model: &ProbabilityModel,
    bounds: &[(usize, usize)],
    introspection: &mut Introspection<'_>,
) -> Result<Vec<Segment>, MatchError> {
    let mut segments = Vec::with_capacity(bounds.len());
    for &(start, end) in bounds {
        let segment = backtrack(lattice, fixes, model, start, end)
            .ok_or(MatchError::BrokenPath { start, end })?;
        for point in &segment.points {
            introspection.add_chosen(StateId::new(point.timestamp, point.candidate_index));
        }
        segments.push(segment);
    }
    Ok(segments)
}

/// Working state of one matching request
struct ViterbiRun<'a, 'o, D: DistanceOracle + ?Sized> {
    model: ProbabilityModel,
    prune_margin: Option<f64>,
    fixes: &'a [Fix],
    oracle: &'a D,
    lattice: CandidateLattice,
    introspection: Introspection<'o>,
}

impl<D: DistanceOracle + ?Sized> ViterbiRun<'_, '_, D> {
    /// Open a segment at `t`, scoring its states by emission alone
    fn start_segment(&mut self, t: usize) {
        let fix = &self.fixes[t];
        let scores: Vec<f64> = self
            .lattice
            .candidates(t)
            .iter()
            .map(|c| self.model.emission_log_prob(fix, c))
            .collect();
        for (cell, score) in self.lattice.cells_mut(t).iter_mut().zip(scores) {
            *cell = ViterbiCell {
                score,
                predecessor: None,
                pruned: false,
            };
        }
        self.prune(t);
    }

    /// Score every state at `t` from the viable states at `prev`
    fn advance(&mut self, prev: usize, t: usize) -> Result<(), MatchError> {
        let fix = &self.fixes[t];

        for s in 0..self.lattice.width(t) {
            let to = StateId::new(t, s);
            let to_candidate = self.lattice.candidate(to);
            let emission = self.model.emission_log_prob(fix, to_candidate);

            let mut best_score = IMPOSSIBLE_LOG_PROB;
            let mut best_prev = None;

            for sp in 0..self.lattice.width(prev) {
                let from = StateId::new(prev, sp);
                let prev_cell = *self.lattice.cell(from);
                if !prev_cell.is_viable() {
                    continue;
                }

                let from_candidate = self.lattice.candidate(from);
                let haversine = haversine_distance(from_candidate.location, to_candidate.location);
                let network = self
                    .oracle
                    .network_distance_within(
                        from_candidate,
                        to_candidate,
                        self.model.max_network_distance(haversine),
                    )
                    .map_err(|e| MatchError::oracle(from, to, e))?;
                let transition = self.model.transition_log_prob(network, haversine);

                if self.introspection.is_enabled() {
                    self.introspection.add_transition(&TransitionRecord {
                        from,
                        to,
                        prev_score: prev_cell.score,
                        emission_log_prob: emission,
                        transition_log_prob: transition,
                        network_distance: network,
                        haversine_distance: haversine,
                    });
                }

                if is_impossible(transition) {
                    continue;
                }
                // strict comparison keeps the lowest predecessor index on ties
                let score = prev_cell.score + transition;
                if score > best_score {
                    best_score = score;
                    best_prev = Some(from);
                }
            }

            if let Some(predecessor) = best_prev {
                *self.lattice.cell_mut(to) = ViterbiCell {
                    score: best_score + emission,
                    predecessor: Some(predecessor),
                    pruned: false,
                };
            }
        }

        self.prune(t);
        Ok(())
    }

    /// Flag states that may not act as predecessors: unreachable ones, and with a
    /// margin configured, those too far below the best score at `t`
    fn prune(&mut self, t: usize) {
        let best = self.lattice.max_score(t);
        let margin = self.prune_margin;
        for cell in self.lattice.cells_mut(t) {
            cell.pruned =
                !cell.is_reachable() || margin.is_some_and(|m| cell.score < best - m);
        }
    }
}
