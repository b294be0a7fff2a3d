//! Introspection of a matching run.
//!
//! The engine pushes every decision into a [`MatchObserver`]; observers only
//! receive copies and have no way to reach back into the engine's state.
//! [`MatchingDebugInfo`] accumulates those events into the JSON payload used by
//! the debugging tools.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::lattice::{CandidateLattice, ViterbiCell};
use crate::probability::IMPOSSIBLE_LOG_PROB;
use crate::routing::NetworkDistance;
use crate::types::StateId;

/// Largest magnitude written to the debug payload
pub const CLAMP_LIMIT: f64 = f32::MAX as f64;

/// Map a log-probability or distance to a finite value that JSON can carry
pub fn clamp_float(value: f64) -> f64 {
    if value.is_nan() {
        return -CLAMP_LIMIT;
    }
    value.clamp(-CLAMP_LIMIT, CLAMP_LIMIT)
}

/// One evaluated transition, as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionRecord {
    pub from: StateId,
    pub to: StateId,
    pub prev_score: f64,
    pub emission_log_prob: f64,
    pub transition_log_prob: f64,
    pub network_distance: NetworkDistance,
    pub haversine_distance: f64,
}

/// Receives the decisions of a matching run. All methods default to no-ops.
pub trait MatchObserver {
    /// Called once with the freshly built lattice, before any scoring
    fn initialize(&mut self, _lattice: &CandidateLattice) {}

    /// Called for every transition the engine evaluates
    fn add_transition(&mut self, _record: &TransitionRecord) {}

    /// Called with the final cells of timestamp `t`
    fn set_viterbi(&mut self, _t: usize, _cells: &[ViterbiCell]) {}

    /// Called for each state on a winning path
    fn add_chosen(&mut self, _state: StateId) {}

    /// Called once at the end with one flag per boundary
    fn add_breakage(&mut self, _breakage: &[bool]) {}
}

/// Optional observer of one run; `None` turns every call into a no-op
pub(crate) struct Introspection<'a> {
    observer: Option<&'a mut dyn MatchObserver>,
}

impl<'a> Introspection<'a> {
    pub(crate) fn new(observer: Option<&'a mut dyn MatchObserver>) -> Self {
        Self { observer }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    pub(crate) fn initialize(&mut self, lattice: &CandidateLattice) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.initialize(lattice);
        }
    }

    pub(crate) fn add_transition(&mut self, record: &TransitionRecord) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.add_transition(record);
        }
    }

    pub(crate) fn set_viterbi(&mut self, t: usize, cells: &[ViterbiCell]) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.set_viterbi(t, cells);
        }
    }

    pub(crate) fn add_chosen(&mut self, state: StateId) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.add_chosen(state);
        }
    }

    pub(crate) fn add_breakage(&mut self, breakage: &[bool]) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.add_breakage(breakage);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugTransition {
    /// Target state as `[timestamp, candidate]`
    pub to: [usize; 2],
    /// `[prev_viterbi, emission_pr, transition_pr, network_distance, haversine_distance]`
    pub properties: [f64; 5],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugState {
    /// `[lon, lat]` of the candidate
    pub coordinate: [f64; 2],
    pub viterbi: f64,
    pub pruned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<bool>,
    pub transitions: Vec<DebugTransition>,
}

/// Serialized view of a run: states indexed by timestamp then candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingDebugPayload {
    pub states: Vec<Vec<DebugState>>,
    pub breakage: Vec<bool>,
}

/// Observer that records a run for the debugging tools
#[derive(Debug, Clone, Default)]
pub struct MatchingDebugInfo {
    payload: MatchingDebugPayload,
}

impl MatchingDebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(&self) -> &MatchingDebugPayload {
        &self.payload
    }

    pub fn into_payload(self) -> MatchingDebugPayload {
        self.payload
    }

    pub fn to_json(&self) -> Value {
        json!(self.payload)
    }

    fn state_mut(&mut self, state: StateId) -> Option<&mut DebugState> {
        self.payload
            .states
            .get_mut(state.timestamp)
            .and_then(|layer| layer.get_mut(state.candidate))
    }
}

impl MatchObserver for MatchingDebugInfo {
    fn initialize(&mut self, lattice: &CandidateLattice) {
        self.payload.states = (0..lattice.len())
            .map(|t| {
                lattice
                    .candidates(t)
                    .iter()
                    .map(|candidate| DebugState {
                        coordinate: [candidate.location.x(), candidate.location.y()],
                        viterbi: clamp_float(IMPOSSIBLE_LOG_PROB),
                        pruned: false,
                        chosen: None,
                        transitions: Vec::new(),
                    })
                    .collect()
            })
            .collect();
        self.payload.breakage.clear();
    }

    fn add_transition(&mut self, record: &TransitionRecord) {
        let network_distance = record.network_distance.meters().unwrap_or(f64::INFINITY);
        let transition = DebugTransition {
            to: [record.to.timestamp, record.to.candidate],
            properties: [
                clamp_float(record.prev_score),
                clamp_float(record.emission_log_prob),
                clamp_float(record.transition_log_prob),
                clamp_float(network_distance),
                clamp_float(record.haversine_distance),
            ],
        };
        if let Some(state) = self.state_mut(record.from) {
            state.transitions.push(transition);
        }
    }

    fn set_viterbi(&mut self, t: usize, cells: &[ViterbiCell]) {
        let Some(layer) = self.payload.states.get_mut(t) else {
            return;
        };
        for (state, cell) in layer.iter_mut().zip(cells) {
            state.viterbi = clamp_float(cell.score);
            state.pruned = cell.pruned;
        }
    }

    fn add_chosen(&mut self, state: StateId) {
        if let Some(state) = self.state_mut(state) {
            state.chosen = Some(true);
        }
    }

    fn add_breakage(&mut self, breakage: &[bool]) {
        self.payload.breakage = breakage.to_vec();
    }
}
