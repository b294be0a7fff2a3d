//! Emission and transition models of the hidden Markov model.
//!
//! Everything here works in the natural-log domain. A zero probability is
//! represented by [`IMPOSSIBLE_LOG_PROB`]; emissions never produce it.

use std::f64::consts::PI;

use geo::{Distance, Haversine};
use geo_types::Point;

use crate::mapmatcher::MatcherConfig;
use crate::routing::NetworkDistance;
use crate::types::{Candidate, Fix};

/// Log-probability of an unreachable state or transition
pub const IMPOSSIBLE_LOG_PROB: f64 = f64::NEG_INFINITY;

/// Lower bound for emission log-probabilities. Large enough in magnitude to lose
/// against any realistic emission, small enough that long sums stay finite.
pub const MIN_EMISSION_LOG_PROB: f64 = -1.0e12;

pub fn is_impossible(log_prob: f64) -> bool {
    log_prob == IMPOSSIBLE_LOG_PROB || log_prob.is_nan()
}

/// Great-circle distance in meters
pub fn haversine_distance(a: Point<f64>, b: Point<f64>) -> f64 {
    Haversine.distance(a, b)
}

/// Log of the zero-mean normal density with deviation `sigma` at `x`
pub fn gaussian_log_density(x: f64, sigma: f64) -> f64 {
    -0.5 * (2.0 * PI).ln() - sigma.ln() - 0.5 * (x / sigma).powi(2)
}

/// Gaussian emission and transition models with their tunable parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityModel {
    pub emission_sigma: f64,
    pub transition_sigma: f64,
    pub max_detour_ratio: f64,
    pub detour_floor_meters: f64,
    pub use_fix_accuracy: bool,
}

impl ProbabilityModel {
    pub fn from_config(config: &MatcherConfig) -> Self {
        Self {
            emission_sigma: config.emission_sigma,
            transition_sigma: config.transition_sigma,
            max_detour_ratio: config.max_detour_ratio,
            detour_floor_meters: config.detour_floor_meters,
            use_fix_accuracy: config.use_fix_accuracy,
        }
    }

    /// Standard deviation of the GPS error assumed for `fix`
    pub fn emission_sigma_for(&self, fix: &Fix) -> f64 {
        match fix.accuracy {
            Some(accuracy) if self.use_fix_accuracy && accuracy.is_finite() && accuracy > 0.0 => {
                accuracy
            }
            _ => self.emission_sigma,
        }
    }

    /// Likelihood that `fix` was observed while the vehicle was at `candidate`
    pub fn emission_log_prob(&self, fix: &Fix, candidate: &Candidate) -> f64 {
        let distance = haversine_distance(fix.location, candidate.location);
        let log_prob = gaussian_log_density(distance, self.emission_sigma_for(fix));
        if log_prob.is_nan() {
            return MIN_EMISSION_LOG_PROB;
        }
        log_prob.max(MIN_EMISSION_LOG_PROB)
    }

    /// Highest emission log-probability reachable for `fix` (candidate exactly on the fix)
    pub fn emission_peak(&self, fix: &Fix) -> f64 {
        gaussian_log_density(0.0, self.emission_sigma_for(fix))
    }

    /// Likelihood of driving between two candidates whose straight-line distance is
    /// `haversine_distance`. Detours and backtracking are penalized by the gap between
    /// the network and straight-line distance.
    pub fn transition_log_prob(&self, network: NetworkDistance, haversine_distance: f64) -> f64 {
        let network_distance = match network {
            NetworkDistance::Reachable(d) if d.is_finite() && d >= 0.0 => d,
            _ => return IMPOSSIBLE_LOG_PROB,
        };
        if !haversine_distance.is_finite() {
            return IMPOSSIBLE_LOG_PROB;
        }

        if network_distance > self.max_network_distance(haversine_distance) {
            return IMPOSSIBLE_LOG_PROB;
        }

        gaussian_log_density(
            (network_distance - haversine_distance).abs(),
            self.transition_sigma,
        )
    }

    /// Longest network distance still plausible for a hop of `haversine_distance` meters
    pub fn max_network_distance(&self, haversine_distance: f64) -> f64 {
        haversine_distance.max(self.detour_floor_meters) * self.max_detour_ratio
    }

    /// Highest transition log-probability (network distance equal to straight-line distance)
    pub fn transition_peak(&self) -> f64 {
        gaussian_log_density(0.0, self.transition_sigma)
    }
}

impl Default for ProbabilityModel {
    fn default() -> Self {
        Self::from_config(&MatcherConfig::default())
    }
}
