//! Hidden-Markov-model map matching of GPS traces.
//!
//! A trace of [`Fix`]es is turned into a lattice of road [`Candidate`]s, scored
//! with a log-domain Viterbi search and split into independently matched
//! [`Segment`]s wherever no plausible transition exists.

pub mod backtrack;
pub mod breakage;
pub mod debug;
pub mod error;
pub mod lattice;
pub mod mapmatcher;
pub mod probability;
pub mod road_network;
pub mod routing;
pub mod types;

pub use debug::{MatchObserver, MatchingDebugInfo, MatchingDebugPayload};
pub use error::MatchError;
pub use mapmatcher::{MapMatcher, MatcherConfig};
pub use probability::{IMPOSSIBLE_LOG_PROB, ProbabilityModel};
pub use road_network::{CandidateSource, NetworkConfig, RoadEdge, RoadNetwork};
pub use routing::{DistanceOracle, NetworkDistance};
pub use types::{
    Breakage, BreakageReason, Candidate, Fix, MatchOutput, MatchedPoint, Segment, StateId,
};
