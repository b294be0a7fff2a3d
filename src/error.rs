use thiserror::Error;

use crate::types::StateId;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that abort a matching request
#[derive(Debug, Error)]
pub enum MatchError {
    /// No fix in the trace has a single candidate
    #[error("insufficient input: no fix in the trace has a road candidate")]
    InsufficientInput,

    #[error("fix {index} has a timestamp earlier than its predecessor")]
    UnorderedTimestamps { index: usize },

    #[error("got {lists} candidate lists for {fixes} fixes")]
    CandidateCountMismatch { fixes: usize, lists: usize },

    #[error("invalid matcher configuration: {0}")]
    InvalidConfig(String),

    /// A completed segment has no recoverable path; the lattice is inconsistent
    #[error("no path could be recovered for segment {start}..={end}")]
    BrokenPath { start: usize, end: usize },

    /// The candidate source failed for a fix
    #[error("candidate lookup failed for fix {index}")]
    CandidateSource {
        index: usize,
        #[source]
        source: BoxedSource,
    },

    /// The distance oracle failed; the whole request is abandoned
    #[error("distance oracle failed between {from:?} and {to:?}")]
    Oracle {
        from: StateId,
        to: StateId,
        #[source]
        source: BoxedSource,
    },
}

impl MatchError {
    pub(crate) fn oracle(from: StateId, to: StateId, err: anyhow::Error) -> Self {
        Self::Oracle {
            from,
            to,
            source: err.into(),
        }
    }

    pub(crate) fn candidate_source(index: usize, err: anyhow::Error) -> Self {
        Self::CandidateSource {
            index,
            source: err.into(),
        }
    }
}
