use chrono::{DateTime, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// One GPS sample of a trace
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Observed position (x = longitude, y = latitude)
    pub location: Point<f64>,
    pub timestamp: DateTime<Utc>,
    /// Reported horizontal accuracy in meters, if the device provided one
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl Fix {
    pub fn new(location: Point<f64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            location,
            timestamp,
            accuracy: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Projection of a fix onto one road network edge
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Projected point on the edge
    pub location: Point<f64>,
    pub edge_id: u64,
    /// Perpendicular distance from the fix to the edge (meters)
    pub offset: f64,
    /// Position along the owning edge, 0.0 at its start and 1.0 at its end
    #[serde(default)]
    pub fraction: f64,
}

impl Candidate {
    pub fn new(location: Point<f64>, edge_id: u64, offset: f64) -> Self {
        Self {
            location,
            edge_id,
            offset,
            fraction: 0.0,
        }
    }

    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = fraction;
        self
    }
}

/// A lattice state: candidate `candidate` of the fix at `timestamp`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId {
    pub timestamp: usize,
    pub candidate: usize,
}

impl StateId {
    pub fn new(timestamp: usize, candidate: usize) -> Self {
        Self {
            timestamp,
            candidate,
        }
    }
}

/// The candidate chosen for one fix of a segment
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchedPoint {
    pub timestamp: usize,
    pub candidate_index: usize,
    pub candidate: Candidate,
    /// Cumulative log-probability of the path up to and including this point
    pub log_probability: f64,
}

/// A maximal run of fixes matched as one contiguous Viterbi run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Segment {
    /// First timestamp index covered (inclusive)
    pub start: usize,
    /// Last timestamp index covered (inclusive)
    pub end: usize,
    pub points: Vec<MatchedPoint>,
    /// Final cumulative log-probability of the winning path
    pub log_probability: f64,
    /// Length-normalized confidence in (0, 1]
    pub confidence: f64,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn contains(&self, timestamp: usize) -> bool {
        (self.start..=self.end).contains(&timestamp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakageReason {
    /// No candidate at the later fix has a viable predecessor
    Unreachable,
    /// One side of the boundary is a fix without candidates
    NoCandidates,
    /// The fixes are further apart in time than the configured limit
    TimeGap,
}

/// A break between timestamp `after` and `after + 1`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakage {
    pub after: usize,
    pub reason: BreakageReason,
}

/// Result of matching one trace
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchOutput {
    /// Number of fixes in the input trace
    pub trace_len: usize,
    /// Independently matched segments, in trace order
    pub segments: Vec<Segment>,
    /// Timestamps of fixes that had no candidates
    pub unmatched: Vec<usize>,
    /// Break boundaries, in trace order
    pub breakages: Vec<Breakage>,
}

impl MatchOutput {
    /// One flag per boundary between consecutive fixes, true where the trace was split
    pub fn breakage_flags(&self) -> Vec<bool> {
        let mut flags = vec![false; self.trace_len.saturating_sub(1)];
        for breakage in &self.breakages {
            if let Some(flag) = flags.get_mut(breakage.after) {
                *flag = true;
            }
        }
        flags
    }

    /// The chosen candidate for every fix of the trace, `None` where the fix is unmatched
    pub fn chosen_candidates(&self) -> Vec<Option<&Candidate>> {
        let mut chosen = vec![None; self.trace_len];
        for point in self.segments.iter().flat_map(|s| s.points.iter()) {
            chosen[point.timestamp] = Some(&point.candidate);
        }
        chosen
    }

    pub fn matched_count(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }
}
