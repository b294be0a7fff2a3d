mod common;

use common::fixes_along_equator;
use geo_types::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trace_matcher::debug::CLAMP_LIMIT;
use trace_matcher::probability::haversine_distance;
use trace_matcher::{
    BreakageReason, Candidate, Fix, MapMatcher, MatchError, MatchOutput, MatcherConfig,
    MatchingDebugInfo, MatchingDebugPayload, NetworkDistance,
};

const TRACES: u64 = 200;

fn mix(a: u64, b: u64) -> u64 {
    let mut x = a.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ b.wrapping_add(0x632B_E59B_D9B4_E019);
    x ^= x >> 29;
    x = x.wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x ^ (x >> 32)
}

// Deterministic oracle: some edge pairs are disconnected, the rest detour a little
fn scrambled(from: &Candidate, to: &Candidate) -> anyhow::Result<NetworkDistance> {
    let h = mix(from.edge_id, to.edge_id);
    if h % 5 == 0 {
        return Ok(NetworkDistance::Unreachable);
    }
    let straight = haversine_distance(from.location, to.location);
    Ok(NetworkDistance::Reachable(
        straight * (1.0 + (h % 7) as f64 * 0.1),
    ))
}

fn random_trace(rng: &mut StdRng) -> (Vec<Fix>, Vec<Vec<Candidate>>) {
    let n = rng.random_range(1..12);
    let fixes = fixes_along_equator(n, 0.001);
    let candidates = fixes
        .iter()
        .map(|fix| {
            let width = rng.random_range(0..4);
            (0..width)
                .map(|_| {
                    let location = Point::new(
                        fix.location.x() + rng.random_range(-0.0002..0.0002),
                        fix.location.y() + rng.random_range(-0.0002..0.0002),
                    );
                    let offset = haversine_distance(fix.location, location);
                    Candidate::new(location, rng.random_range(0..20), offset)
                })
                .collect()
        })
        .collect();
    (fixes, candidates)
}

fn run(
    matcher: &MapMatcher,
    fixes: &[Fix],
    candidates: &[Vec<Candidate>],
) -> Option<(MatchOutput, MatchingDebugPayload)> {
    let mut info = MatchingDebugInfo::new();
    match matcher.match_candidates(fixes, candidates.to_vec(), &scrambled, Some(&mut info)) {
        Ok(output) => Some((output, info.into_payload())),
        Err(MatchError::InsufficientInput) => {
            assert!(candidates.iter().all(Vec::is_empty));
            None
        }
        Err(e) => panic!("unexpected error: {e}"),
    }
}

fn check_output(candidates: &[Vec<Candidate>], output: &MatchOutput, payload: &MatchingDebugPayload) {
    let n = candidates.len();
    assert_eq!(output.trace_len, n);

    // every fix is either on exactly one segment or unmatched for lack of candidates
    let mut covered = vec![0usize; n];
    for segment in &output.segments {
        assert!(segment.start <= segment.end);
        assert_eq!(segment.len(), segment.end - segment.start + 1);
        for (offset, point) in segment.points.iter().enumerate() {
            assert_eq!(point.timestamp, segment.start + offset);
            assert!(point.candidate_index < candidates[point.timestamp].len());
            assert_eq!(
                point.candidate,
                candidates[point.timestamp][point.candidate_index]
            );
            assert!(point.log_probability.is_finite());
            covered[point.timestamp] += 1;
        }
        assert!((0.0..=1.0).contains(&segment.confidence));
        assert_eq!(
            segment.log_probability,
            segment.points.last().map(|p| p.log_probability).unwrap()
        );
    }
    for (t, count) in covered.iter().enumerate() {
        if candidates[t].is_empty() {
            assert_eq!(*count, 0);
            assert!(output.unmatched.contains(&t));
        } else {
            assert_eq!(*count, 1, "timestamp {t} covered {count} times");
        }
    }

    // consecutive segments are separated by a flagged boundary, never inside one
    let flags = output.breakage_flags();
    assert_eq!(flags.len(), n.saturating_sub(1));
    for pair in output.segments.windows(2) {
        assert!(pair[0].end < pair[1].start);
        assert!(flags[pair[0].end]);
    }
    for segment in &output.segments {
        for b in segment.start..segment.end {
            assert!(!flags[b]);
        }
    }
    assert_eq!(payload.breakage, flags);

    // the chosen state is the best one at the end of its segment
    for segment in &output.segments {
        let last = segment.points.last().unwrap();
        let layer = &payload.states[segment.end];
        let chosen = layer[last.candidate_index].viterbi;
        assert!(layer.iter().all(|s| s.viterbi <= chosen));
        for point in &segment.points {
            assert_eq!(
                payload.states[point.timestamp][point.candidate_index].chosen,
                Some(true)
            );
        }
    }

    // an unreachable break means every evaluated transition across it was impossible
    for breakage in &output.breakages {
        let b = breakage.after;
        let across = payload.states[b]
            .iter()
            .flat_map(|s| s.transitions.iter())
            .filter(|tr| tr.to[0] == b + 1);
        match breakage.reason {
            BreakageReason::Unreachable => {
                let mut evaluated = 0;
                for transition in across {
                    assert_eq!(transition.properties[2], -CLAMP_LIMIT);
                    evaluated += 1;
                }
                assert!(evaluated > 0);
            }
            BreakageReason::NoCandidates => {
                assert!(candidates[b].is_empty() || candidates[b + 1].is_empty());
                assert_eq!(across.count(), 0);
            }
            BreakageReason::TimeGap => panic!("time gaps are disabled"),
        }
    }
    for segment in &output.segments {
        for b in segment.start..segment.end {
            let possible = payload.states[b]
                .iter()
                .flat_map(|s| s.transitions.iter())
                .any(|tr| tr.to[0] == b + 1 && tr.properties[2] > -CLAMP_LIMIT);
            assert!(possible, "boundary {b} inside a segment has no possible transition");
        }
    }
}

#[test]
fn random_traces_produce_well_formed_matches() {
    let matcher = MapMatcher::new(MatcherConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..TRACES {
        let (fixes, candidates) = random_trace(&mut rng);
        if let Some((output, payload)) = run(&matcher, &fixes, &candidates) {
            check_output(&candidates, &output, &payload);
        }
    }
}

#[test]
fn matching_is_deterministic() {
    let matcher = MapMatcher::new(MatcherConfig::default()).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let (fixes, candidates) = random_trace(&mut rng);
        let first = run(&matcher, &fixes, &candidates);
        let second = run(&matcher, &fixes, &candidates);
        assert_eq!(first, second);

        let silent = matcher.match_candidates(&fixes, candidates.clone(), &scrambled, None);
        match (first, silent) {
            (Some((observed, _)), Ok(silent)) => assert_eq!(observed, silent),
            (None, Err(MatchError::InsufficientInput)) => {}
            (a, b) => panic!("observer changed the outcome: {a:?} vs {b:?}"),
        }
    }
}

#[test]
fn pruning_never_drops_the_best_state() {
    let matcher = MapMatcher::new(MatcherConfig {
        prune_margin: Some(5.0),
        ..MatcherConfig::default()
    })
    .unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..TRACES {
        let (fixes, candidates) = random_trace(&mut rng);
        let Some((output, payload)) = run(&matcher, &fixes, &candidates) else {
            continue;
        };
        for layer in payload.states.iter().filter(|l| !l.is_empty()) {
            let best = layer
                .iter()
                .map(|s| s.viterbi)
                .fold(f64::NEG_INFINITY, f64::max);
            if best > -CLAMP_LIMIT {
                assert!(layer.iter().any(|s| s.viterbi == best && !s.pruned));
            }
        }
        for segment in &output.segments {
            assert!(segment.points.iter().all(|p| p.log_probability.is_finite()));
        }
    }
}
