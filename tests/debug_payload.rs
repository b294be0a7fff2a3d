mod common;

use common::{fixes_along_equator, north_of, on_fix, straight};
use serde_json::Value;
use trace_matcher::debug::CLAMP_LIMIT;
use trace_matcher::{
    Candidate, MapMatcher, MatcherConfig, MatchingDebugInfo, MatchingDebugPayload,
    NetworkDistance,
};

// Five fixes with two candidates each, except an empty fix at 3; nothing leads onto the edges of fix 1
fn traced_run() -> (Vec<Vec<Candidate>>, MatchingDebugInfo) {
    let fixes = fixes_along_equator(5, 0.001);
    let candidates: Vec<Vec<Candidate>> = fixes
        .iter()
        .enumerate()
        .map(|(i, f)| {
            if i == 3 {
                Vec::new()
            } else {
                let id = 10 * (i as u64 + 1);
                vec![on_fix(f, id), north_of(f, id + 1, 0.0001)]
            }
        })
        .collect();
    let oracle = |from: &Candidate, to: &Candidate| -> anyhow::Result<NetworkDistance> {
        if to.edge_id / 10 == 2 {
            Ok(NetworkDistance::Unreachable)
        } else {
            straight(from, to)
        }
    };

    let matcher = MapMatcher::new(MatcherConfig::default()).unwrap();
    let mut info = MatchingDebugInfo::new();
    matcher
        .match_candidates(&fixes, candidates.clone(), &oracle, Some(&mut info))
        .unwrap();
    (candidates, info)
}

fn assert_finite_numbers(value: &Value) {
    match value {
        Value::Number(n) => {
            let x = n.as_f64().unwrap();
            assert!(x.is_finite() && x.abs() <= CLAMP_LIMIT, "{x} out of range");
        }
        Value::Array(items) => items.iter().for_each(assert_finite_numbers),
        Value::Object(fields) => fields.values().for_each(assert_finite_numbers),
        _ => {}
    }
}

#[test]
fn payload_mirrors_the_lattice() {
    let (candidates, info) = traced_run();
    let json = info.to_json();

    let states = json["states"].as_array().unwrap();
    assert_eq!(states.len(), candidates.len());
    for (t, layer) in states.iter().enumerate() {
        let layer = layer.as_array().unwrap();
        assert_eq!(layer.len(), candidates[t].len());
        for (s, state) in layer.iter().enumerate() {
            let location = candidates[t][s].location;
            assert_eq!(state["coordinate"][0].as_f64().unwrap(), location.x());
            assert_eq!(state["coordinate"][1].as_f64().unwrap(), location.y());
            assert!(state["viterbi"].is_number());
            assert!(state["pruned"].is_boolean());
            for transition in state["transitions"].as_array().unwrap() {
                assert_eq!(transition["to"][0].as_u64().unwrap(), t as u64 + 1);
                assert_eq!(transition["properties"].as_array().unwrap().len(), 5);
            }
        }
    }

    assert_eq!(
        json["breakage"],
        serde_json::json!([true, false, true, true])
    );
    assert_finite_numbers(&json);
}

#[test]
fn impossible_values_are_clamped() {
    let (_, info) = traced_run();
    let payload = info.payload();

    // every transition into timestamp 1 hits the unreachable edge family
    for state in &payload.states[0] {
        assert_eq!(state.transitions.len(), 2);
        for transition in &state.transitions {
            assert_eq!(transition.properties[2], -CLAMP_LIMIT);
            assert_eq!(transition.properties[3], CLAMP_LIMIT);
        }
    }
    // the restarted segment at 1 carries emission-only scores
    assert!(payload.states[1].iter().all(|s| s.viterbi > -CLAMP_LIMIT));
    assert!(payload.states[1].iter().all(|s| !s.pruned));
}

#[test]
fn chosen_marks_one_state_per_matched_fix() {
    let (candidates, info) = traced_run();
    let payload = info.payload();
    for (t, layer) in payload.states.iter().enumerate() {
        let chosen = layer.iter().filter(|s| s.chosen == Some(true)).count();
        let expected = usize::from(!candidates[t].is_empty());
        assert_eq!(chosen, expected, "timestamp {t}");
    }
    // the on-fix candidate wins wherever there is a choice
    for layer in payload.states.iter().filter(|l| !l.is_empty()) {
        assert_eq!(layer[0].chosen, Some(true));
    }
}

#[test]
fn payload_survives_a_json_round_trip() {
    let (_, info) = traced_run();
    let text = serde_json::to_string(info.payload()).unwrap();
    let parsed: MatchingDebugPayload = serde_json::from_str(&text).unwrap();
    assert_eq!(&parsed, info.payload());
}
