//! # Rebasing engine
//! Pure, testable logic that folds one tick of heterogeneous per-source readings
//! into a single index value. No I/O; the orchestrator owns persistence.
//!
//! Per source, a raw reading becomes a *base* value according to its
//! [`SourceType`]. A source that contributes a base for the first time in a
//! rebase episode gets an additive `rebase_offset` so that its contribution
//! lands exactly on the current cross-source baseline. The aggregate is the
//! mean of `base + rebase_offset` over every source with a base this tick.

use std::collections::BTreeMap;

use crate::model::{SourceState, SourceType};

/// Result of one normalization tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    /// Updated state for every configured source.
    pub states: BTreeMap<String, SourceState>,
    /// Rebased contribution per contributing source.
    pub used: BTreeMap<String, f64>,
    pub aggregate: f64,
    /// Sources that (re)validated this tick and got a fresh offset.
    pub rebased: Vec<String>,
}

/// Advance every source by one tick.
///
/// `readings` may cover any subset of the configured sources; a source absent
/// from it (not due, or its fetch failed) stands in with its last known value
/// when it is already valid. Readings for sources without state are ignored.
pub fn normalize_tick(
    prior: &BTreeMap<String, SourceState>,
    readings: &BTreeMap<String, f64>,
) -> TickOutcome {
    let mut states = prior.clone();

    for name in readings.keys().filter(|k| !prior.contains_key(*k)) {
        tracing::warn!(target: "normalize", source = %name, "reading for unconfigured source ignored");
    }

    // 1) Base values. `was_valid` is captured before this tick's transitions.
    let mut contributions: Vec<(String, f64, bool)> = Vec::new();
    for (name, state) in states.iter_mut() {
        let was_valid = state.has_valid_data;
        if let Some(base) = observe(state, readings.get(name).copied()) {
            contributions.push((name.clone(), base, was_valid && state.has_valid_data));
        }
    }

    // 2) Rebase newly valid sources against the sources that were already valid.
    let mut pool: Vec<f64> = contributions
        .iter()
        .filter(|(_, _, was_valid)| *was_valid)
        .map(|(name, base, _)| base + states[name].rebase_offset)
        .collect();

    let mut rebased = Vec::new();
    for (name, base, was_valid) in &contributions {
        if *was_valid {
            continue;
        }
        let Some(state) = states.get_mut(name) else {
            continue;
        };
        state.rebase_offset = match mean(&pool) {
            Some(baseline) => baseline - base,
            None => 0.0,
        };
        state.has_valid_data = true;
        // Adjusted value equals the baseline, so the pool mean is unchanged;
        // only matters when this source is the first anchor.
        pool.push(base + state.rebase_offset);
        tracing::debug!(
            target: "normalize",
            source = %name,
            base = *base,
            offset = state.rebase_offset,
            "source rebased"
        );
        rebased.push(name.clone());
    }

    // 3) Aggregate.
    let used: BTreeMap<String, f64> = contributions
        .iter()
        .map(|(name, base, _)| (name.clone(), base + states[name].rebase_offset))
        .collect();
    let values: Vec<f64> = used.values().copied().collect();
    let aggregate = mean(&values).unwrap_or(0.0);

    TickOutcome {
        states,
        used,
        aggregate,
        rebased,
    }
}

/// Update `prev` from this tick's reading and return the base value, if any.
fn observe(state: &mut SourceState, reading: Option<f64>) -> Option<f64> {
    // Valid without a previous reading cannot be continued; start over.
    if state.has_valid_data && state.prev.value.is_none() {
        state.invalidate();
    }

    match reading {
        Some(v) if !v.is_finite() => {
            state.invalidate();
            None
        }
        Some(v) => match state.kind {
            SourceType::Raw => {
                state.prev.value = Some(v);
                Some(v)
            }
            kind => {
                // First reading: nothing to diff against yet.
                let last = state.prev.value.replace(v)?;
                let delta = match kind {
                    SourceType::DifferenceMagnitude => (v - last).abs(),
                    _ => v - last,
                };
                if delta > 0.0 {
                    state.prev.diff = Some(delta);
                    Some(delta)
                } else if state.has_valid_data {
                    state.prev.diff
                } else {
                    None
                }
            }
        },
        None if state.has_valid_data => match state.kind {
            SourceType::Raw => state.prev.value,
            _ => state.prev.diff,
        },
        None => None,
    }
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        Some(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

/// Round to 2 decimals for display caches.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn states(items: &[(&str, SourceType)]) -> BTreeMap<String, SourceState> {
        items
            .iter()
            .map(|(n, k)| (n.to_string(), SourceState::new(*k, 60)))
            .collect()
    }

    fn readings(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
        items.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    #[test]
    fn first_raw_source_anchors_at_zero_offset() {
        let prior = states(&[("x", SourceType::Raw)]);
        let out = normalize_tick(&prior, &readings(&[("x", 500.0)]));
        let x = &out.states["x"];
        assert!(x.has_valid_data);
        assert_eq!(x.rebase_offset, 0.0);
        assert!((out.aggregate - 500.0).abs() < EPS);
        assert_eq!(out.rebased, vec!["x".to_string()]);
    }

    #[test]
    fn joining_source_rebases_onto_existing_baseline() {
        let prior = states(&[("x", SourceType::Raw), ("youtube", SourceType::Raw)]);
        let t1 = normalize_tick(&prior, &readings(&[("x", 500.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("x", 520.0), ("youtube", 50_000.0)]));

        let yt = &t2.states["youtube"];
        assert!((yt.rebase_offset - (-49_480.0)).abs() < EPS);
        assert!((t2.used["youtube"] - 520.0).abs() < EPS);
        assert!((t2.aggregate - 520.0).abs() < EPS);
        assert_eq!(t2.rebased, vec!["youtube".to_string()]);
    }

    #[test]
    fn rebase_is_continuous_for_any_magnitudes() {
        for first in [1.0, 37.5, 500.0, 1e6] {
            for joiner in [0.0, 0.01, 42.0, 5e4, 9e9] {
                let prior = states(&[("a", SourceType::Raw), ("b", SourceType::Raw)]);
                let mut cur = normalize_tick(&prior, &readings(&[("a", first)]));
                for _ in 0..3 {
                    cur = normalize_tick(&cur.states, &readings(&[("a", first)]));
                }
                let before = cur.aggregate;
                let at = normalize_tick(&cur.states, &readings(&[("a", first), ("b", joiner)]));
                assert!(
                    (at.aggregate - before).abs() <= 1e-6 * before.abs().max(1.0),
                    "first={first} joiner={joiner} before={before} after={}",
                    at.aggregate
                );
            }
        }
    }

    #[test]
    fn third_source_rebases_against_adjusted_values() {
        let prior = states(&[
            ("a", SourceType::Raw),
            ("b", SourceType::Raw),
            ("c", SourceType::Raw),
        ]);
        let t1 = normalize_tick(&prior, &readings(&[("a", 100.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("a", 100.0), ("b", 7.0)]));
        let t3 = normalize_tick(
            &t2.states,
            &readings(&[("a", 100.0), ("b", 7.0), ("c", 123_456.0)]),
        );
        assert!((t3.aggregate - 100.0).abs() < EPS);
        assert!((t3.used["c"] - 100.0).abs() < EPS);
    }

    #[test]
    fn simultaneous_first_sources_share_first_anchor() {
        let prior = states(&[("a", SourceType::Raw), ("b", SourceType::Raw)]);
        let out = normalize_tick(&prior, &readings(&[("a", 10.0), ("b", 1000.0)]));
        assert_eq!(out.states["a"].rebase_offset, 0.0);
        assert!((out.states["b"].rebase_offset - (-990.0)).abs() < EPS);
        assert!((out.aggregate - 10.0).abs() < EPS);
    }

    #[test]
    fn difference_source_waits_for_second_reading() {
        let prior = states(&[("lastfm", SourceType::DifferenceRaw)]);
        let t1 = normalize_tick(&prior, &readings(&[("lastfm", 100.0)]));
        assert!(!t1.states["lastfm"].has_valid_data);
        assert_eq!(t1.states["lastfm"].prev.value, Some(100.0));
        assert!(t1.used.is_empty());
        assert_eq!(t1.aggregate, 0.0);
    }

    #[test]
    fn difference_carries_forward_last_positive_delta() {
        let prior = states(&[("x", SourceType::DifferenceRaw)]);
        let t1 = normalize_tick(&prior, &readings(&[("x", 100.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("x", 150.0)]));
        assert_eq!(t2.states["x"].prev.diff, Some(50.0));
        assert!((t2.aggregate - 50.0).abs() < EPS);

        let t3 = normalize_tick(&t2.states, &readings(&[("x", 150.0)]));
        assert!((t3.used["x"] - 50.0).abs() < EPS);
        assert!((t3.aggregate - 50.0).abs() < EPS);

        // A regression also carries forward, and does not overwrite prev.diff.
        let t4 = normalize_tick(&t3.states, &readings(&[("x", 120.0)]));
        assert_eq!(t4.states["x"].prev.diff, Some(50.0));
        assert_eq!(t4.states["x"].prev.value, Some(120.0));
        assert!((t4.aggregate - 50.0).abs() < EPS);
    }

    #[test]
    fn zero_delta_before_validity_contributes_nothing() {
        let prior = states(&[("x", SourceType::DifferenceRaw)]);
        let t1 = normalize_tick(&prior, &readings(&[("x", 100.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("x", 100.0)]));
        assert!(!t2.states["x"].has_valid_data);
        assert!(t2.used.is_empty());

        let t3 = normalize_tick(&t2.states, &readings(&[("x", 150.0)]));
        assert!(t3.states["x"].has_valid_data);
        assert!((t3.aggregate - 50.0).abs() < EPS);
    }

    #[test]
    fn magnitude_counts_drops_as_movement() {
        let prior = states(&[("deezer", SourceType::DifferenceMagnitude)]);
        let t1 = normalize_tick(&prior, &readings(&[("deezer", 900.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("deezer", 870.0)]));
        assert!((t2.used["deezer"] - 30.0).abs() < EPS);
    }

    #[test]
    fn absent_valid_source_stands_in_with_last_value() {
        let prior = states(&[("a", SourceType::Raw), ("b", SourceType::Raw)]);
        let t1 = normalize_tick(&prior, &readings(&[("a", 10.0), ("b", 30.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("a", 20.0)]));
        // b keeps 30 - 20 (offset) = 10 as contribution
        assert!((t2.used["b"] - 10.0).abs() < EPS);
        assert!((t2.aggregate - 15.0).abs() < EPS);
    }

    #[test]
    fn absent_difference_source_stands_in_with_last_delta() {
        let prior = states(&[("x", SourceType::DifferenceRaw)]);
        let t1 = normalize_tick(&prior, &readings(&[("x", 10.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("x", 14.0)]));
        let t3 = normalize_tick(&t2.states, &BTreeMap::new());
        assert!((t3.aggregate - 4.0).abs() < EPS);
    }

    #[test]
    fn no_contributions_yields_zero() {
        let prior = states(&[("a", SourceType::Raw)]);
        let out = normalize_tick(&prior, &BTreeMap::new());
        assert_eq!(out.aggregate, 0.0);
        assert!(out.used.is_empty());
        assert!(!out.states["a"].has_valid_data);
    }

    #[test]
    fn non_finite_reading_invalidates_and_revalidation_recomputes_offset() {
        let prior = states(&[("a", SourceType::Raw), ("b", SourceType::Raw)]);
        let t1 = normalize_tick(&prior, &readings(&[("a", 100.0)]));
        let t2 = normalize_tick(&t1.states, &readings(&[("a", 100.0), ("b", 40.0)]));
        assert!((t2.states["b"].rebase_offset - 60.0).abs() < EPS);

        let t3 = normalize_tick(&t2.states, &readings(&[("a", 100.0), ("b", f64::NAN)]));
        assert!(!t3.states["b"].has_valid_data);
        assert!(!t3.used.contains_key("b"));
        assert!((t3.aggregate - 100.0).abs() < EPS);

        let t4 = normalize_tick(&t3.states, &readings(&[("a", 100.0), ("b", 90.0)]));
        assert!((t4.states["b"].rebase_offset - 10.0).abs() < EPS);
        assert!((t4.aggregate - 100.0).abs() < EPS);
    }

    #[test]
    fn inconsistent_valid_state_is_reset_not_fatal() {
        let mut prior = states(&[("a", SourceType::Raw)]);
        if let Some(a) = prior.get_mut("a") {
            a.has_valid_data = true;
            a.rebase_offset = 999.0;
        }
        let out = normalize_tick(&prior, &BTreeMap::new());
        assert!(!out.states["a"].has_valid_data);
        assert_eq!(out.states["a"].rebase_offset, 0.0);
        assert_eq!(out.aggregate, 0.0);
    }

    #[test]
    fn unconfigured_reading_is_ignored() {
        let prior = states(&[("a", SourceType::Raw)]);
        let out = normalize_tick(&prior, &readings(&[("a", 5.0), ("ghost", 1e9)]));
        assert!(!out.states.contains_key("ghost"));
        assert!((out.aggregate - 5.0).abs() < EPS);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(-2.344), -2.34);
    }
}
