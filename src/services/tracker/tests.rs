//! Tests for the ZoneMembershipTracker

use super::*;
use crate::domain::types::{SafetyTier, ZoneId};
use rustc_hash::FxHashMap;

/// Metres per degree of latitude on the mean-radius sphere
const M_PER_DEG_LAT: f64 = 111_195.08;

const GATEWAY: (f64, f64) = (18.9220, 72.8347);

fn zone(id: u32, name: &str, (lat, lon): (f64, f64), radius_m: f64, tier: SafetyTier) -> Zone {
    Zone {
        id: ZoneId(id),
        name: name.to_string(),
        center_lat: lat,
        center_lon: lon,
        radius_m,
        tier,
        description: String::new(),
    }
}

fn gateway_zone() -> Zone {
    zone(1, "Gateway of India", GATEWAY, 500.0, SafetyTier::Safe)
}

fn create_test_tracker(zones: Vec<Zone>) -> ZoneMembershipTracker {
    create_test_tracker_with_config(zones, Config::default())
}

fn create_test_tracker_with_config(zones: Vec<Zone>, config: Config) -> ZoneMembershipTracker {
    ZoneMembershipTracker::new(zones.into(), &config, Arc::new(Metrics::new()))
}

/// Sample `north_m` metres due north of the Gateway center
fn sample_north(north_m: f64, at_ms: u64) -> PositionSample {
    PositionSample::new(GATEWAY.0 + north_m / M_PER_DEG_LAT, GATEWAY.1, 10.0, at_ms)
}

fn kinds(events: &[TransitionEvent]) -> Vec<TransitionKind> {
    events.iter().map(|e| e.kind).collect()
}

#[test]
fn test_first_sample_inside_emits_enter() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    let outcome = tracker.process_sample(PositionSample::new(18.9220, 72.8347, 10.0, 1_000));

    assert_eq!(kinds(outcome.transitions()), vec![TransitionKind::Enter]);
    let event = &outcome.transitions()[0];
    assert_eq!(event.zone_id, ZoneId(1));
    assert_eq!(event.zone_name, "Gateway of India");
    assert_eq!(event.at_ms, 1_000);
    assert!(tracker.membership()[0].is_inside);
}

#[test]
fn test_initial_outside_emits_nothing() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    let outcome = tracker.process_sample(PositionSample::new(18.95, 72.85, 10.0, 1_000));
    assert!(outcome.is_accepted());
    assert!(outcome.transitions().is_empty());
    assert_eq!(tracker.next_deadline_ms(), None);
}

#[test]
fn test_gateway_scenario_enter_then_exit_after_debounce() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);

    let mut all = Vec::new();
    all.extend(tracker.process_sample(PositionSample::new(18.9220, 72.8347, 10.0, 0)).transitions().to_vec());
    all.extend(tracker.process_sample(PositionSample::new(18.95, 72.85, 10.0, 1_000)).transitions().to_vec());
    assert_eq!(kinds(&all), vec![TransitionKind::Enter]);

    // Exit is pending but not emitted before the 10 s window elapses
    assert_eq!(tracker.next_deadline_ms(), Some(11_000));
    assert!(tracker.expire_pending(10_999).is_empty());

    let exits = tracker.expire_pending(11_000);
    assert_eq!(kinds(&exits), vec![TransitionKind::Exit]);
    assert_eq!(exits[0].at_ms, 11_000);
    assert_eq!(exits[0].sample_latitude, 18.95);
    assert_eq!(exits[0].dwell_ms, Some(11_000));

    // Nothing else afterwards
    assert!(tracker.expire_pending(60_000).is_empty());
    assert!(tracker.process_sample(PositionSample::new(18.95, 72.85, 10.0, 20_000)).transitions().is_empty());
}

#[test]
fn test_boundary_jitter_within_debounce_emits_single_enter() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    let mut events = Vec::new();

    // 50 samples 100 ms apart, alternating 495 m / 505 m from the center
    for i in 0..50u64 {
        let d = if i % 2 == 0 { 495.0 } else { 505.0 };
        events.extend(tracker.process_sample(sample_north(d, i * 100)).transitions().to_vec());
    }

    assert_eq!(kinds(&events), vec![TransitionKind::Enter]);
    assert!(tracker.membership()[0].is_inside);
}

#[test]
fn test_low_accuracy_sample_is_displayed_but_not_evaluated() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    let outcome = tracker.process_sample(PositionSample::new(18.9220, 72.8347, 500.0, 1_000));

    assert_eq!(outcome, SampleOutcome::Skipped(SkipReason::LowAccuracy));
    assert!(!tracker.membership()[0].is_inside);
    assert_eq!(tracker.last_sample().map(|s| s.accuracy_m), Some(500.0));
}

#[test]
fn test_low_accuracy_does_not_stall_later_samples() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    tracker.process_sample(PositionSample::new(18.9220, 72.8347, 500.0, 1_000));
    let outcome = tracker.process_sample(PositionSample::new(18.9220, 72.8347, 15.0, 2_000));
    assert_eq!(kinds(outcome.transitions()), vec![TransitionKind::Enter]);
}

#[test]
fn test_out_of_order_sample_is_discarded() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    tracker.process_sample(PositionSample::new(18.95, 72.85, 10.0, 5_000));

    let outcome = tracker.process_sample(PositionSample::new(18.9220, 72.8347, 10.0, 4_000));
    assert_eq!(outcome, SampleOutcome::OutOfOrder);
    assert!(!tracker.membership()[0].is_inside);
    assert_eq!(tracker.history().count(), 1);

    // Equal timestamps are accepted
    let outcome = tracker.process_sample(PositionSample::new(18.9220, 72.8347, 10.0, 5_000));
    assert_eq!(kinds(outcome.transitions()), vec![TransitionKind::Enter]);
}

#[test]
fn test_invalid_coordinate_is_skipped() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    let outcome = tracker.process_sample(PositionSample::new(f64::NAN, 72.8347, 10.0, 1_000));
    assert_eq!(outcome, SampleOutcome::Skipped(SkipReason::InvalidCoordinate));

    let outcome = tracker.process_sample(PositionSample::new(91.0, 72.8347, 10.0, 2_000));
    assert_eq!(outcome, SampleOutcome::Skipped(SkipReason::InvalidCoordinate));
    assert!(!tracker.membership()[0].is_inside);
}

#[test]
fn test_nested_zones_are_independent() {
    let outer = zone(1, "Colaba", GATEWAY, 2_000.0, SafetyTier::Safe);
    let inner = zone(2, "Jetty", GATEWAY, 100.0, SafetyTier::Caution);
    let mut tracker = create_test_tracker_with_config(
        vec![outer, inner],
        Config::default().with_exit_debounce_ms(0),
    );

    let outcome = tracker.process_sample(sample_north(50.0, 0));
    let ids: Vec<_> = outcome.transitions().iter().map(|e| (e.zone_id, e.kind)).collect();
    assert_eq!(ids, vec![(ZoneId(1), TransitionKind::Enter), (ZoneId(2), TransitionKind::Enter)]);
    assert_eq!(tracker.inside_zones().count(), 2);

    // Leave the inner zone only
    let outcome = tracker.process_sample(sample_north(500.0, 1_000));
    let ids: Vec<_> = outcome.transitions().iter().map(|e| (e.zone_id, e.kind)).collect();
    assert_eq!(ids, vec![(ZoneId(2), TransitionKind::Exit)]);
    assert_eq!(tracker.inside_zones().map(|z| z.id).collect::<Vec<_>>(), vec![ZoneId(1)]);
}

#[test]
fn test_history_ring_is_bounded() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    for i in 0..120u64 {
        tracker.process_sample(sample_north(0.0, i));
    }
    assert_eq!(tracker.history().count(), 50);
    assert_eq!(tracker.history().next().map(|s| s.captured_at_ms), Some(70));
}

#[test]
fn test_reset_clears_membership() {
    let mut tracker = create_test_tracker(vec![gateway_zone()]);
    tracker.process_sample(sample_north(0.0, 10_000));
    tracker.reset();

    assert!(!tracker.membership()[0].is_inside);
    assert_eq!(tracker.history().count(), 0);
    // Ordering is forgotten as well
    let outcome = tracker.process_sample(sample_north(0.0, 1_000));
    assert_eq!(kinds(outcome.transitions()), vec![TransitionKind::Enter]);
}

#[test]
fn test_metrics_counted() {
    let metrics = Arc::new(Metrics::new());
    let mut tracker =
        ZoneMembershipTracker::new(vec![gateway_zone()].into(), &Config::default().with_exit_debounce_ms(0), metrics.clone());
    tracker.process_sample(sample_north(0.0, 1));
    tracker.process_sample(sample_north(900.0, 2));
    tracker.process_sample(sample_north(0.0, 0));

    assert_eq!(metrics.samples_total(), 2);
    assert_eq!(metrics.zone_enters(), 1);
    assert_eq!(metrics.zone_exits(), 1);
    assert_eq!(metrics.report().samples_out_of_order, 1);
}

/// Deterministic pseudo-random walk around the zone edge: whatever the sequence,
/// every zone's events must alternate Enter, Exit, Enter, ... starting with Enter.
#[test]
fn test_no_orphan_exits_for_arbitrary_sequences() {
    for seed in 1..=20u64 {
        let mut tracker = create_test_tracker_with_config(
            vec![
                gateway_zone(),
                zone(2, "Inner", GATEWAY, 200.0, SafetyTier::Restricted),
            ],
            Config::default().with_exit_debounce_ms(2_000),
        );
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            state >> 33
        };

        let mut per_zone: FxHashMap<ZoneId, Vec<TransitionKind>> = FxHashMap::default();
        let mut t = 0u64;
        for _ in 0..300 {
            t += next() % 1_500;
            let north = (next() % 1_000) as f64;
            let accuracy = if next() % 10 == 0 { 400.0 } else { 10.0 };
            let outcome = tracker.process_sample(PositionSample::new(
                GATEWAY.0 + north / M_PER_DEG_LAT,
                GATEWAY.1,
                accuracy,
                t,
            ));
            for e in outcome.transitions() {
                per_zone.entry(e.zone_id).or_default().push(e.kind);
            }
            if next() % 3 == 0 {
                for e in tracker.expire_pending(t + next() % 3_000) {
                    per_zone.entry(e.zone_id).or_default().push(e.kind);
                }
            }
        }

        for (zone_id, events) in per_zone {
            for (i, kind) in events.iter().enumerate() {
                let expected = if i % 2 == 0 { TransitionKind::Enter } else { TransitionKind::Exit };
                assert_eq!(*kind, expected, "seed {seed} zone {zone_id} event {i}");
            }
        }
    }
}
