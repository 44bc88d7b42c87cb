//! Zone membership tracking
//!
//! The tracker turns a stream of position samples into enter/exit transitions:
//! - Ordering (stale samples are discarded)
//! - Display history (bounded ring of recent samples)
//! - Accuracy gating (coarse fixes are shown but never flip membership)
//! - Per-zone hysteresis on exit (see `membership`)
//!
//! It is owned by exactly one session task, so no locking happens here.

mod membership;
#[cfg(test)]
mod tests;

pub use membership::MembershipState;

use crate::domain::geo;
use crate::domain::types::{PositionSample, TransitionEvent, TransitionKind, Zone, ZoneId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use membership::Flip;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why a sample was kept for display but not evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LowAccuracy,
    InvalidCoordinate,
}

/// Result of feeding one sample to the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// Older than the last accepted sample; dropped entirely
    OutOfOrder,
    /// Recorded in history, membership untouched
    Skipped(SkipReason),
    /// Membership evaluated; transitions in emission order
    Evaluated(SmallVec<[TransitionEvent; 2]>),
}

impl SampleOutcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SampleOutcome::OutOfOrder)
    }

    pub fn transitions(&self) -> &[TransitionEvent] {
        match self {
            SampleOutcome::Evaluated(events) => events,
            _ => &[],
        }
    }
}

/// Membership tracker for one entity over one catalog snapshot
pub struct ZoneMembershipTracker {
    zones: Arc<[Zone]>,
    /// Parallel to `zones`
    states: Vec<MembershipState>,
    history: VecDeque<PositionSample>,
    history_len: usize,
    last_accepted_ms: Option<u64>,
    exit_debounce_ms: u64,
    accuracy_ceiling_m: f64,
    metrics: Arc<Metrics>,
}

impl ZoneMembershipTracker {
    pub fn new(zones: Arc<[Zone]>, config: &Config, metrics: Arc<Metrics>) -> Self {
        let states = zones.iter().map(|z| MembershipState::new(z.id)).collect();
        Self {
            zones,
            states,
            history: VecDeque::with_capacity(config.history_len()),
            history_len: config.history_len().max(1),
            last_accepted_ms: None,
            exit_debounce_ms: config.exit_debounce_ms(),
            accuracy_ceiling_m: config.accuracy_ceiling_m(),
            metrics,
        }
    }

    /// Feed one sample and return what it did to membership
    pub fn process_sample(&mut self, sample: PositionSample) -> SampleOutcome {
        let process_start = Instant::now();

        if let Some(last) = self.last_accepted_ms {
            if sample.captured_at_ms < last {
                self.metrics.record_sample_out_of_order();
                debug!(
                    captured_at_ms = %sample.captured_at_ms,
                    last_accepted_ms = %last,
                    "sample_out_of_order"
                );
                return SampleOutcome::OutOfOrder;
            }
        }
        self.last_accepted_ms = Some(sample.captured_at_ms);
        self.push_history(sample.clone());

        let outcome = if let Err(e) = geo::validate(sample.coordinate()) {
            self.metrics.record_sample_invalid();
            warn!(error = %e, "sample_invalid_coordinate");
            SampleOutcome::Skipped(SkipReason::InvalidCoordinate)
        } else if sample.accuracy_m.is_nan() || sample.accuracy_m > self.accuracy_ceiling_m {
            self.metrics.record_sample_low_accuracy();
            debug!(
                accuracy_m = %sample.accuracy_m,
                ceiling_m = %self.accuracy_ceiling_m,
                "sample_low_accuracy"
            );
            SampleOutcome::Skipped(SkipReason::LowAccuracy)
        } else {
            SampleOutcome::Evaluated(self.evaluate(&sample))
        };

        self.metrics.set_zones_inside(self.inside_count());
        self.metrics.record_sample_processed(process_start.elapsed().as_micros() as u64);
        outcome
    }

    fn evaluate(&mut self, sample: &PositionSample) -> SmallVec<[TransitionEvent; 2]> {
        let point = sample.coordinate();
        let mut events = SmallVec::new();

        for (zone, state) in self.zones.iter().zip(self.states.iter_mut()) {
            let raw_inside = match geo::is_inside_circle(point, zone.center(), zone.radius_m) {
                Ok(inside) => inside,
                Err(e) => {
                    warn!(zone_id = %zone.id, error = %e, "zone_geometry_invalid");
                    continue;
                }
            };
            for flip in state.observe(raw_inside, sample.captured_at_ms, point, self.exit_debounce_ms) {
                events.push(transition_event(zone, flip, &self.metrics));
            }
        }
        events
    }

    /// Earliest pending exit deadline (sample clock, epoch ms)
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.states.iter().filter_map(|s| s.pending_deadline(self.exit_debounce_ms)).min()
    }

    /// Emit exits whose debounce deadline has passed without a new sample
    pub fn expire_pending(&mut self, now_ms: u64) -> Vec<TransitionEvent> {
        let mut events = Vec::new();
        for (zone, state) in self.zones.iter().zip(self.states.iter_mut()) {
            if let Some(flip) = state.expire(now_ms, self.exit_debounce_ms) {
                events.push(transition_event(zone, flip, &self.metrics));
            }
        }
        if !events.is_empty() {
            self.metrics.set_zones_inside(self.inside_count());
        }
        events
    }

    /// Recent samples, oldest first
    pub fn history(&self) -> impl Iterator<Item = &PositionSample> {
        self.history.iter()
    }

    pub fn last_sample(&self) -> Option<&PositionSample> {
        self.history.back()
    }

    pub fn membership(&self) -> &[MembershipState] {
        &self.states
    }

    /// Zones currently held Inside
    pub fn inside_zones(&self) -> impl Iterator<Item = &Zone> {
        self.zones.iter().zip(self.states.iter()).filter(|(_, s)| s.is_inside).map(|(z, _)| z)
    }

    pub fn zone(&self, zone_id: ZoneId) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == zone_id)
    }

    /// Forget membership, ordering and history (session stop)
    pub fn reset(&mut self) {
        for state in &mut self.states {
            *state = MembershipState::new(state.zone_id);
        }
        self.history.clear();
        self.last_accepted_ms = None;
        self.metrics.set_zones_inside(0);
    }

    fn push_history(&mut self, sample: PositionSample) {
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn inside_count(&self) -> usize {
        self.states.iter().filter(|s| s.is_inside).count()
    }
}

fn transition_event(zone: &Zone, flip: Flip, metrics: &Metrics) -> TransitionEvent {
    match flip.kind {
        TransitionKind::Enter => {
            metrics.record_zone_enter();
            info!(zone_id = %zone.id, zone = %zone.name, tier = %zone.tier.as_str(), "zone_enter");
        }
        TransitionKind::Exit => {
            metrics.record_zone_exit();
            info!(
                zone_id = %zone.id,
                zone = %zone.name,
                tier = %zone.tier.as_str(),
                dwell_ms = ?flip.dwell_ms,
                "zone_exit"
            );
        }
    }
    TransitionEvent {
        zone_id: zone.id,
        zone_name: zone.name.clone(),
        tier: zone.tier,
        kind: flip.kind,
        at_ms: flip.at_ms,
        sample_latitude: flip.coord.lat,
        sample_longitude: flip.coord.lon,
        dwell_ms: flip.dwell_ms,
    }
}
