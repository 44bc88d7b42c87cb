//! Per-zone membership state machine with exit hysteresis
//!
//! Outside -> Inside happens on the first raw-inside sample. Inside -> Outside
//! needs the entity to stay raw-outside for the whole debounce window; a
//! raw-inside sample before the deadline cancels the pending exit.

use crate::domain::types::{Coordinate, TransitionKind, ZoneId};
use smallvec::SmallVec;

/// A membership flip produced by the state machine
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Flip {
    pub kind: TransitionKind,
    pub at_ms: u64,
    pub coord: Coordinate,
    pub dwell_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipState {
    pub zone_id: ZoneId,
    pub is_inside: bool,
    pub entered_at_ms: Option<u64>,
    pub last_seen_at_ms: Option<u64>,
    /// Capture time of the first raw-outside sample while held Inside
    pub outside_since_ms: Option<u64>,
    last_outside: Option<Coordinate>,
}

impl MembershipState {
    pub fn new(zone_id: ZoneId) -> Self {
        Self {
            zone_id,
            is_inside: false,
            entered_at_ms: None,
            last_seen_at_ms: None,
            outside_since_ms: None,
            last_outside: None,
        }
    }

    /// Deadline of the pending exit, if one is running
    #[inline]
    pub fn pending_deadline(&self, debounce_ms: u64) -> Option<u64> {
        if !self.is_inside {
            return None;
        }
        self.outside_since_ms.map(|since| since.saturating_add(debounce_ms))
    }

    /// Feed one evaluated sample
    pub(crate) fn observe(
        &mut self,
        raw_inside: bool,
        at_ms: u64,
        coord: Coordinate,
        debounce_ms: u64,
    ) -> SmallVec<[Flip; 2]> {
        let mut flips = SmallVec::new();

        if raw_inside {
            // The entity was outside long enough before coming back: the exit
            // happened at the deadline even though no timer fired.
            if let Some(deadline) = self.pending_deadline(debounce_ms) {
                if at_ms >= deadline {
                    flips.push(self.exit(deadline));
                }
            }
            self.last_seen_at_ms = Some(at_ms);
            if self.is_inside {
                self.outside_since_ms = None;
                self.last_outside = None;
            } else {
                self.is_inside = true;
                self.entered_at_ms = Some(at_ms);
                flips.push(Flip { kind: TransitionKind::Enter, at_ms, coord, dwell_ms: None });
            }
            return flips;
        }

        if !self.is_inside {
            return flips;
        }

        let since = *self.outside_since_ms.get_or_insert(at_ms);
        self.last_outside = Some(coord);
        if at_ms.saturating_sub(since) >= debounce_ms {
            flips.push(self.exit(since.saturating_add(debounce_ms)));
        }
        flips
    }

    /// Emit the pending exit if its deadline is at or before `now_ms`
    pub(crate) fn expire(&mut self, now_ms: u64, debounce_ms: u64) -> Option<Flip> {
        let deadline = self.pending_deadline(debounce_ms)?;
        if now_ms < deadline {
            return None;
        }
        Some(self.exit(deadline))
    }

    fn exit(&mut self, at_ms: u64) -> Flip {
        let coord = self.last_outside.unwrap_or(Coordinate::new(f64::NAN, f64::NAN));
        let dwell_ms = self.entered_at_ms.map(|entered| at_ms.saturating_sub(entered));
        self.is_inside = false;
        self.entered_at_ms = None;
        self.outside_since_ms = None;
        self.last_outside = None;
        Flip { kind: TransitionKind::Exit, at_ms, coord, dwell_ms }
    }
}
