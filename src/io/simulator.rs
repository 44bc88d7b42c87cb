//! Simulated position source for demos
//!
//! Walks a closed route of waypoints at constant speed and emits one reading
//! per tick. Accuracy wobbles deterministically and every 25th fix is coarse so
//! the accuracy gate gets exercised.

use crate::domain::error::PositionError;
use crate::domain::geo;
use crate::domain::types::{epoch_ms, Coordinate, RawReading};
use crate::io::position::PositionSource;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

/// Colaba -> Gateway of India -> Marine Drive -> Chhatrapati Shivaji Terminus
pub const MUMBAI_ROUTE: [Coordinate; 5] = [
    Coordinate::new(18.9067, 72.8147),
    Coordinate::new(18.9220, 72.8347),
    Coordinate::new(18.9440, 72.8230),
    Coordinate::new(18.9398, 72.8355),
    Coordinate::new(18.9067, 72.8147),
];

const COARSE_EVERY: u64 = 25;

pub struct SimulatedPositionSource {
    route: Vec<Coordinate>,
    speed_mps: f64,
    tick: Interval,
    step: Duration,
    /// Position along the route
    leg: usize,
    travelled_on_leg_m: f64,
    fixes: u64,
}

impl SimulatedPositionSource {
    pub fn new(route: Vec<Coordinate>, speed_mps: f64, step: Duration) -> Self {
        let mut tick = interval(step);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { route, speed_mps, tick, step, leg: 0, travelled_on_leg_m: 0.0, fixes: 0 }
    }

    /// Walking pace along the default Mumbai route
    pub fn mumbai(step: Duration) -> Self {
        Self::new(MUMBAI_ROUTE.to_vec(), 12.0, step)
    }

    /// Current point, then advance by one step
    fn advance(&mut self) -> Coordinate {
        if self.route.len() < 2 {
            return self.route.first().copied().unwrap_or(Coordinate::new(0.0, 0.0));
        }
        let from = self.route[self.leg];
        let to = self.route[(self.leg + 1) % self.route.len()];
        let leg_len = geo::distance_meters(from, to).unwrap_or(0.0);

        let t = if leg_len > 0.0 { (self.travelled_on_leg_m / leg_len).min(1.0) } else { 1.0 };
        let here = Coordinate::new(from.lat + (to.lat - from.lat) * t, from.lon + (to.lon - from.lon) * t);

        self.travelled_on_leg_m += self.speed_mps * self.step.as_secs_f64();
        if self.travelled_on_leg_m >= leg_len {
            self.travelled_on_leg_m -= leg_len;
            self.leg = (self.leg + 1) % (self.route.len() - 1);
        }
        here
    }

    fn heading_deg(&self) -> Option<f64> {
        let from = *self.route.get(self.leg)?;
        let to = *self.route.get(self.leg + 1)?;
        let deg = (to.lon - from.lon).atan2(to.lat - from.lat).to_degrees();
        Some((deg + 360.0) % 360.0)
    }
}

#[async_trait]
impl PositionSource for SimulatedPositionSource {
    async fn next_reading(&mut self) -> Result<RawReading, PositionError> {
        self.tick.tick().await;
        self.fixes += 1;

        let heading = self.heading_deg();
        let here = self.advance();
        let accuracy = if self.fixes % COARSE_EVERY == 0 {
            350.0
        } else {
            12.0 + 6.0 * (self.fixes as f64 * 0.7).sin()
        };

        debug!(lat = %here.lat, lon = %here.lon, accuracy = %accuracy, "simulated_fix");
        let mut reading = RawReading::new(here.lat, here.lon, accuracy, epoch_ms());
        reading.heading = heading;
        reading.speed = Some(self.speed_mps);
        Ok(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_walks_the_route() {
        let mut sim = SimulatedPositionSource::new(
            vec![Coordinate::new(18.9220, 72.8347), Coordinate::new(18.9320, 72.8347)],
            100.0,
            Duration::from_secs(1),
        );
        let first = sim.next_reading().await.unwrap();
        let second = sim.next_reading().await.unwrap();

        assert_eq!(first.latitude, 18.9220);
        let moved = geo::distance_meters(
            Coordinate::new(first.latitude, first.longitude),
            Coordinate::new(second.latitude, second.longitude),
        )
        .unwrap();
        assert!((moved - 100.0).abs() < 1.0, "moved {moved}");
        assert_eq!(second.speed, Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_25th_fix_is_coarse() {
        let mut sim = SimulatedPositionSource::mumbai(Duration::from_millis(10));
        let mut coarse = 0;
        for _ in 0..50 {
            if sim.next_reading().await.unwrap().accuracy > 200.0 {
                coarse += 1;
            }
        }
        assert_eq!(coarse, 2);
    }
}
