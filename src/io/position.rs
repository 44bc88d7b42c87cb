//! Position sources
//!
//! A `PositionSource` yields raw readings or errors. The session awaits
//! `next_reading` inside `select!`, so implementations must be cancel-safe:
//! dropping the future before it completes must not lose a reading.

use crate::domain::error::PositionError;
use crate::domain::types::RawReading;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};

#[async_trait]
pub trait PositionSource: Send {
    async fn next_reading(&mut self) -> Result<RawReading, PositionError>;
}

/// Sender half used by producers (MQTT client, tests)
pub type PositionSender = mpsc::Sender<Result<RawReading, PositionError>>;

/// Position source fed through an mpsc channel
///
/// `mpsc::Receiver::recv` is cancel-safe, so this source is too. A closed
/// channel reports `PositionError::SourceClosed`.
pub struct ChannelPositionSource {
    rx: mpsc::Receiver<Result<RawReading, PositionError>>,
}

impl ChannelPositionSource {
    pub fn new(rx: mpsc::Receiver<Result<RawReading, PositionError>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl PositionSource for ChannelPositionSource {
    async fn next_reading(&mut self) -> Result<RawReading, PositionError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(PositionError::SourceClosed),
        }
    }
}

/// Create a bounded position channel
pub fn position_channel(buffer_size: usize) -> (PositionSender, ChannelPositionSource) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (tx, ChannelPositionSource::new(rx))
}

/// Replays a fixed list of readings and errors at a steady pace
///
/// Once the script runs out the source either reports `SourceClosed` or stays
/// silent forever (the default), leaving the session waiting on timeouts.
pub struct ScriptedPositionSource {
    steps: VecDeque<Result<RawReading, PositionError>>,
    pace: Interval,
    close_when_done: bool,
}

impl ScriptedPositionSource {
    pub fn new(pace: Duration) -> Self {
        let mut pace = interval(pace);
        pace.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { steps: VecDeque::new(), pace, close_when_done: false }
    }

    pub fn reading(mut self, reading: RawReading) -> Self {
        self.steps.push_back(Ok(reading));
        self
    }

    pub fn error(mut self, error: PositionError) -> Self {
        self.steps.push_back(Err(error));
        self
    }

    pub fn close_when_done(mut self) -> Self {
        self.close_when_done = true;
        self
    }
}

#[async_trait]
impl PositionSource for ScriptedPositionSource {
    async fn next_reading(&mut self) -> Result<RawReading, PositionError> {
        if self.steps.is_empty() {
            if self.close_when_done {
                return Err(PositionError::SourceClosed);
            }
            std::future::pending::<()>().await;
        }
        // `tick` is cancel-safe; the step is only popped after it completes
        self.pace.tick().await;
        self.steps.pop_front().unwrap_or(Err(PositionError::SourceClosed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_source_closed() {
        let (tx, mut source) = position_channel(4);
        tx.send(Ok(RawReading::new(18.9, 72.8, 5.0, 1))).await.unwrap();
        drop(tx);

        assert_eq!(source.next_reading().await.unwrap().latitude, 18.9);
        assert_eq!(source.next_reading().await.unwrap_err(), PositionError::SourceClosed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_source_replays_in_order() {
        let mut source = ScriptedPositionSource::new(Duration::from_millis(100))
            .reading(RawReading::new(18.9, 72.8, 5.0, 1))
            .error(PositionError::Unavailable("gps cold start".into()))
            .close_when_done();

        assert!(source.next_reading().await.is_ok());
        assert_eq!(
            source.next_reading().await.unwrap_err(),
            PositionError::Unavailable("gps cold start".into())
        );
        assert_eq!(source.next_reading().await.unwrap_err(), PositionError::SourceClosed);
    }
}
