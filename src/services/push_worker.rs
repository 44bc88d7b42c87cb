//! Push worker - sends push notifications off the admission path
//!
//! The push sink enqueues jobs via an mpsc channel and returns immediately; this
//! worker performs the network call. A failed send is retried once after
//! `retry_delay`, then logged as `push_delivery_failed` and dropped.

use crate::infra::metrics::Metrics;
use crate::io::push::{PushPayload, PushService, PushSubscription};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// A push to be sent by the worker
#[derive(Debug)]
pub struct PushJob {
    pub notification_id: String,
    pub payload: PushPayload,
    /// When the job was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

pub struct PushWorker {
    service: Arc<dyn PushService>,
    subscription: PushSubscription,
    job_rx: mpsc::Receiver<PushJob>,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl PushWorker {
    pub fn new(
        service: Arc<dyn PushService>,
        subscription: PushSubscription,
        job_rx: mpsc::Receiver<PushJob>,
        retry_delay: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { service, subscription, job_rx, retry_delay, metrics }
    }

    /// Run the worker, processing jobs until every sender is dropped
    pub async fn run(mut self) {
        info!("push_worker_started");

        while let Some(job) = self.job_rx.recv().await {
            let queue_delay_us = job.enqueued_at.elapsed().as_micros() as u64;
            self.send_with_retry(&job).await;
            if queue_delay_us > 1_000_000 {
                warn!(id = %job.notification_id, queue_delay_us = %queue_delay_us, "push_queue_delay_high");
            }
        }

        info!("push_worker_stopped");
    }

    async fn send_with_retry(&self, job: &PushJob) {
        let first = match self.service.send(&job.payload, &self.subscription).await {
            Ok(()) => {
                self.metrics.record_push_sent();
                return;
            }
            Err(e) => e,
        };
        warn!(id = %job.notification_id, error = %first, "push_retry");
        self.metrics.record_push_retry();
        tokio::time::sleep(self.retry_delay).await;

        match self.service.send(&job.payload, &self.subscription).await {
            Ok(()) => self.metrics.record_push_sent(),
            Err(e) => {
                self.metrics.record_push_failed();
                warn!(id = %job.notification_id, tag = %job.payload.tag, error = %e, "push_delivery_failed");
            }
        }
    }
}

/// Create a push job channel and worker
///
/// Returns the sender (for the push sink) and the worker (to be spawned)
pub fn create_push_worker(
    service: Arc<dyn PushService>,
    subscription: PushSubscription,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (mpsc::Sender<PushJob>, PushWorker) {
    let (job_tx, job_rx) = mpsc::channel(buffer_size);
    let worker = PushWorker::new(service, subscription, job_rx, retry_delay, metrics);
    (job_tx, worker)
}
