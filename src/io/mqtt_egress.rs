//! MQTT publisher for egress events
//!
//! Publishes session activity to MQTT topics for downstream consumers:
//! - safezone/events - Zone transitions, positions and status changes (QoS 0)
//! - safezone/notifications - Admitted notifications (QoS 1)
//! - safezone/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    events_topic: String,
    notifications_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("safezone-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            events_topic: config.mqtt_egress_events_topic().to_string(),
            notifications_topic: config.mqtt_egress_notifications_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            events = %self.events_topic,
            notifications = %self.notifications_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => return,
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Notification(payload) => {
                // Notifications must reach the dashboard at least once
                self.publish_json(&self.notifications_topic, QoS::AtLeastOnce, &payload, "notification").await;
            }
            EgressMessage::ZoneEvent(payload) => {
                self.publish_json(&self.events_topic, QoS::AtMostOnce, &payload, "zone_event").await;
            }
            EgressMessage::Position(payload) => {
                self.publish_json(&self.events_topic, QoS::AtMostOnce, &payload, "position").await;
            }
            EgressMessage::Status(payload) => {
                self.publish_json(&self.events_topic, QoS::AtMostOnce, &payload, "status").await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, QoS::AtMostOnce, &payload, "metrics").await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, qos: QoS, payload: &T, kind: &'static str) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, kind = %kind, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, qos, false, json.into_bytes()).await {
            if qos == QoS::AtLeastOnce {
                error!(error = %e, kind = %kind, "mqtt_egress_publish_failed");
            } else {
                debug!(error = %e, kind = %kind, "mqtt_egress_publish_failed");
            }
        }
    }
}
