//! MQTT client for receiving position readings
//!
//! Devices publish JSON readings (`{"latitude":..,"longitude":..,"accuracy":..,
//! "timestamp":..}`) or an error report (`{"error":"permission_denied"}`) on the
//! position topic. Parsed results are forwarded into a position channel.

use crate::domain::error::PositionError;
use crate::domain::types::RawReading;
use crate::infra::config::Config;
use crate::io::position::PositionSender;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PositionMessage {
    Reading(RawReading),
    Error {
        error: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

/// Parse one payload into a reading or a position error
///
/// Returns `None` for payloads that are neither.
pub fn parse_position_message(json_str: &str) -> Option<Result<RawReading, PositionError>> {
    let message: PositionMessage = match serde_json::from_str(json_str) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "position_message_unparsable");
            return None;
        }
    };
    Some(match message {
        PositionMessage::Reading(reading) => Ok(reading),
        PositionMessage::Error { error, message, timeout_ms } => Err(match error.as_str() {
            "permission_denied" => PositionError::PermissionDenied,
            "timeout" => PositionError::Timeout(Duration::from_millis(timeout_ms.unwrap_or(0))),
            _ => PositionError::Unavailable(message.unwrap_or(error)),
        }),
    })
}

/// Start the MQTT client and forward readings to the position channel
///
/// Readings are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped readings are logged (rate-limited).
pub async fn start_mqtt_position_client(
    config: &Config,
    position_tx: PositionSender,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("safezone-{}", config.entity_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_position_topic(), QoS::AtMostOnce).await?;

    info!(
        topic = %config.mqtt_position_topic(),
        host = %config.mqtt_host(),
        port = %config.mqtt_port(),
        "mqtt_position_subscribed"
    );

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let json_str = match std::str::from_utf8(&publish.payload) {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(error = %e, "mqtt_payload_invalid_utf8");
                                continue;
                            }
                        };
                        let Some(parsed) = parse_position_message(json_str) else {
                            continue;
                        };
                        if let Err(e) = position_tx.try_send(parsed) {
                            match e {
                                TrySendError::Full(_) => {
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_reading_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("position_channel_closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
