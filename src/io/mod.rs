//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `position` - Position source trait and channel/scripted sources
//! - `simulator` - Simulated route walker for demos
//! - `mqtt` - MQTT client for receiving device position readings
//! - `store` - Notification store with live change stream
//! - `push` - Web push delivery
//! - `mqtt_egress` - MQTT publisher for egress events
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod position;
pub mod prometheus;
pub mod push;
pub mod simulator;
pub mod store;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
pub use position::{position_channel, ChannelPositionSource, PositionSender, PositionSource, ScriptedPositionSource};
pub use push::{HttpPushService, NoopPushService, PushPayload, PushService, PushSubscription};
pub use simulator::SimulatedPositionSource;
pub use store::{ConnectionState, InMemoryStore, NotificationStore, StoreEvent, StoreUpdate};
