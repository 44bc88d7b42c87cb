//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::notification::Locale;
use crate::domain::types::Zone;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Where position readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Mqtt,
    Simulated,
}

/// Visibility of the consuming UI surface (drives push delivery)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceState {
    Foreground,
    Background,
    Offline,
}

impl SurfaceState {
    /// Push is only used when the user cannot see the in-app list
    pub fn wants_push(&self) -> bool {
        matches!(self, SurfaceState::Background | SurfaceState::Offline)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "safezone".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntityConfig {
    pub id: String,
    #[serde(default)]
    pub locale: Locale,
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self { id: "local-user".to_string(), locale: Locale::En }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Time a zone must be continuously outside before an exit is emitted
    #[serde(default = "default_exit_debounce_ms")]
    pub exit_debounce_ms: u64,
    /// Samples less precise than this are displayed but not used for membership
    #[serde(default = "default_accuracy_ceiling_m")]
    pub accuracy_ceiling_m: f64,
    /// Recent samples retained for display
    #[serde(default = "default_history_len")]
    pub history_len: usize,
    #[serde(default = "default_position_timeout_ms")]
    pub position_timeout_ms: u64,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

fn default_exit_debounce_ms() -> u64 {
    10_000
}

fn default_accuracy_ceiling_m() -> f64 {
    200.0
}

fn default_history_len() -> usize {
    50
}

fn default_position_timeout_ms() -> u64 {
    15_000
}

fn default_retry_initial_ms() -> u64 {
    1_000
}

fn default_retry_max_ms() -> u64 {
    30_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            exit_debounce_ms: default_exit_debounce_ms(),
            accuracy_ceiling_m: default_accuracy_ceiling_m(),
            history_len: default_history_len(),
            position_timeout_ms: default_position_timeout_ms(),
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_dedup_max_entries")]
    pub max_entries: usize,
    /// Expiry applied to zone transition notifications (0 = never expire)
    #[serde(default = "default_zone_notification_ttl_ms")]
    pub zone_notification_ttl_ms: u64,
}

fn default_dedup_window_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_dedup_max_entries() -> usize {
    1024
}

fn default_zone_notification_ttl_ms() -> u64 {
    6 * 60 * 60 * 1000
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: default_dedup_window_ms(),
            max_entries: default_dedup_max_entries(),
            zone_notification_ttl_ms: default_zone_notification_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Do-not-disturb: mute audible alerts below critical priority
    #[serde(default)]
    pub muted: bool,
    #[serde(default = "default_surface")]
    pub surface: SurfaceState,
    #[serde(default = "default_candidate_buffer")]
    pub candidate_buffer: usize,
}

fn default_surface() -> SurfaceState {
    SurfaceState::Foreground
}

fn default_candidate_buffer() -> usize {
    256
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { muted: false, surface: default_surface(), candidate_buffer: default_candidate_buffer() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    /// Destination subscription handle registered by the device
    #[serde(default)]
    pub subscription: String,
    #[serde(default = "default_push_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_push_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_push_timeout_ms() -> u64 {
    5_000
}

fn default_push_retry_delay_ms() -> u64 {
    500
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            subscription: String::new(),
            timeout_ms: default_push_timeout_ms(),
            retry_delay_ms: default_push_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topic carrying raw location readings for the entity
    pub position_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub mode: SourceMode,
    /// Interval between simulated readings
    #[serde(default = "default_sim_interval_ms")]
    pub sim_interval_ms: u64,
}

fn default_sim_interval_ms() -> u64 {
    1_000
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { mode: SourceMode::Simulated, sim_interval_ms: default_sim_interval_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Topic for zone enter/exit and location events (QoS 0)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    /// Topic for admitted notifications (QoS 1)
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
}

fn default_events_topic() -> String {
    "safezone/events".to_string()
}

fn default_notifications_topic() -> String {
    "safezone/notifications".to_string()
}

fn default_metrics_topic() -> String {
    "safezone/metrics".to_string()
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            events_topic: default_events_topic(),
            notifications_topic: default_notifications_topic(),
            metrics_topic: default_metrics_topic(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub entity: EntityConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub push: PushConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    entity_id: String,
    locale: Locale,
    exit_debounce_ms: u64,
    accuracy_ceiling_m: f64,
    history_len: usize,
    position_timeout_ms: u64,
    retry_initial_ms: u64,
    retry_max_ms: u64,
    dedup_window_ms: u64,
    dedup_max_entries: usize,
    zone_notification_ttl_ms: u64,
    muted: bool,
    surface: SurfaceState,
    candidate_buffer: usize,
    push_enabled: bool,
    push_url: String,
    push_subscription: String,
    push_timeout_ms: u64,
    push_retry_delay_ms: u64,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_position_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    source_mode: SourceMode,
    sim_interval_ms: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    mqtt_egress_enabled: bool,
    mqtt_egress_events_topic: String,
    mqtt_egress_notifications_topic: String,
    mqtt_egress_metrics_topic: String,
    zones: Vec<Zone>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let tracker = TrackerConfig::default();
        let dedup = DedupConfig::default();
        let delivery = DeliveryConfig::default();
        let push = PushConfig::default();
        let egress = MqttEgressConfig::default();
        Self {
            site_id: default_site_id(),
            entity_id: EntityConfig::default().id,
            locale: Locale::En,
            exit_debounce_ms: tracker.exit_debounce_ms,
            accuracy_ceiling_m: tracker.accuracy_ceiling_m,
            history_len: tracker.history_len,
            position_timeout_ms: tracker.position_timeout_ms,
            retry_initial_ms: tracker.retry_initial_ms,
            retry_max_ms: tracker.retry_max_ms,
            dedup_window_ms: dedup.window_ms,
            dedup_max_entries: dedup.max_entries,
            zone_notification_ttl_ms: dedup.zone_notification_ttl_ms,
            muted: delivery.muted,
            surface: delivery.surface,
            candidate_buffer: delivery.candidate_buffer,
            push_enabled: push.enabled,
            push_url: push.url,
            push_subscription: push.subscription,
            push_timeout_ms: push.timeout_ms,
            push_retry_delay_ms: push.retry_delay_ms,
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_position_topic: "safezone/position".to_string(),
            mqtt_username: None,
            mqtt_password: None,
            source_mode: SourceMode::Simulated,
            sim_interval_ms: default_sim_interval_ms(),
            metrics_interval_secs: 10,
            prometheus_port: 0,
            mqtt_egress_enabled: egress.enabled,
            mqtt_egress_events_topic: egress.events_topic,
            mqtt_egress_notifications_topic: egress.notifications_topic,
            mqtt_egress_metrics_topic: egress.metrics_topic,
            zones: Vec::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig {
            site,
            entity,
            tracker,
            dedup,
            delivery,
            push,
            mqtt,
            source,
            metrics,
            mqtt_egress,
            zones,
        } = toml_config;

        Self {
            site_id: site.id,
            entity_id: entity.id,
            locale: entity.locale,
            exit_debounce_ms: tracker.exit_debounce_ms,
            accuracy_ceiling_m: tracker.accuracy_ceiling_m,
            history_len: tracker.history_len,
            position_timeout_ms: tracker.position_timeout_ms,
            retry_initial_ms: tracker.retry_initial_ms,
            retry_max_ms: tracker.retry_max_ms,
            dedup_window_ms: dedup.window_ms,
            dedup_max_entries: dedup.max_entries,
            zone_notification_ttl_ms: dedup.zone_notification_ttl_ms,
            muted: delivery.muted,
            surface: delivery.surface,
            candidate_buffer: delivery.candidate_buffer,
            push_enabled: push.enabled,
            push_url: push.url,
            push_subscription: push.subscription,
            push_timeout_ms: push.timeout_ms,
            push_retry_delay_ms: push.retry_delay_ms,
            mqtt_host: mqtt.host,
            mqtt_port: mqtt.port,
            mqtt_position_topic: mqtt.position_topic,
            mqtt_username: mqtt.username,
            mqtt_password: mqtt.password,
            source_mode: source.mode,
            sim_interval_ms: source.sim_interval_ms,
            metrics_interval_secs: metrics.interval_secs,
            prometheus_port: metrics.prometheus_port,
            mqtt_egress_enabled: mqtt_egress.enabled,
            mqtt_egress_events_topic: mqtt_egress.events_topic,
            mqtt_egress_notifications_topic: mqtt_egress.notifications_topic,
            mqtt_egress_metrics_topic: mqtt_egress.metrics_topic,
            zones,
            config_file,
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        let config_path = Self::resolve_config_path(args);
        Self::load_from_path(&config_path)
    }

    /// Load from an explicit path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn exit_debounce_ms(&self) -> u64 {
        self.exit_debounce_ms
    }

    pub fn accuracy_ceiling_m(&self) -> f64 {
        self.accuracy_ceiling_m
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn position_timeout_ms(&self) -> u64 {
        self.position_timeout_ms
    }

    pub fn retry_initial_ms(&self) -> u64 {
        self.retry_initial_ms
    }

    pub fn retry_max_ms(&self) -> u64 {
        self.retry_max_ms
    }

    pub fn dedup_window_ms(&self) -> u64 {
        self.dedup_window_ms
    }

    pub fn dedup_max_entries(&self) -> usize {
        self.dedup_max_entries
    }

    /// Expiry for zone transition notifications, `None` when disabled
    pub fn zone_notification_ttl_ms(&self) -> Option<u64> {
        (self.zone_notification_ttl_ms > 0).then_some(self.zone_notification_ttl_ms)
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn surface(&self) -> SurfaceState {
        self.surface
    }

    pub fn candidate_buffer(&self) -> usize {
        self.candidate_buffer
    }

    pub fn push_enabled(&self) -> bool {
        self.push_enabled
    }

    pub fn push_url(&self) -> &str {
        &self.push_url
    }

    pub fn push_subscription(&self) -> &str {
        &self.push_subscription
    }

    pub fn push_timeout_ms(&self) -> u64 {
        self.push_timeout_ms
    }

    pub fn push_retry_delay_ms(&self) -> u64 {
        self.push_retry_delay_ms
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_position_topic(&self) -> &str {
        &self.mqtt_position_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn source_mode(&self) -> SourceMode {
        self.source_mode
    }

    pub fn sim_interval_ms(&self) -> u64 {
        self.sim_interval_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_events_topic(&self) -> &str {
        &self.mqtt_egress_events_topic
    }

    pub fn mqtt_egress_notifications_topic(&self) -> &str {
        &self.mqtt_egress_notifications_topic
    }

    pub fn mqtt_egress_metrics_topic(&self) -> &str {
        &self.mqtt_egress_metrics_topic
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the exit debounce window
    pub fn with_exit_debounce_ms(mut self, ms: u64) -> Self {
        self.exit_debounce_ms = ms;
        self
    }

    /// Builder method for tests to set the zone catalog
    pub fn with_zones(mut self, zones: Vec<Zone>) -> Self {
        self.zones = zones;
        self
    }

    /// Builder method for tests to enable do-not-disturb
    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// Builder method for tests to shorten sampling timeouts and retries
    pub fn with_position_timing(mut self, timeout_ms: u64, retry_initial_ms: u64, retry_max_ms: u64) -> Self {
        self.position_timeout_ms = timeout_ms;
        self.retry_initial_ms = retry_initial_ms;
        self.retry_max_ms = retry_max_ms;
        self
    }
}
