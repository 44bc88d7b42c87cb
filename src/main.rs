//! Safezone gateway - geofence zone alerts for one tracked entity
//!
//! Follows a position stream, detects zone enter/exit with exit debounce and
//! delivers deduplicated safety notifications to the app, the alert tone and
//! web push.
//!
//! Module structure:
//! - `domain/` - Core types (Zone, PositionSample, Notification, events)
//! - `io/` - External interfaces (position sources, MQTT, store, push, Prometheus)
//! - `services/` - Business logic (Catalog, Tracker, Dedup, Delivery, Session)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use safezone_gateway::domain::events::UiEvent;
use safezone_gateway::domain::types::EntityId;
use safezone_gateway::infra::{Config, Metrics, SourceMode};
use safezone_gateway::io::{
    create_egress_channel, position_channel, HttpPushService, InMemoryStore, MqttPublisher, NoopPushService,
    PositionSource, PushService, PushSubscription, SimulatedPositionSource,
};
use safezone_gateway::services::delivery::{AudibleSink, LogAudioOutput, NotificationSink, PushSink, UiListSink};
use safezone_gateway::services::{
    create_push_worker, NotificationDeduplicator, NotificationDeliveryPipeline, SessionOptions, StaticCatalogSource,
    TrackingSession, ZoneCatalog, ZoneMembershipTracker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Safezone gateway - geofence zone alerts
#[derive(Parser, Debug)]
#[command(name = "safezone-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default: INFO, use RUST_LOG=debug for per-sample visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("safezone-gateway starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    let source_mode_str = match config.source_mode() {
        SourceMode::Mqtt => "mqtt",
        SourceMode::Simulated => "simulated",
    };
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        entity = %config.entity_id(),
        source = %source_mode_str,
        exit_debounce_ms = %config.exit_debounce_ms(),
        accuracy_ceiling_m = %config.accuracy_ceiling_m(),
        zones = %config.zones().len(),
        push_enabled = %config.push_enabled(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Zone catalog snapshot for this session
    let catalog = ZoneCatalog::load(&StaticCatalogSource::new(config.zones().to_vec())).await?;
    info!(zones = %catalog.len(), "zone_catalog_loaded");

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = safezone_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, config.site_id().to_string());
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        Some(egress_sender)
    } else {
        None
    };

    // Metrics reporter: one report per interval, logged and optionally published
    let reporter_metrics = metrics.clone();
    let reporter_egress = egress_sender.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let summary = reporter_metrics.report();
            summary.log();
            if let Some(egress) = &reporter_egress {
                egress.send_metrics(summary);
            }
        }
    });

    // UI event stream; a log subscriber stands in for the app surface
    let (ui_tx, mut ui_rx) = broadcast::channel::<UiEvent>(256);
    tokio::spawn(async move {
        loop {
            match ui_rx.recv().await {
                Ok(UiEvent::ZoneEnter(zone)) => info!(zone = %zone.name, tier = %zone.tier.as_str(), "ui_zone_enter"),
                Ok(UiEvent::ZoneExit(zone)) => info!(zone = %zone.name, tier = %zone.tier.as_str(), "ui_zone_exit"),
                Ok(UiEvent::NotificationDelivered(n)) => {
                    info!(title = %n.title, priority = %n.priority.as_str(), "ui_notification")
                }
                Ok(UiEvent::NotificationsChanged { unread }) => debug!(unread = %unread, "ui_notifications_changed"),
                Ok(UiEvent::LocationUpdate(sample)) => {
                    debug!(lat = %sample.latitude, lon = %sample.longitude, "ui_location_update")
                }
                Ok(UiEvent::Status(status)) => info!(status = %status.as_str(), "ui_status"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => debug!(skipped = %skipped, "ui_events_lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Delivery sinks
    let (_surface_tx, surface_rx) = watch::channel(config.surface());
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![
        Arc::new(UiListSink::new(ui_tx.clone())),
        Arc::new(AudibleSink::new(Arc::new(LogAudioOutput), config.muted(), metrics.clone())),
    ];
    if config.push_enabled() {
        let service: Arc<dyn PushService> = if config.push_url().is_empty() {
            Arc::new(NoopPushService)
        } else {
            Arc::new(HttpPushService::new(config.push_url(), Duration::from_millis(config.push_timeout_ms())))
        };
        let (job_tx, worker) = create_push_worker(
            service,
            PushSubscription(config.push_subscription().to_string()),
            Duration::from_millis(config.push_retry_delay_ms()),
            metrics.clone(),
            64,
        );
        tokio::spawn(worker.run());
        sinks.push(Arc::new(PushSink::new(job_tx, surface_rx)));
    }

    let store = Arc::new(InMemoryStore::new());
    let pipeline = Arc::new(NotificationDeliveryPipeline::new(
        EntityId::new(config.entity_id()),
        NotificationDeduplicator::new(config.dedup_window_ms(), config.dedup_max_entries()),
        sinks,
        store,
        ui_tx.clone(),
        metrics.clone(),
    ));
    tokio::spawn(pipeline.clone().run_channel_watch(shutdown_rx.clone()));

    // Position source
    let source: Box<dyn PositionSource> = match config.source_mode() {
        SourceMode::Mqtt => {
            let (position_tx, position_source) = position_channel(100);
            let mqtt_config = config.clone();
            let mqtt_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    safezone_gateway::io::mqtt::start_mqtt_position_client(&mqtt_config, position_tx, mqtt_shutdown)
                        .await
                {
                    tracing::error!(error = %e, "MQTT client error");
                }
            });
            Box::new(position_source)
        }
        SourceMode::Simulated => {
            Box::new(SimulatedPositionSource::mumbai(Duration::from_millis(config.sim_interval_ms())))
        }
    };

    let tracker = ZoneMembershipTracker::new(catalog.snapshot(), &config, metrics.clone());
    let session = TrackingSession::spawn(
        tracker,
        source,
        pipeline,
        SessionOptions::from_config(&config),
        ui_tx,
        egress_sender,
        metrics,
    );
    info!("tracking_session_running");

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    session.stop().await;
    let _ = shutdown_tx.send(true);

    // Give the egress publisher a moment to drain
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("safezone-gateway shutdown complete");
    Ok(())
}
