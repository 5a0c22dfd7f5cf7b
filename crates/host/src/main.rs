//! Host entry point.

use std::sync::Arc;

use bridge::{BridgeConfig, BrokerBridge};
use event_bus::{BusConfig, LocalEventBus};
use host::config::{Config, LogFormat};
use host::{AppState, connect_or_degrade};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[cfg(feature = "kafka")]
async fn build_bridge(config: BridgeConfig, bus: &LocalEventBus, ensure_topics: bool) -> BrokerBridge {
    use bridge::{KafkaConsumer, KafkaProducer, KafkaTopicAdmin};

    let bridge = BrokerBridge::new(
        config.clone(),
        bus.clone(),
        Arc::new(KafkaProducer::new(config.clone())),
        Arc::new(KafkaConsumer::new(config.clone())),
    );
    if ensure_topics {
        let provisioned = match KafkaTopicAdmin::new(config) {
            Ok(admin) => host::provision_topics(&admin, &bridge).await,
            Err(e) => Err(e),
        };
        if let Err(e) = provisioned {
            tracing::warn!(error = %e, "topic provisioning failed");
        }
    }
    bridge
}

#[cfg(not(feature = "kafka"))]
async fn build_bridge(config: BridgeConfig, bus: &LocalEventBus, ensure_topics: bool) -> BrokerBridge {
    tracing::warn!("built without the `kafka` feature, bridging to an in-process broker only");
    let broker = bridge::InMemoryBroker::new();
    let bridge = BrokerBridge::new(
        config,
        bus.clone(),
        Arc::new(broker.clone()),
        Arc::new(broker.clone()),
    );
    if ensure_topics {
        if let Err(e) = host::provision_topics(&broker, &bridge).await {
            tracing::warn!(error = %e, "topic provisioning failed");
        }
    }
    bridge
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Create the process-wide bus
    let bridge_config = BridgeConfig::from_env();
    let bus = LocalEventBus::new(
        BusConfig::new(bridge_config.service_name.clone())
            .with_history_limit(config.event_history_limit),
    );

    // 4. Start the bridge; the host keeps serving local-only if the broker is down
    let bridge = if config.bridge_enabled {
        let bridge = build_bridge(bridge_config, &bus, config.ensure_topics).await;
        connect_or_degrade(&bridge).await;
        Some(bridge)
    } else {
        tracing::info!("broker bridge disabled");
        None
    };

    // 5. Build the application
    let state = Arc::new(AppState::new(bus, bridge.clone()));
    let app = host::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting host");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Flush and close broker connections
    if let Some(bridge) = bridge {
        if let Err(e) = bridge.disconnect().await {
            tracing::error!(error = %e, "bridge shutdown failed");
        }
    }

    tracing::info!("host shut down gracefully");
}
