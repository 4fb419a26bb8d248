//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use messaging::{BrokerConfig, InMemoryBroker, MessageBroker};
use saga::OrchestratorConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
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

#[cfg(feature = "amqp")]
async fn connect_broker(config: &Config, broker_config: &BrokerConfig) -> Arc<dyn MessageBroker> {
    match &config.amqp_url {
        Some(_) => {
            let broker = messaging::AmqpBroker::connect(broker_config)
                .await
                .expect("failed to connect to broker");
            tracing::info!(connection = %broker_config.connection_name, "connected to AMQP broker");
            Arc::new(broker)
        }
        None => {
            tracing::info!("AMQP_URL not set, using in-memory broker");
            Arc::new(InMemoryBroker::new())
        }
    }
}

#[cfg(not(feature = "amqp"))]
async fn connect_broker(config: &Config, _broker_config: &BrokerConfig) -> Arc<dyn MessageBroker> {
    if config.amqp_url.is_some() {
        tracing::warn!("AMQP_URL is set but the binary was built without the amqp feature");
    }
    tracing::info!("using in-memory broker");
    Arc::new(InMemoryBroker::new())
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Connect the broker and build application state
    let broker_config = BrokerConfig::from_env();
    let orchestrator_config = OrchestratorConfig::from_env();
    let broker = connect_broker(&config, &broker_config).await;

    let shutdown = CancellationToken::new();
    let state = api::create_state(broker, &broker_config, orchestrator_config, shutdown.clone())
        .expect("failed to build application state");

    // 4. Build the application
    let tasks = state.tasks.clone();
    let app = api::create_app(state, metrics_handle);

    // 5. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting saga coordinator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .expect("server error");

    // 6. Let in-flight saga runs reach their next step boundary
    tasks.close();
    tasks.wait().await;

    tracing::info!("server shut down gracefully");
}
