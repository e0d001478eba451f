use std::sync::Arc;

use common_metrics::serve_health_and_metrics;
use profile_worker::app_context::AppContext;
use profile_worker::config::Config;
use profile_worker::consumer::batch::start_batch_consumers;
use profile_worker::consumer::immediate::start_immediate_consumers;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for shutdown signal");
        info!("Shutdown signal received");
        _ = tx.send(true);
    });
    rx
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_with_defaults().unwrap();
    let context = Arc::new(AppContext::from_config(&config).await.unwrap());
    let shutdown = spawn_shutdown_listener();
    let bind = format!("{}:{}", config.host, config.port);

    tokio::select! {
        served = serve_health_and_metrics(&bind, context.health_registry.clone()) => {
            served.expect("failed to serve health and metrics");
        }
        _ = async {
            tokio::join!(
                start_immediate_consumers(context.clone(), shutdown.clone()),
                start_batch_consumers(context.clone(), shutdown.clone()),
            );
        } => {}
    }
}
