use anyhow::{Context, Result};
use insat_cog_trigger::aws::load_sdk_config;
use insat_cog_trigger::{handle_event, Config, DynamoDbTable, Insat3dProcessor, ProcessRunner, S3Uploader};
use lambda_runtime::{service_fn, LambdaEvent};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        destination_bucket = %config.destination.bucket,
        max_workers = config.processing.max_workers,
        "Starting INSAT-3D COG trigger"
    );

    let metrics = init_metrics()?;

    // Clients are built once per cold start and shared across invocations
    let sdk_config = load_sdk_config(&config).await;

    let uploader = Arc::new(S3Uploader::new(&sdk_config, &config));
    let table = Arc::new(
        DynamoDbTable::new(&sdk_config, &config.aws).context("Failed to initialize metadata table")?,
    );
    let runner = Arc::new(ProcessRunner::new(config.tool_environment()));

    let processor = Arc::new(Insat3dProcessor::new(config, runner, uploader, table));

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let processor = processor.clone();
        let metrics = metrics.clone();
        async move {
            let response = handle_event(&processor, &event.payload).await;
            debug!(metrics = %metrics.render(), "Invocation metrics");
            Ok::<_, lambda_runtime::Error>(response)
        }
    }))
    .await
    .map_err(|e| anyhow::anyhow!(e))
    .context("Function runtime exited with an error")?;

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Install the Prometheus recorder.
///
/// The function exposes no scrape endpoint; snapshots are rendered into the
/// log after every invocation.
fn init_metrics() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    info!("Prometheus metrics recorder installed");

    Ok(handle)
}
