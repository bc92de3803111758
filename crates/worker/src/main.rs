use hare_common::config::AppConfig;
use hare_common::db;
use hare_mq::{AmqpConnection, ConsumerOptions, JsonCodec, JsonConsumer};
use hare_notifier::Notifier;
use hare_worker::tail::TailProcessor;
use hare_worker::{ConsumerProcess, NoTransaction, RunOptions, UnitOfWork};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hare_worker=info,hare_mq=info,hare_notifier=info".into()),
        )
        .json()
        .init();

    tracing::info!("Hare worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let queue = config
        .worker_queue
        .clone()
        .ok_or_else(|| anyhow::anyhow!("HARE_QUEUE must be set"))?;

    // Connect to the broker
    let connection = AmqpConnection::from_config(&config).await?;
    if !connection.is_enabled() {
        tracing::warn!("ENABLE_MQ is off, the worker will not receive any messages");
    }

    // Declare and bind the queue when an exchange is configured
    let options = ConsumerOptions {
        exchange: config.worker_exchange.clone(),
        routing_key: config.worker_routing_key.clone(),
        force_no_declare: config.worker_exchange.is_none(),
        ..ConsumerOptions::default()
    };
    let consumer = JsonConsumer::new(&queue, &connection, options, JsonCodec::new()).await?;
    let notifier = Notifier::from_config(&config);
    let run_options = RunOptions {
        fault_tolerant: config.worker_fault_tolerant,
        prefetch: config.worker_prefetch,
        ..RunOptions::default()
    };

    // Process each message in a transaction when a database is configured
    let processor = TailProcessor::new(JsonCodec::new());
    let result = match db::connect_if_configured(&config).await? {
        Some(pool) => {
            let process = ConsumerProcess::new(consumer, processor, pool, notifier);
            run_until_shutdown(process, run_options).await
        }
        None => {
            let process = ConsumerProcess::new(consumer, processor, NoTransaction, notifier);
            run_until_shutdown(process, run_options).await
        }
    };

    // Close channels, and the connection if nothing else holds it
    if let Err(e) = connection.close().await {
        tracing::warn!(error = %e, "Failed to close broker connection");
    }

    tracing::info!("Hare worker stopped.");
    result
}

/// Run the process until it ends on its own or Ctrl+C is received.
async fn run_until_shutdown<W: UnitOfWork>(
    mut process: ConsumerProcess<TailProcessor<JsonCodec>, W, Notifier>,
    options: RunOptions,
) -> anyhow::Result<()> {
    tracing::info!(queue = process.consumer().queue(), "Consuming");

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = process.run(options) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Consumer process exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    Ok(())
}
