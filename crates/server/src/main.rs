//! annolab
//!
//! Storage and workflow core of the annolab labeling backend.

use std::sync::Arc;

use annolab_persistence::backends::SearchBackend;
use annolab_persistence::backends::memory::InMemoryBackend;
use annolab_persistence::{Stores, cancel_pair};
use annolab_server::{BackendKind, ServerConfig, init_logging};
use annolab_workflow::Services;
use annolab_workflow::collaborators::{InMemoryArchive, InMemoryBlobStore, InMemoryIdentity};
use annolab_workflow::objects::ObjectExpansionWorker;
use annolab_workflow::sequence::{HttpSequenceGenerator, InMemorySequence, SequenceGenerator};
use clap::Parser;
use tracing::{error, info, warn};

/// Creates the Elasticsearch backend from the server configuration.
#[cfg(feature = "elasticsearch")]
fn create_elasticsearch_backend(config: &ServerConfig) -> anyhow::Result<Arc<dyn SearchBackend>> {
    use annolab_persistence::backends::elasticsearch::ElasticsearchBackend;

    let es_config = config.elasticsearch_config()?;
    info!(
        nodes = ?es_config.nodes,
        shards = es_config.number_of_shards,
        replicas = es_config.number_of_replicas,
        "Initializing Elasticsearch backend"
    );
    Ok(Arc::new(ElasticsearchBackend::new(es_config)?))
}

/// Fallback when the elasticsearch feature is not enabled.
#[cfg(not(feature = "elasticsearch"))]
fn create_elasticsearch_backend(_config: &ServerConfig) -> anyhow::Result<Arc<dyn SearchBackend>> {
    anyhow::bail!(
        "The elasticsearch backend requires the 'elasticsearch' feature. \
         Build with: cargo build -p annolab-server --features elasticsearch"
    )
}

fn create_backend(config: &ServerConfig) -> anyhow::Result<Arc<dyn SearchBackend>> {
    match config.backend {
        BackendKind::Elasticsearch => create_elasticsearch_backend(config),
        BackendKind::Memory => {
            info!("Initializing in-memory backend");
            Ok(Arc::new(InMemoryBackend::new()))
        }
    }
}

fn create_sequence(config: &ServerConfig) -> anyhow::Result<Arc<dyn SequenceGenerator>> {
    match config.sequence_config() {
        Some(sequence_config) => {
            info!(
                uri = %sequence_config.base_uri,
                namespace = %sequence_config.namespace,
                "Using sequence service"
            );
            Ok(Arc::new(HttpSequenceGenerator::new(sequence_config)?))
        }
        None => {
            if config.backend == BackendKind::Elasticsearch {
                warn!("No sequence service configured, task codes restart with the process");
            }
            Ok(Arc::new(InMemorySequence::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        backend = %config.backend,
        bulk_batch_size = config.bulk_batch_size,
        queue_capacity = config.queue_capacity,
        version = annolab_workflow::VERSION,
        "Starting annolab"
    );

    let backend = create_backend(&config)?;
    backend
        .health_check()
        .await
        .map_err(|e| anyhow::anyhow!("Backend health check failed: {}", e))?;

    let prefixes = config.index_prefixes();
    backend.initialize(&prefixes.templates()).await?;
    info!("Index templates installed");

    let stores = Stores::new(backend, &prefixes).with_batch_size(config.bulk_batch_size);
    let services = Services::new(
        stores,
        create_sequence(&config)?,
        Arc::new(InMemoryIdentity::new()),
        Arc::new(InMemoryArchive::new()),
        Arc::new(InMemoryBlobStore::new()),
    );

    let (shutdown, signal) = cancel_pair();
    let (queue, worker) =
        ObjectExpansionWorker::start(services.expander.clone(), config.queue_capacity, signal);
    info!(capacity = config.queue_capacity, "Ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();
    drop(queue);

    match tokio::time::timeout(config.shutdown_grace, worker).await {
        Ok(Ok(summary)) => info!(
            processed = summary.processed,
            failed = summary.failed,
            "Object worker finished"
        ),
        Ok(Err(e)) => error!(error = %e, "Object worker panicked"),
        Err(_) => warn!(
            grace = %humantime::format_duration(config.shutdown_grace),
            "Object worker did not stop in time"
        ),
    }

    Ok(())
}
