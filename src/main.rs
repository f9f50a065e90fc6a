use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use open_data_etl::datastore::DatastoreClient;
use open_data_etl::extractor::Extractor;
use open_data_etl::loader::PgLoader;
use open_data_etl::monitor::{DisabledMonitor, Monitor, MonitorSink};
use open_data_etl::observer::TracingObserver;
use open_data_etl::{Catalog, EtlConfig, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "open_data_etl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting open data ETL v{}", env!("CARGO_PKG_VERSION"));

    let config = EtlConfig::from_env().context("Failed to load configuration")?;

    info!("Configuration loaded:");
    info!("  Database URL: {}", config.masked_database_url());
    info!("  Schema: {}", config.db_schema);
    info!("  Datastore: {}", config.datastore_url);
    info!("  Page size: {}", config.page_size);

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::from_path(path)
            .await
            .with_context(|| format!("Failed to read catalog from {}", path.display()))?,
        None => Catalog::builtin(),
    };
    info!("Catalog has {} resources", catalog.len());

    let client = DatastoreClient::new(
        &config.datastore_url,
        config.http_timeout,
        config.retry.clone(),
    )
    .context("Failed to build datastore client")?;
    let extractor = Extractor::new(Arc::new(client), config.page_size);

    let monitor = if config.monitoring {
        Some(Arc::new(
            Monitor::new(&config.database_url, &config.db_schema)
                .await
                .context("Failed to prepare monitoring table")?,
        ))
    } else {
        info!("Monitoring disabled");
        None
    };
    let sink: Arc<dyn MonitorSink> = match &monitor {
        Some(monitor) => monitor.clone(),
        None => Arc::new(DisabledMonitor),
    };

    let pipeline = Pipeline::new(
        extractor,
        Arc::new(PgLoader::new(config.database_url.clone())),
        sink,
        Arc::new(TracingObserver),
        config.db_schema.clone(),
    );

    let summary = pipeline.run_catalog(&catalog).await;
    info!(
        "ETL complete: {} loaded, {} no data, {} extraction failures, {} rejected, {} load failures",
        summary.loaded,
        summary.no_data,
        summary.extraction_failed,
        summary.rejected,
        summary.load_failed
    );

    if let Some(monitor) = &monitor {
        match monitor.recent(summary.attempted as i64).await {
            Ok(records) => {
                info!("Monitoring entries for this run:");
                for record in records.iter().rev() {
                    info!(
                        "  {} {} rows={} {}",
                        record.table_name, record.load_time, record.row_count, record.notes
                    );
                }
            }
            Err(e) => warn!("Could not read monitoring entries: {}", e),
        }
    }

    Ok(())
}
