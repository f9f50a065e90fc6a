use tracing::{error, info, warn};

use crate::error::{EtlError, PrimaryKeyViolation};

/// Something that happened while processing one catalog entry.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    ResourceStarted {
        resource_id: &'a str,
        table: &'a str,
    },
    ExtractionStarted {
        resource_id: &'a str,
        total: u64,
    },
    PageFetched {
        resource_id: &'a str,
        offset: u64,
        rows: usize,
    },
    PageFailed {
        resource_id: &'a str,
        offset: u64,
        error: &'a EtlError,
    },
    ExtractionFailed {
        resource_id: &'a str,
        error: &'a EtlError,
    },
    Extracted {
        resource_id: &'a str,
        rows: usize,
    },
    NoData {
        table: &'a str,
    },
    Rejected {
        table: &'a str,
        reason: PrimaryKeyViolation,
    },
    TableCreated {
        table: &'a str,
    },
    Staged {
        table: &'a str,
        staging: &'a str,
        rows: usize,
    },
    Upserted {
        table: &'a str,
        rows: u64,
    },
    StagingDropped {
        staging: &'a str,
    },
    Loaded {
        table: &'a str,
        rows: u64,
    },
    LoadFailed {
        table: &'a str,
        error: &'a EtlError,
    },
    MonitorFailed {
        table: &'a str,
        error: &'a EtlError,
    },
    RunFinished {
        attempted: usize,
        loaded: usize,
        failed: usize,
    },
}

/// Receives pipeline events. Components get one passed in rather than
/// reaching for global state.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        match event {
            PipelineEvent::ResourceStarted { resource_id, table } => {
                info!("Processing resource {} into table {}", resource_id, table)
            }
            PipelineEvent::ExtractionStarted { resource_id, total } => {
                info!("Fetching {} records for resource {}", total, resource_id)
            }
            PipelineEvent::PageFetched {
                resource_id,
                offset,
                rows,
            } => info!(resource_id, "Fetched {} at offset {}", rows, offset),
            PipelineEvent::PageFailed {
                resource_id,
                offset,
                error,
            } => error!(resource_id, "Failed at offset {}: {}", offset, error),
            PipelineEvent::ExtractionFailed { resource_id, error } => {
                error!("Extraction failed for {}: {}", resource_id, error)
            }
            PipelineEvent::Extracted { resource_id, rows } => {
                info!("Extracted {} total records for {}", rows, resource_id)
            }
            PipelineEvent::NoData { table } => warn!("No data loaded for {}", table),
            PipelineEvent::Rejected { table, reason } => {
                error!("Rejected {}: primary key {}", table, reason)
            }
            PipelineEvent::TableCreated { table } => info!("Created table {}", table),
            PipelineEvent::Staged {
                table,
                staging,
                rows,
            } => info!(
                "Loaded data into staging {} for {} with {} rows",
                staging, table, rows
            ),
            PipelineEvent::Upserted { table, rows } => {
                info!("Upserted {} rows into {}", rows, table)
            }
            PipelineEvent::StagingDropped { staging } => {
                info!("Dropped staging table {}", staging)
            }
            PipelineEvent::Loaded { table, rows } => {
                info!("Load of {} committed ({} rows)", table, rows)
            }
            PipelineEvent::LoadFailed { table, error } => {
                error!("Load failed for {}: {}", table, error)
            }
            PipelineEvent::MonitorFailed { table, error } => {
                warn!("Could not write monitoring entry for {}: {}", table, error)
            }
            PipelineEvent::RunFinished {
                attempted,
                loaded,
                failed,
            } => info!(
                "Run finished: {} attempted, {} loaded, {} not loaded",
                attempted, loaded, failed
            ),
        }
    }
}
