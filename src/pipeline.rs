use chrono::Utc;
use std::sync::Arc;

use crate::catalog::{Catalog, CatalogEntry};
use crate::error::{EtlError, PrimaryKeyViolation};
use crate::extractor::{Extraction, Extractor};
use crate::loader::TableLoader;
use crate::monitor::{MonitorSink, MonitoringEntry};
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::sanitizer;
use crate::table_schema::TableSchema;

/// What happened to one catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded { rows: u64, partial: Option<String> },
    NoData,
    ExtractionFailed { reason: String },
    Rejected { reason: PrimaryKeyViolation, rows: u64 },
    LoadFailed { rows: u64, error: String },
}

impl LoadOutcome {
    /// Text written to `etl_monitoring.notes`.
    pub fn note(&self) -> String {
        match self {
            LoadOutcome::Loaded { partial: None, .. } => "Success".to_string(),
            LoadOutcome::Loaded {
                partial: Some(reason),
                ..
            } => format!("Success (partial: {})", reason),
            LoadOutcome::NoData => "No data".to_string(),
            LoadOutcome::ExtractionFailed { reason } => format!("Extraction failed: {}", reason),
            LoadOutcome::Rejected {
                reason: PrimaryKeyViolation::NullId,
                ..
            } => "NaN in _id".to_string(),
            LoadOutcome::Rejected {
                reason: PrimaryKeyViolation::DuplicateId,
                ..
            } => "Duplicate _id".to_string(),
            LoadOutcome::LoadFailed { error, .. } => format!("Failed: {}", error),
        }
    }

    pub fn row_count(&self) -> u64 {
        match self {
            LoadOutcome::Loaded { rows, .. }
            | LoadOutcome::Rejected { rows, .. }
            | LoadOutcome::LoadFailed { rows, .. } => *rows,
            LoadOutcome::NoData | LoadOutcome::ExtractionFailed { .. } => 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub attempted: usize,
    pub loaded: usize,
    pub no_data: usize,
    pub extraction_failed: usize,
    pub rejected: usize,
    pub load_failed: usize,
}

impl RunSummary {
    fn add(&mut self, outcome: &LoadOutcome) {
        self.attempted += 1;
        match outcome {
            LoadOutcome::Loaded { .. } => self.loaded += 1,
            LoadOutcome::NoData => self.no_data += 1,
            LoadOutcome::ExtractionFailed { .. } => self.extraction_failed += 1,
            LoadOutcome::Rejected { .. } => self.rejected += 1,
            LoadOutcome::LoadFailed { .. } => self.load_failed += 1,
        }
    }

    pub fn not_loaded(&self) -> usize {
        self.attempted - self.loaded
    }
}

pub struct Pipeline {
    extractor: Extractor,
    loader: Arc<dyn TableLoader>,
    monitor: Arc<dyn MonitorSink>,
    observer: Arc<dyn PipelineObserver>,
    schema: String,
}

impl Pipeline {
    pub fn new(
        extractor: Extractor,
        loader: Arc<dyn TableLoader>,
        monitor: Arc<dyn MonitorSink>,
        observer: Arc<dyn PipelineObserver>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            loader,
            monitor,
            observer,
            schema: schema.into(),
        }
    }

    /// Processes every entry in order. One entry failing never stops the rest.
    pub async fn run_catalog(&self, catalog: &Catalog) -> RunSummary {
        let mut summary = RunSummary::default();
        for entry in catalog.entries() {
            let outcome = self.run_resource(entry).await;
            summary.add(&outcome);
        }

        self.observer.on_event(&PipelineEvent::RunFinished {
            attempted: summary.attempted,
            loaded: summary.loaded,
            failed: summary.not_loaded(),
        });
        summary
    }

    pub async fn run_resource(&self, entry: &CatalogEntry) -> LoadOutcome {
        let observer = self.observer.as_ref();
        let table = entry.table_name.as_str();
        observer.on_event(&PipelineEvent::ResourceStarted {
            resource_id: &entry.resource_id,
            table,
        });

        let outcome = self.process(entry).await;
        self.record(entry, &outcome).await;
        outcome
    }

    async fn process(&self, entry: &CatalogEntry) -> LoadOutcome {
        let observer = self.observer.as_ref();
        let table = entry.table_name.as_str();

        let (dataset, partial) = match self.extractor.extract(&entry.resource_id, observer).await {
            Extraction::Complete(dataset) => (dataset, None),
            Extraction::Partial {
                dataset, reason, ..
            } if dataset.is_empty() => {
                return LoadOutcome::ExtractionFailed { reason };
            }
            Extraction::Partial {
                dataset,
                failed_offset,
                reason,
            } => (
                dataset,
                Some(format!("offset {}: {}", failed_offset, reason)),
            ),
            Extraction::Failed { reason } => return LoadOutcome::ExtractionFailed { reason },
        };

        if dataset.is_empty() {
            observer.on_event(&PipelineEvent::NoData { table });
            return LoadOutcome::NoData;
        }

        let rows = dataset.len() as u64;
        let dataset = match sanitizer::sanitize(dataset) {
            Ok(dataset) => dataset,
            Err(EtlError::PrimaryKeyInvalid { reason }) => {
                observer.on_event(&PipelineEvent::Rejected { table, reason });
                return LoadOutcome::Rejected { reason, rows };
            }
            Err(error) => return self.load_failed(table, rows, error),
        };

        let schema = match TableSchema::infer(&self.schema, table, &dataset) {
            Ok(schema) => schema,
            Err(error) => return self.load_failed(table, rows, error),
        };

        match self.loader.load(&schema, &dataset, observer).await {
            Ok(loaded) => {
                observer.on_event(&PipelineEvent::Loaded {
                    table,
                    rows: loaded,
                });
                LoadOutcome::Loaded { rows, partial }
            }
            Err(error) => self.load_failed(table, rows, error),
        }
    }

    fn load_failed(&self, table: &str, rows: u64, error: EtlError) -> LoadOutcome {
        self.observer
            .on_event(&PipelineEvent::LoadFailed { table, error: &error });
        LoadOutcome::LoadFailed {
            rows,
            error: error.to_string(),
        }
    }

    async fn record(&self, entry: &CatalogEntry, outcome: &LoadOutcome) {
        let record = MonitoringEntry {
            resource_id: entry.resource_id.clone(),
            table_name: entry.table_name.clone(),
            load_time: Utc::now(),
            row_count: i64::try_from(outcome.row_count()).unwrap_or(i64::MAX),
            notes: outcome.note(),
        };

        if let Err(error) = self.monitor.record(&record).await {
            self.observer.on_event(&PipelineEvent::MonitorFailed {
                table: &entry.table_name,
                error: &error,
            });
        }
    }
}
