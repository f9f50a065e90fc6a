use async_trait::async_trait;
use open_data_etl::dataset::{Dataset, Value};
use open_data_etl::datastore::{PageSource, SearchResult};
use open_data_etl::error::{EtlError, PrimaryKeyViolation};
use open_data_etl::extractor::Extractor;
use open_data_etl::loader::TableLoader;
use open_data_etl::monitor::{MonitorSink, MonitoringEntry};
use open_data_etl::observer::{PipelineObserver, TracingObserver};
use open_data_etl::table_schema::TableSchema;
use open_data_etl::{Catalog, CatalogEntry, LoadOutcome, Pipeline};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

const PAGE_SIZE: u64 = 2;

enum Resource {
    Records(Vec<Map<String, JsonValue>>),
    NotFound,
    FailAt {
        records: Vec<Map<String, JsonValue>>,
        offset: u64,
    },
}

/// Stand-in for the remote datastore. Resources can be swapped between runs.
#[derive(Default)]
struct FakeApi {
    resources: Mutex<HashMap<String, Resource>>,
}

impl FakeApi {
    fn serve(&self, resource_id: &str, resource: Resource) {
        self.resources
            .lock()
            .unwrap()
            .insert(resource_id.to_string(), resource);
    }
}

fn page(records: &[Map<String, JsonValue>], limit: u64, offset: u64) -> SearchResult {
    let start = (offset as usize).min(records.len());
    let end = (start + limit as usize).min(records.len());
    SearchResult {
        total: records.len() as u64,
        records: records[start..end].to_vec(),
    }
}

#[async_trait]
impl PageSource for FakeApi {
    async fn fetch_page(
        &self,
        resource_id: &str,
        limit: u64,
        offset: u64,
    ) -> Result<SearchResult, EtlError> {
        let resources = self.resources.lock().unwrap();
        match resources.get(resource_id) {
            Some(Resource::Records(records)) => Ok(page(records, limit, offset)),
            Some(Resource::FailAt {
                records,
                offset: failing,
            }) if limit == PAGE_SIZE && offset == *failing => Err(EtlError::HttpError {
                status: 500,
                message: "Internal Server Error".to_string(),
            }),
            Some(Resource::FailAt { records, .. }) => Ok(page(records, limit, offset)),
            Some(Resource::NotFound) | None => Err(EtlError::HttpError {
                status: 404,
                message: "Not Found".to_string(),
            }),
        }
    }
}

type Row = BTreeMap<String, Value>;

/// In-memory stand-in for Postgres. Each load replaces the whole table with
/// the dataset's rows, last row per `_id` winning; the SQL upsert itself is
/// covered by `postgres_load_test.rs`. A failed load leaves the previous table
/// untouched.
#[derive(Default)]
struct Warehouse {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    failing: Mutex<HashSet<String>>,
}

impl Warehouse {
    fn table(&self, name: &str) -> Option<Vec<Row>> {
        self.tables.lock().unwrap().get(name).cloned()
    }

    fn fail_loads_for(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }
}

#[async_trait]
impl TableLoader for Warehouse {
    async fn load(
        &self,
        schema: &TableSchema,
        dataset: &Dataset,
        _observer: &dyn PipelineObserver,
    ) -> Result<u64, EtlError> {
        if dataset.is_empty() {
            return Ok(0);
        }
        if self.failing.lock().unwrap().contains(&schema.table) {
            return Err(EtlError::LoadFailed {
                table: schema.table.clone(),
                message: "relation is locked".to_string(),
            });
        }

        let mut target: Vec<Row> = Vec::new();
        for source in dataset.rows() {
            let row: Row = schema
                .columns
                .iter()
                .map(|c| (c.name.clone(), source[c.source_index].clone()))
                .collect();
            let existing = row
                .get("_id")
                .and_then(|id| target.iter().position(|r| r.get("_id") == Some(id)));
            match existing {
                Some(pos) => target[pos] = row,
                None => target.push(row),
            }
        }

        let upserted = target.len() as u64;
        self.tables
            .lock()
            .unwrap()
            .insert(schema.table.clone(), target);
        Ok(upserted)
    }
}

#[derive(Default)]
struct RecordingMonitor {
    entries: Mutex<Vec<MonitoringEntry>>,
    unavailable: bool,
}

impl RecordingMonitor {
    fn notes(&self) -> Vec<(String, String, i64)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.table_name.clone(), e.notes.clone(), e.row_count))
            .collect()
    }
}

#[async_trait]
impl MonitorSink for RecordingMonitor {
    async fn record(&self, entry: &MonitoringEntry) -> Result<(), EtlError> {
        if self.unavailable {
            return Err(EtlError::ConnectionError {
                message: "monitoring database is down".to_string(),
            });
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

fn record(value: JsonValue) -> Map<String, JsonValue> {
    serde_json::from_value(value).unwrap()
}

fn vehicles() -> Vec<Map<String, JsonValue>> {
    vec![
        record(json!({"_id": 1, "Tozeret_Nm": "TOYOTA", "Kamut_CO2": "120"})),
        record(json!({"_id": 2, "Tozeret_Nm": "Mazda", "Kamut_CO2": "n/a"})),
        record(json!({"_id": 3, "Tozeret_Nm": "KIA", "Kamut_CO2": "98.5"})),
    ]
}

struct Harness {
    api: Arc<FakeApi>,
    warehouse: Arc<Warehouse>,
    monitor: Arc<RecordingMonitor>,
    pipeline: Pipeline,
}

fn harness_with_monitor(monitor: RecordingMonitor) -> Harness {
    init_test_logging();
    let api = Arc::new(FakeApi::default());
    let warehouse = Arc::new(Warehouse::default());
    let monitor = Arc::new(monitor);
    let pipeline = Pipeline::new(
        Extractor::new(api.clone(), PAGE_SIZE),
        warehouse.clone(),
        monitor.clone(),
        Arc::new(TracingObserver),
        "public",
    );
    Harness {
        api,
        warehouse,
        monitor,
        pipeline,
    }
}

fn harness() -> Harness {
    harness_with_monitor(RecordingMonitor::default())
}

#[tokio::test]
async fn test_failed_resource_does_not_stop_the_catalog() {
    // Given: three resources where the middle one cannot be fetched
    let h = harness();
    h.api.serve("res-a", Resource::Records(vehicles()));
    h.api.serve("res-b", Resource::NotFound);
    h.api.serve("res-c", Resource::Records(vehicles()));
    let catalog = Catalog::new(vec![
        CatalogEntry::new("res-a", "vehicles_a"),
        CatalogEntry::new("res-b", "vehicles_b"),
        CatalogEntry::new("res-c", "vehicles_c"),
    ])
    .unwrap();

    // When: running the whole catalog
    let summary = h.pipeline.run_catalog(&catalog).await;

    // Then: both healthy resources are loaded and the failure is recorded
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.extraction_failed, 1);
    assert_eq!(h.warehouse.table("vehicles_a").map(|t| t.len()), Some(3));
    assert!(h.warehouse.table("vehicles_b").is_none());
    assert_eq!(h.warehouse.table("vehicles_c").map(|t| t.len()), Some(3));

    let notes = h.monitor.notes();
    assert_eq!(notes.len(), 3);
    assert_eq!(notes[0], ("vehicles_a".to_string(), "Success".to_string(), 3));
    assert_eq!(notes[1].0, "vehicles_b");
    assert!(notes[1].1.starts_with("Extraction failed: "));
    assert_eq!(notes[1].2, 0);
    assert_eq!(notes[2].1, "Success");
}

#[tokio::test]
async fn test_loaded_table_matches_sanitized_dataset() {
    // Given: a resource with mixed-case text and a sentinel in a domain column
    let h = harness();
    h.api.serve("res", Resource::Records(vehicles()));

    // When: loading it
    let outcome = h
        .pipeline
        .run_resource(&CatalogEntry::new("res", "vehicles"))
        .await;

    // Then: the table holds one row per _id with normalized values
    assert_eq!(
        outcome,
        LoadOutcome::Loaded {
            rows: 3,
            partial: None
        }
    );
    let table = h.warehouse.table("vehicles").unwrap();
    let by_id: HashMap<i64, &Row> = table
        .iter()
        .map(|row| match row.get("_id") {
            Some(Value::Int(id)) => (*id, row),
            other => panic!("unexpected _id {:?}", other),
        })
        .collect();
    assert_eq!(by_id.len(), 3);
    assert_eq!(
        by_id[&1].get("tozeret_nm"),
        Some(&Value::Text("toyota".to_string()))
    );
    assert_eq!(by_id[&1].get("kamut_co2"), Some(&Value::Int(120)));
    assert_eq!(by_id[&2].get("kamut_co2"), Some(&Value::Null));
    assert_eq!(by_id[&3].get("kamut_co2"), Some(&Value::Float(98.5)));
}

#[tokio::test]
async fn test_duplicate_id_leaves_previous_table_in_place() {
    // Given: a table loaded by an earlier run
    let h = harness();
    let entry = CatalogEntry::new("res", "vehicles");
    h.api.serve("res", Resource::Records(vehicles()));
    h.pipeline.run_resource(&entry).await;
    let before = h.warehouse.table("vehicles").unwrap();

    // When: the resource now repeats an _id
    h.api.serve(
        "res",
        Resource::Records(vec![
            record(json!({"_id": 7, "Tozeret_Nm": "FIAT"})),
            record(json!({"_id": 7, "Tozeret_Nm": "SEAT"})),
        ]),
    );
    let outcome = h.pipeline.run_resource(&entry).await;

    // Then: the load is rejected and the earlier contents survive
    assert_eq!(
        outcome,
        LoadOutcome::Rejected {
            reason: PrimaryKeyViolation::DuplicateId,
            rows: 2
        }
    );
    assert_eq!(h.warehouse.table("vehicles").unwrap(), before);
    let notes = h.monitor.notes();
    assert_eq!(notes[1], ("vehicles".to_string(), "Duplicate _id".to_string(), 2));
}

#[tokio::test]
async fn test_null_id_is_rejected_before_any_table_exists() {
    // Given: a resource whose second record has a sentinel _id
    let h = harness();
    h.api.serve(
        "res",
        Resource::Records(vec![
            record(json!({"_id": 1, "Sug_Degem": "P"})),
            record(json!({"_id": "NaN", "Sug_Degem": "M"})),
        ]),
    );

    // When: processing it
    let outcome = h
        .pipeline
        .run_resource(&CatalogEntry::new("res", "models"))
        .await;

    // Then: nothing is written and the monitoring note names the reason
    assert_eq!(outcome.note(), "NaN in _id");
    assert!(h.warehouse.table("models").is_none());
    assert_eq!(
        h.monitor.notes(),
        vec![("models".to_string(), "NaN in _id".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_key_column_with_unsanitized_name_is_validated() {
    // Given: a resource whose key arrives as "-id" and repeats a value
    let h = harness();
    h.api.serve(
        "res",
        Resource::Records(vec![
            record(json!({"-id": 4, "Tozeret_Nm": "FIAT"})),
            record(json!({"-id": 4, "Tozeret_Nm": "SEAT"})),
        ]),
    );

    // When: processing it
    let outcome = h
        .pipeline
        .run_resource(&CatalogEntry::new("res", "vehicles"))
        .await;

    // Then: it is rejected as a duplicate key before any table is created
    assert_eq!(
        outcome,
        LoadOutcome::Rejected {
            reason: PrimaryKeyViolation::DuplicateId,
            rows: 2
        }
    );
    assert!(h.warehouse.table("vehicles").is_none());
}

#[tokio::test]
async fn test_empty_resource_is_no_data() {
    // Given: a table from an earlier run and a resource that is now empty
    let h = harness();
    let entry = CatalogEntry::new("res", "recalls");
    h.api.serve("res", Resource::Records(vehicles()));
    h.pipeline.run_resource(&entry).await;
    h.api.serve("res", Resource::Records(Vec::new()));

    // When: processing it again
    let outcome = h.pipeline.run_resource(&entry).await;

    // Then: the run reports no data and leaves the table alone
    assert_eq!(outcome, LoadOutcome::NoData);
    assert_eq!(h.warehouse.table("recalls").map(|t| t.len()), Some(3));
    assert_eq!(
        h.monitor.notes()[1],
        ("recalls".to_string(), "No data".to_string(), 0)
    );
}

#[tokio::test]
async fn test_rerun_with_same_data_is_idempotent() {
    // Given: a resource loaded once
    let h = harness();
    let entry = CatalogEntry::new("res", "vehicles");
    h.api.serve("res", Resource::Records(vehicles()));
    h.pipeline.run_resource(&entry).await;
    let first = h.warehouse.table("vehicles").unwrap();

    // When: loading the same data again
    let outcome = h.pipeline.run_resource(&entry).await;

    // Then: the table is unchanged
    assert!(outcome.is_loaded());
    assert_eq!(h.warehouse.table("vehicles").unwrap(), first);
}

#[tokio::test]
async fn test_partial_extraction_loads_fetched_rows() {
    // Given: five records where the page at offset 2 fails
    let h = harness();
    let records = (1..=5)
        .map(|i| record(json!({"_id": i, "Shnat_Yitzur": 2000 + i})))
        .collect();
    h.api.serve("res", Resource::FailAt { records, offset: 2 });

    // When: processing it
    let outcome = h
        .pipeline
        .run_resource(&CatalogEntry::new("res", "years"))
        .await;

    // Then: the first page is loaded and the note marks it partial
    assert_eq!(outcome.row_count(), 2);
    assert!(outcome.note().starts_with("Success (partial: offset 2"));
    assert_eq!(h.warehouse.table("years").map(|t| t.len()), Some(2));
}

#[tokio::test]
async fn test_partial_extraction_without_rows_is_a_failure() {
    // Given: a resource whose very first page fails
    let h = harness();
    h.api.serve(
        "res",
        Resource::FailAt {
            records: vehicles(),
            offset: 0,
        },
    );

    // When: processing it
    let outcome = h
        .pipeline
        .run_resource(&CatalogEntry::new("res", "vehicles"))
        .await;

    // Then: it counts as an extraction failure, not as an empty dataset
    assert!(matches!(outcome, LoadOutcome::ExtractionFailed { .. }));
    assert!(h.warehouse.table("vehicles").is_none());
}

#[tokio::test]
async fn test_load_failure_and_monitor_outage_are_isolated() {
    // Given: a warehouse that refuses one table and a monitor that is down
    let h = harness_with_monitor(RecordingMonitor {
        unavailable: true,
        ..Default::default()
    });
    h.api.serve("res-a", Resource::Records(vehicles()));
    h.api.serve("res-b", Resource::Records(vehicles()));
    h.warehouse.fail_loads_for("locked");
    let catalog = Catalog::new(vec![
        CatalogEntry::new("res-a", "locked"),
        CatalogEntry::new("res-b", "open"),
    ])
    .unwrap();

    // When: running the catalog
    let summary = h.pipeline.run_catalog(&catalog).await;

    // Then: the second table still loads
    assert_eq!(summary.load_failed, 1);
    assert_eq!(summary.loaded, 1);
    assert!(h.warehouse.table("locked").is_none());
    assert_eq!(h.warehouse.table("open").map(|t| t.len()), Some(3));
    assert!(h.monitor.notes().is_empty());
}
