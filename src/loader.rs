use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::pg::Pg;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_types::{BigInt, Bool, Double, Nullable, Text, Timestamp};
use diesel::QueryableByName;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::info;
use uuid::Uuid;

use crate::dataset::{parse_timestamp, ColumnType, Dataset, Value};
use crate::error::EtlError;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::sql;
use crate::table_schema::TableSchema;

/// Replaces a target table's contents with a sanitized dataset.
#[async_trait]
pub trait TableLoader: Send + Sync {
    async fn load(
        &self,
        schema: &TableSchema,
        dataset: &Dataset,
        observer: &dyn PipelineObserver,
    ) -> Result<u64, EtlError>;
}

#[derive(QueryableByName)]
struct TableExists {
    #[diesel(sql_type = Bool)]
    present: bool,
}

pub struct PgLoader {
    database_url: String,
}

impl PgLoader {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    async fn connect(&self) -> Result<AsyncPgConnection, EtlError> {
        AsyncPgConnection::establish(&self.database_url)
            .await
            .map_err(|e| EtlError::ConnectionError {
                message: format!("Failed to establish connection for load: {}", e),
            })
    }
}

#[async_trait]
impl TableLoader for PgLoader {
    async fn load(
        &self,
        schema: &TableSchema,
        dataset: &Dataset,
        observer: &dyn PipelineObserver,
    ) -> Result<u64, EtlError> {
        // no rows this run must never drop the existing table
        if dataset.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connect().await?;
        let staging = sql::staging_table_name(&schema.table, &Uuid::new_v4());
        let staging = staging.as_str();

        info!(
            "Loading {} rows into {} via {}",
            dataset.len(),
            schema.qualified_name(),
            staging
        );

        conn.transaction::<_, EtlError, _>(|conn| {
            Box::pin(async move { run_load(conn, schema, dataset, staging, observer).await })
        })
        .await
        .map_err(|e| match e {
            EtlError::DatabaseError(e) => EtlError::LoadFailed {
                table: schema.table.clone(),
                message: e.to_string(),
            },
            other => other,
        })
    }
}

async fn run_load(
    conn: &mut AsyncPgConnection,
    schema: &TableSchema,
    dataset: &Dataset,
    staging: &str,
    observer: &dyn PipelineObserver,
) -> Result<u64, EtlError> {
    let table = schema.table.as_str();

    diesel::sql_query(sql::drop_table(&schema.schema, &schema.table))
        .execute(conn)
        .await?;
    diesel::sql_query(schema.create_table_sql())
        .execute(conn)
        .await?;
    observer.on_event(&PipelineEvent::TableCreated { table });

    let exists = diesel::sql_query(sql::TABLE_EXISTS)
        .bind::<Text, _>(&schema.schema)
        .bind::<Text, _>(&schema.table)
        .get_result::<TableExists>(conn)
        .await?;
    if !exists.present {
        return Err(EtlError::VerificationFailed {
            schema: schema.schema.clone(),
            table: schema.table.clone(),
        });
    }

    diesel::sql_query(sql::create_staging_table(staging, schema))
        .execute(conn)
        .await?;
    let staged = stage_rows(conn, staging, schema, dataset).await?;
    observer.on_event(&PipelineEvent::Staged {
        table,
        staging,
        rows: staged,
    });

    let upserted = diesel::sql_query(sql::upsert_from_staging(staging, schema))
        .execute(conn)
        .await?;
    observer.on_event(&PipelineEvent::Upserted {
        table,
        rows: upserted as u64,
    });

    diesel::sql_query(sql::drop_staging_table(staging))
        .execute(conn)
        .await?;
    observer.on_event(&PipelineEvent::StagingDropped { staging });

    Ok(upserted as u64)
}

async fn stage_rows(
    conn: &mut AsyncPgConnection,
    staging: &str,
    schema: &TableSchema,
    dataset: &Dataset,
) -> Result<usize, EtlError> {
    let chunk_size = sql::rows_per_insert(schema.columns.len());
    let mut staged = 0;

    for chunk in dataset.rows().chunks(chunk_size) {
        let statement = sql::insert_staging_rows(staging, schema, chunk.len());
        let mut query = diesel::sql_query(statement).into_boxed::<Pg>();
        for row in chunk {
            for column in &schema.columns {
                query = bind_value(query, column.column_type, &row[column.source_index]);
            }
        }
        staged += query.execute(conn).await?;
    }

    Ok(staged)
}

fn bind_value<'f>(
    query: BoxedSqlQuery<'f, Pg, SqlQuery>,
    column_type: ColumnType,
    value: &Value,
) -> BoxedSqlQuery<'f, Pg, SqlQuery> {
    match column_type {
        ColumnType::Integer => query.bind::<Nullable<BigInt>, _>(as_integer(value)),
        ColumnType::Float => query.bind::<Nullable<Double>, _>(as_float(value)),
        ColumnType::Boolean => query.bind::<Nullable<Bool>, _>(as_boolean(value)),
        ColumnType::Timestamp => query.bind::<Nullable<Timestamp>, _>(as_timestamp(value)),
        ColumnType::Text => query.bind::<Nullable<Text>, _>(value.as_text()),
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) if !f.is_nan() => Some(*f),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Text(s) => parse_timestamp(s),
        _ => None,
    }
}
