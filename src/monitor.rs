use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{deadpool::Pool, AsyncDieselConnectionManager},
    AsyncPgConnection, RunQueryDsl,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::error::EtlError;
use crate::models::{MonitoringRecord, NewMonitoringRecord};
use crate::schema::etl_monitoring;
use crate::sql;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// One load attempt, as written to `etl_monitoring`.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringEntry {
    pub resource_id: String,
    pub table_name: String,
    pub load_time: DateTime<Utc>,
    pub row_count: i64,
    pub notes: String,
}

#[async_trait]
pub trait MonitorSink: Send + Sync {
    async fn record(&self, entry: &MonitoringEntry) -> Result<(), EtlError>;
}

/// Used when monitoring is switched off; outcomes still reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMonitor;

#[async_trait]
impl MonitorSink for DisabledMonitor {
    async fn record(&self, _entry: &MonitoringEntry) -> Result<(), EtlError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Monitor {
    pool: Pool<AsyncPgConnection>,
    schema: String,
}

impl Monitor {
    pub async fn new(database_url: &str, schema: &str) -> Result<Self, EtlError> {
        let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(config)
            .max_size(2)
            .build()
            .map_err(|e| EtlError::ConnectionError {
                message: format!("Failed to create monitoring pool: {}", e),
            })?;

        let monitor = Self {
            pool,
            schema: schema.to_string(),
        };
        monitor.ensure_table(database_url).await?;

        Ok(monitor)
    }

    /// Creates `etl_monitoring` in the configured schema if it is missing.
    pub async fn ensure_table(&self, database_url: &str) -> Result<(), EtlError> {
        let database_url = database_url.to_string();
        let search_path = sql::set_search_path(&self.schema);

        // diesel_migrations only runs on a synchronous connection
        tokio::task::spawn_blocking(move || -> Result<(), EtlError> {
            use diesel::Connection;
            use diesel::PgConnection;

            let mut connection = PgConnection::establish(&database_url)?;
            diesel::RunQueryDsl::execute(diesel::sql_query(search_path), &mut connection)?;
            connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| EtlError::ConfigError {
                    message: format!("Failed to run monitoring migrations: {}", e),
                })?;
            Ok(())
        })
        .await
        .map_err(|e| EtlError::ConnectionError {
            message: format!("Monitoring migration task failed: {}", e),
        })??;

        info!(
            "Monitoring table '{}.etl_monitoring' ensured in database.",
            self.schema
        );
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<MonitoringRecord>, EtlError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EtlError::ConnectionError {
                message: format!("Failed to get database connection: {}", e),
            })?;

        diesel::sql_query(sql::set_search_path(&self.schema))
            .execute(&mut conn)
            .await?;

        let records = etl_monitoring::table
            .order(etl_monitoring::id.desc())
            .limit(limit)
            .select(MonitoringRecord::as_select())
            .load::<MonitoringRecord>(&mut conn)
            .await?;

        Ok(records)
    }
}

#[async_trait]
impl MonitorSink for Monitor {
    async fn record(&self, entry: &MonitoringEntry) -> Result<(), EtlError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| EtlError::ConnectionError {
                message: format!("Failed to get database connection: {}", e),
            })?;

        diesel::sql_query(sql::set_search_path(&self.schema))
            .execute(&mut conn)
            .await?;

        let new_record = NewMonitoringRecord {
            resource_id: &entry.resource_id,
            table_name: &entry.table_name,
            load_time: entry.load_time,
            row_count: i32::try_from(entry.row_count).unwrap_or(i32::MAX),
            notes: &entry.notes,
        };

        diesel::insert_into(etl_monitoring::table)
            .values(&new_record)
            .execute(&mut conn)
            .await?;

        info!(
            "Logged monitoring entry for {} with status '{}'.",
            entry.table_name, entry.notes
        );
        Ok(())
    }
}
