use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::schema::etl_monitoring;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = etl_monitoring)]
#[diesel(primary_key(id))]
pub struct MonitoringRecord {
    pub id: i32,
    pub resource_id: String,
    pub table_name: String,
    pub load_time: DateTime<Utc>,
    pub row_count: i32,
    pub notes: String,
}

#[derive(Insertable)]
#[diesel(table_name = etl_monitoring)]
pub struct NewMonitoringRecord<'a> {
    pub resource_id: &'a str,
    pub table_name: &'a str,
    pub load_time: DateTime<Utc>,
    pub row_count: i32,
    pub notes: &'a str,
}
