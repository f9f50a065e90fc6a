pub mod catalog;
pub mod config;
pub mod dataset;
pub mod datastore;
pub mod error;
pub mod extractor;
pub mod loader;
pub mod models;
pub mod monitor;
pub mod observer;
pub mod pipeline;
pub mod sanitizer;
pub mod schema;
pub mod sql;
pub mod table_schema;

pub use catalog::{Catalog, CatalogEntry};
pub use config::EtlConfig;
pub use error::EtlError;
pub use pipeline::{LoadOutcome, Pipeline, RunSummary};
