use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::datastore::{RetryPolicy, DEFAULT_BASE_URL};
use crate::error::EtlError;
use crate::extractor::DEFAULT_PAGE_SIZE;

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub database_url: String,
    pub db_schema: String,
    pub datastore_url: String,
    pub page_size: u64,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub catalog_path: Option<PathBuf>,
    pub monitoring: bool,
}

impl EtlConfig {
    pub fn from_env() -> Result<Self, EtlError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EtlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = match get("DATABASE_URL") {
            Some(url) => url,
            None => build_database_url(&get)?,
        };

        let mut retry = RetryPolicy::default();
        if let Some(max_retries) = parse_opt::<u32>(get("ETL_MAX_RETRIES"), "ETL_MAX_RETRIES")? {
            retry.max_retries = max_retries;
        }

        Ok(Self {
            database_url,
            db_schema: get("DB_SCHEMA").unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            datastore_url: get("DATASTORE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            page_size: parse_opt::<u64>(get("ETL_PAGE_SIZE"), "ETL_PAGE_SIZE")?
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_PAGE_SIZE),
            retry,
            http_timeout: Duration::from_secs(
                parse_opt::<u64>(get("ETL_HTTP_TIMEOUT_SECS"), "ETL_HTTP_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            catalog_path: get("ETL_CATALOG_PATH").map(PathBuf::from),
            monitoring: parse_opt::<bool>(get("ETL_MONITORING"), "ETL_MONITORING")?
                .unwrap_or(true),
        })
    }

    /// Database URL with the password replaced, for logging.
    pub fn masked_database_url(&self) -> String {
        match Url::parse(&self.database_url) {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(_) => "<unparseable database url>".to_string(),
        }
    }
}

fn build_database_url<G>(get: &G) -> Result<String, EtlError>
where
    G: Fn(&str) -> Option<String>,
{
    let required = ["DB_USER", "DB_PASSWORD", "DB_HOST", "DB_PORT", "DB_NAME"];
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| get(key).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(EtlError::ConfigError {
            message: format!(
                "Database connection parameters incomplete, missing: {}",
                missing.join(", ")
            ),
        });
    }

    let value = |key: &str| get(key).unwrap_or_default();
    let port: u16 = value("DB_PORT")
        .parse()
        .map_err(|e| EtlError::ConfigError {
            message: format!("Invalid DB_PORT: {}", e),
        })?;

    let mut url = Url::parse(&format!("postgresql://{}:{}/", value("DB_HOST"), port)).map_err(
        |e| EtlError::ConfigError {
            message: format!("Invalid DB_HOST: {}", e),
        },
    )?;
    url.set_path(&value("DB_NAME"));
    url.set_username(&value("DB_USER"))
        .and_then(|_| url.set_password(Some(&value("DB_PASSWORD"))))
        .map_err(|_| EtlError::ConfigError {
            message: "Database URL cannot carry credentials".to_string(),
        })?;
    url.query_pairs_mut().append_pair(
        "sslmode",
        &get("DB_SSLMODE").unwrap_or_else(|| "disable".to_string()),
    );

    Ok(url.to_string())
}

fn parse_opt<T>(value: Option<String>, key: &str) -> Result<Option<T>, EtlError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|e| EtlError::ConfigError {
                message: format!("Invalid {}: {}", key, e),
            })
        })
        .transpose()
}
