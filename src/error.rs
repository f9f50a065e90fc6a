use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKeyViolation {
    NullId,
    DuplicateId,
}

impl PrimaryKeyViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryKeyViolation::NullId => "null-id",
            PrimaryKeyViolation::DuplicateId => "duplicate-id",
        }
    }
}

impl std::fmt::Display for PrimaryKeyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Primary key invalid: {reason}")]
    PrimaryKeyInvalid { reason: PrimaryKeyViolation },

    #[error("Schema error: {message}")]
    SchemaError { message: String },

    #[error("Load failed for {table}: {message}")]
    LoadFailed { table: String, message: String },

    #[error("Table {schema}.{table} not found after creation")]
    VerificationFailed { schema: String, table: String },

    #[error("Database connection error: {message}")]
    ConnectionError { message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] diesel::result::Error),

    #[error("HTTP {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("Rate limited by remote API (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl From<diesel::ConnectionError> for EtlError {
    fn from(err: diesel::ConnectionError) -> Self {
        EtlError::ConnectionError {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::ConfigError {
            message: format!("IO error: {}", err),
        }
    }
}
