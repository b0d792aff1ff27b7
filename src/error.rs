use std::path::PathBuf;

use rust_decimal::Decimal;
use thiserror::Error;

/// Configuration failures surfaced at startup, before the server binds.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),

    #[error("database query error: {0}")]
    Query(String),

    #[error("database migration error: {0}")]
    Migration(String),

    #[error("failed to (de)serialize a stored value: {0}")]
    Serialization(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// A trust withdrawal would take a matter's trust balance below zero.
    /// Rejected inside the ledger transaction so the balance column never
    /// records an overdraft.
    #[error(
        "trust withdrawal of {requested} would overdraw matter {matter_id} (balance {balance})"
    )]
    TrustOverdraft {
        matter_id: String,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("{0}")]
    Conflict(String),
}

impl From<libsql::Error> for DatabaseError {
    fn from(err: libsql::Error) -> Self {
        DatabaseError::Query(err.to_string())
    }
}

/// Startup failures from the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve local address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Errors from LLM provider calls.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("llm provider returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("llm response contained no usable content")]
    EmptyResponse,

    #[error("failed to parse llm response: {0}")]
    Parse(String),

    #[error("no llm provider is configured")]
    NotConfigured,
}

/// Errors raised while assembling or rendering an estate document.
#[derive(Debug, Error)]
pub enum DocGenError {
    #[error("template render failed: {0}")]
    Template(#[from] tera::Error),

    #[error("invalid intake: {0}")]
    Intake(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
