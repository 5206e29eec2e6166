//! Error types for the rebalancer.

use std::path::PathBuf;

use rebal::GenerateError;
use rebal_broker::BrokerError;

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("input error: {0}")]
    Input(String),

    #[error("failed to read input file {path}: {source}")]
    InputRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse input JSON {path}: {source}")]
    InputParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("broker connection error: {0}")]
    Connection(#[source] BrokerError),

    #[error("order list file {path} not found")]
    OrdersMissing { path: PathBuf },

    #[error("failed to read order list file {path}: {source}")]
    OrdersRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("order list file {path} is malformed: {reason}")]
    OrdersMalformed { path: PathBuf, reason: String },

    #[error("order list is invalid: {0}")]
    OrdersInvalid(String),

    #[error("cannot build orders: {0}")]
    Generate(#[from] GenerateError),

    #[error("confirmation prompt failed: {0}")]
    Prompt(String),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("report error: {0}")]
    Report(String),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

impl Error {
    pub fn is_orders_file(&self) -> bool {
        matches!(
            self,
            Error::OrdersMissing { .. }
                | Error::OrdersRead { .. }
                | Error::OrdersMalformed { .. }
                | Error::OrdersInvalid(_)
        )
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Error::Connection(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
