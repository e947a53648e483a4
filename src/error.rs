use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use gcp_bigquery_client::error::BQError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("The date supplied '{date}' is invalid")]
    InvalidDate { date: String },

    #[error("API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("'{endpoint}' responded with status {status}: {body}")]
    UnexpectedStatus {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("{resource} record has a missing or malformed '{field}' field")]
    BadField {
        resource: &'static str,
        field: &'static str,
    },

    #[error("BigQuery: {0}")]
    BigQuery(#[from] BQError),

    #[error("Warehouse write failed: {message}")]
    WarehouseWrite { message: String },

    #[error("Column '{column}' has unsupported type {data_type}")]
    UnsupportedColumn { column: String, data_type: String },

    #[error("{message}")]
    NoData { message: String },
}
