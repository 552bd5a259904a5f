//! Error types and result aliases for the breadcrumbs library.
//!
//! This module defines the core error type [`BreadcrumbsError`] and the [`Result`] type
//! alias used throughout the library. Only operations a caller explicitly asks for
//! (opening a store, an explicit flush, loading, exporting) return errors; the
//! recording paths swallow failures and report them through `tracing`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BreadcrumbsError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Normalization error: {0}")]
    NormalizationError(String),

    #[error("Cost already set for record {0}")]
    CostAlreadySet(String),
}

pub type Result<T> = std::result::Result<T, BreadcrumbsError>;
