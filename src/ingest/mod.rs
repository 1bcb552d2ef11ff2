//! Ingestion of monitor-io CSV exports.
//!
//! Parses raw payloads into validated wide rows and reshapes them into a
//! single tidy measurement table plus a DNS failure table.

mod models;
mod parser;
mod reshape;
mod schema;

pub use models::*;
pub use parser::*;
pub use reshape::*;
pub use schema::*;

use thiserror::Error;

/// A row could not be read.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("malformed CSV record: {0}")]
    Malformed(String),
    #[error("unparseable timestamp {0:?}")]
    Timestamp(String),
    #[error("column {column}: {value:?} is not a number")]
    Number { column: String, value: String },
}

/// A row was read but its content is unacceptable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("column {column}: target name is absent")]
    TargetAbsent { column: String },
    #[error("target {0:?} is excluded")]
    TargetExcluded(String),
    #[error("column {column}: {value} is outside the allowed range")]
    OutOfBounds { column: String, value: f64 },
}

/// Why a row (or one target's cells within it) was dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// A dropped row, kept for logging and refresh statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRejection {
    pub filename: String,
    /// 1-based line number in the source file (the header is line 1)
    pub line: u64,
    pub reason: RejectReason,
}

/// A whole file is unusable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReshapeError {
    #[error("{filename}: unreadable CSV header: {reason}")]
    Unreadable { filename: String, reason: String },
    #[error("{filename}: no recognizable timestamp column")]
    NoTimestampColumn { filename: String },
    #[error("{filename}: no measurement or DNS failure columns")]
    NoMeasurementColumns { filename: String },
}
