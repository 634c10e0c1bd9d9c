#![deny(missing_docs)]
//! Compaction of hot SQLite tables into immutable Parquet archives.
//!
//! A [`Compactor`] moves every row of a table that crossed a row threshold
//! into a new archive under `<output>/<table>/<table>-<run_id>.parquet` and
//! appends a provenance record to a ledger table in the same store. The move
//! is atomic per table: a crash or failure at any point leaves the rows
//! either in the store or in exactly one ledgered archive.

pub mod observability;

/// Parquet archive writing and reading.
pub mod archive;

/// Compaction orchestration and the atomic move backends.
pub mod compaction;

/// Engine error type.
pub mod error;

/// Time-ordered run identifiers.
pub mod id;

/// Append-only provenance ledger.
pub mod ledger;

/// Compactor configuration.
pub mod option;

/// Composable compaction scripts and their runner.
pub mod script;

/// SQLite row store access.
pub mod store;

/// Validated SQL table names.
pub mod table;

pub use crate::{
    archive::{ArchiveCompression, ArchiveFile, ArchiveWriter, ParquetArchiveWriter},
    compaction::{
        CompactionPlan, CompactionReport, CompactionStrategy, Compactor, TableOutcome,
    },
    error::CompactError,
    id::RunId,
    ledger::{CompactionRecord, Ledger},
    observability::{CompactionEvent, EventSink, TracingSink},
    option::CompactorOptions,
    table::TableName,
};
