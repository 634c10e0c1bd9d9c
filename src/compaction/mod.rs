//! Compaction of hot SQLite tables into Parquet archives.
//!
//! The [`Compactor`] selects tables that crossed the row threshold and hands
//! them to a [`CompactionBackend`]. Both shipped backends move a table's rows
//! atomically: after a table is processed its rows live either in the store
//! or in exactly one archive with a ledger record, never both or neither.

/// Top-level run control.
mod orchestrator;
/// Per-table and per-run results.
mod outcome;
/// Transaction-then-rename backend.
mod rename;
/// Single composed-script backend.
mod scripted;

use std::{fmt, str::FromStr};

pub use self::{
    orchestrator::{CompactionPlan, Compactor},
    outcome::{CompactionReport, TableOutcome},
    rename::RenameBackend,
    scripted::ScriptBackend,
};
use crate::{
    archive::ArchiveFile, error::CompactError, id::RunId, ledger::Ledger,
    option::CompactorOptions, store::RowStore, table::TableName,
};

/// Which backend performs the atomic extract-archive-record protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CompactionStrategy {
    /// Delete rows and append the ledger record in one store transaction,
    /// publishing the archive by rename before committing.
    #[default]
    Rename,
    /// Compose every table into one script of transactional blocks and run it.
    Script,
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactionStrategy::Rename => f.write_str("rename"),
            CompactionStrategy::Script => f.write_str("script"),
        }
    }
}

impl FromStr for CompactionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rename" => Ok(CompactionStrategy::Rename),
            "script" => Ok(CompactionStrategy::Script),
            other => Err(format!(
                "unknown strategy {other:?}, expected rename or script"
            )),
        }
    }
}

/// A table that met the threshold at selection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EligibleTable {
    /// Table name.
    pub name: TableName,
    /// Row count observed during selection.
    pub rows: u64,
}

/// Everything a backend needs to know about the current run.
#[derive(Debug)]
pub struct RunContext<'a> {
    /// Identifier of the run.
    pub run_id: RunId,
    /// Run start, milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Run configuration.
    pub options: &'a CompactorOptions,
    /// Ledger records are appended to.
    pub ledger: &'a Ledger,
}

/// Result of compacting one table, keyed by the table.
pub type TableResult = (TableName, Result<ArchiveFile, CompactError>);

/// Performs the atomic extract-archive-record protocol for a set of tables.
pub trait CompactionBackend {
    /// Compact every table in `tables`, returning one result per table.
    ///
    /// A per-table failure must leave that table unchanged and be returned
    /// in its slot; only failures that make the store unusable are returned
    /// as `Err`.
    fn compact(
        &self,
        store: &mut RowStore,
        run: &RunContext<'_>,
        tables: &[EligibleTable],
    ) -> Result<Vec<TableResult>, CompactError>;
}
