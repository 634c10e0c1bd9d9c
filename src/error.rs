use std::path::PathBuf;

use thiserror::Error;

use crate::{archive::ArchiveError, id::RunIdError, script::ScriptError};

/// Errors surfaced by the compaction engine.
///
/// Per-table variants are folded into a table outcome by the orchestrator;
/// only [`CompactError::StoreUnavailable`] and [`CompactError::RunId`] abort a
/// whole run.
#[derive(Debug, Error)]
pub enum CompactError {
    /// The table held fewer rows than the threshold; not a failure.
    #[error("table has {rows} rows, fewer than the {min} required to compact")]
    InsufficientRows {
        /// Rows observed.
        rows: u64,
        /// Configured threshold.
        min: u64,
    },
    /// Writing or publishing the archive file failed.
    #[error("archive write failed: {0}")]
    ArchiveWrite(#[from] ArchiveError),
    /// Inserting the provenance record failed.
    #[error("ledger write failed: {0}")]
    LedgerWrite(#[source] rusqlite::Error),
    /// A per-table store operation failed.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
    /// The store could not be opened or initialised at all.
    #[error("store {} unavailable: {source}", path.display())]
    StoreUnavailable {
        /// Location of the store.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: rusqlite::Error,
    },
    /// Vacuuming the store after the run failed.
    #[error("space reclamation failed: {0}")]
    Reclaim(#[source] rusqlite::Error),
    /// A table or ledger name is not a plain SQL identifier.
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    /// The ledger table was listed as a table to compact.
    #[error("table {0} is the compaction ledger and cannot be compacted")]
    LedgerNotCompactable(String),
    /// A run id could not be generated.
    #[error(transparent)]
    RunId(#[from] RunIdError),
    /// A composed script could not be executed.
    #[error("script error: {0}")]
    Script(#[from] ScriptError),
}
