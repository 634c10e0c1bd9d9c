use std::fmt;

use crate::{archive::ArchiveFile, error::CompactError, id::RunId, table::TableName};

/// What happened to one requested table.
#[derive(Debug)]
pub enum TableOutcome {
    /// Rows were moved into `archive` and recorded in the ledger.
    Compacted {
        /// Archive holding the moved rows.
        archive: ArchiveFile,
    },
    /// The table held fewer rows than the threshold and was left untouched.
    Skipped {
        /// Rows observed.
        rows: u64,
    },
    /// Compaction failed; the table still holds all of its rows.
    Failed {
        /// Cause of the failure.
        error: CompactError,
    },
}

impl TableOutcome {
    /// Archive written for this table, if it was compacted.
    pub fn archive(&self) -> Option<&ArchiveFile> {
        match self {
            TableOutcome::Compacted { archive } => Some(archive),
            _ => None,
        }
    }

    /// Whether the table failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, TableOutcome::Failed { .. })
    }
}

impl From<Result<ArchiveFile, CompactError>> for TableOutcome {
    fn from(result: Result<ArchiveFile, CompactError>) -> Self {
        match result {
            Ok(archive) => TableOutcome::Compacted { archive },
            Err(CompactError::InsufficientRows { rows, .. }) => TableOutcome::Skipped { rows },
            Err(error) => TableOutcome::Failed { error },
        }
    }
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableOutcome::Compacted { archive } => write!(
                f,
                "compacted {} rows into {}",
                archive.rows(),
                archive.file_name()
            ),
            TableOutcome::Skipped { rows } => write!(f, "skipped ({rows} rows)"),
            TableOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// Summary of one compaction run.
#[derive(Debug)]
pub struct CompactionReport {
    pub(crate) run_id: RunId,
    pub(crate) outcomes: Vec<(TableName, TableOutcome)>,
    pub(crate) reclaim_error: Option<CompactError>,
    pub(crate) size_before: u64,
    pub(crate) size_after: u64,
}

impl CompactionReport {
    /// Identifier of the run.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Per-table outcomes in request order.
    pub fn outcomes(&self) -> &[(TableName, TableOutcome)] {
        &self.outcomes
    }

    /// Outcome for `table`, if it was requested.
    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name.as_str() == table)
            .map(|(_, outcome)| outcome)
    }

    /// Archives written by this run.
    pub fn compacted(&self) -> impl Iterator<Item = (&TableName, &ArchiveFile)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.archive().map(|archive| (name, archive)))
    }

    /// Total rows moved out of the store.
    pub fn rows_moved(&self) -> u64 {
        self.compacted().map(|(_, archive)| archive.rows()).sum()
    }

    /// Whether any table failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|(_, outcome)| outcome.is_failed())
    }

    /// Vacuum failure, if reclamation did not succeed.
    pub fn reclaim_error(&self) -> Option<&CompactError> {
        self.reclaim_error.as_ref()
    }

    /// Store file size before the run, in bytes.
    pub fn size_before(&self) -> u64 {
        self.size_before
    }

    /// Store file size after reclamation, in bytes.
    pub fn size_after(&self) -> u64 {
        self.size_after
    }
}
