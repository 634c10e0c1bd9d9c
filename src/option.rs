use std::path::{Path, PathBuf};

use crate::{
    archive::ArchiveCompression, compaction::CompactionStrategy, error::CompactError, id::RunId,
    table::TableName,
};

/// Default number of rows a table must hold before it is compacted.
pub const DEFAULT_MIN_ROWS_TO_COMPACT: u64 = 100_000;
/// Default Parquet row group size.
pub const DEFAULT_ROW_GROUP_SIZE: usize = 100_000;
/// Default name of the provenance ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "compactions";
/// Name of the archive column holding the source rowid.
pub const ROW_ID_COLUMN: &str = "_compacter_row_id";

const ARCHIVE_EXTENSION: &str = "parquet";
const TEMP_SUFFIX: &str = "tmp";

/// Configuration for one [`Compactor`](crate::Compactor).
#[derive(Debug, Clone)]
pub struct CompactorOptions {
    pub(crate) store_path: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) tables: Vec<String>,
    pub(crate) min_rows_to_compact: u64,
    pub(crate) strategy: CompactionStrategy,
    pub(crate) compression: ArchiveCompression,
    pub(crate) row_group_size: usize,
    pub(crate) ledger_table: String,
}

impl CompactorOptions {
    /// Options for compacting `store_path` into archives under `output_dir`.
    pub fn new(store_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        CompactorOptions {
            store_path: store_path.into(),
            output_dir: output_dir.into(),
            tables: Vec::new(),
            min_rows_to_compact: DEFAULT_MIN_ROWS_TO_COMPACT,
            strategy: CompactionStrategy::default(),
            compression: ArchiveCompression::default(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }

    /// Tables to consider for compaction, in processing order.
    pub fn tables<I, S>(self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CompactorOptions {
            tables: tables.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    /// Rows a table must hold before it is compacted.
    pub fn min_rows_to_compact(self, min_rows_to_compact: u64) -> Self {
        CompactorOptions {
            min_rows_to_compact,
            ..self
        }
    }

    /// Backend used for the atomic extract-archive-record protocol.
    pub fn strategy(self, strategy: CompactionStrategy) -> Self {
        CompactorOptions { strategy, ..self }
    }

    /// Block compression applied to archive pages.
    pub fn compression(self, compression: ArchiveCompression) -> Self {
        CompactorOptions {
            compression,
            ..self
        }
    }

    /// Maximum rows per Parquet row group.
    pub fn row_group_size(self, row_group_size: usize) -> Self {
        CompactorOptions {
            row_group_size: row_group_size.max(1),
            ..self
        }
    }

    /// Name of the provenance ledger table.
    pub fn ledger_table(self, ledger_table: impl Into<String>) -> Self {
        CompactorOptions {
            ledger_table: ledger_table.into(),
            ..self
        }
    }
}

impl CompactorOptions {
    /// Location of the SQLite store.
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Root directory for archives.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Configured `min_rows_to_compact`.
    pub fn threshold(&self) -> u64 {
        self.min_rows_to_compact
    }

    /// Validate and de-duplicate the requested tables, keeping request order.
    ///
    /// Names that differ only in ASCII case name the same table; the first
    /// spelling wins.
    pub(crate) fn table_names(&self) -> Result<Vec<TableName>, CompactError> {
        let ledger = self.ledger_name()?;
        let mut names: Vec<TableName> = Vec::with_capacity(self.tables.len());
        for raw in &self.tables {
            let name = TableName::new(raw.as_str())?;
            if name.as_str().eq_ignore_ascii_case(ledger.as_str()) {
                return Err(CompactError::LedgerNotCompactable(name.to_string()));
            }
            let seen = names
                .iter()
                .any(|kept| kept.as_str().eq_ignore_ascii_case(name.as_str()));
            if !seen {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub(crate) fn ledger_name(&self) -> Result<TableName, CompactError> {
        TableName::new(self.ledger_table.as_str())
    }

    pub(crate) fn table_dir(&self, table: &TableName) -> PathBuf {
        self.output_dir.join(table.as_str())
    }

    pub(crate) fn archive_path(&self, table: &TableName, run_id: &RunId) -> PathBuf {
        self.table_dir(table).join(archive_file_name(table, run_id))
    }
}

/// File name of the archive holding `table`'s rows for `run_id`.
pub fn archive_file_name(table: &TableName, run_id: &RunId) -> String {
    format!("{}-{}.{}", table, run_id, ARCHIVE_EXTENSION)
}

/// Sibling path a partially written archive lives at before it is published.
pub(crate) fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(TEMP_SUFFIX);
    final_path.with_file_name(name)
}

/// Whether `path` names a published archive rather than a leftover temp file.
pub fn is_archive_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{is_archive_path, temp_path_for, CompactorOptions};
    use crate::{error::CompactError, id::RunIdGenerator, table::TableName};

    #[test]
    fn archive_paths_are_scoped_by_table_and_run() {
        let options = CompactorOptions::new("/data/app.db", "/archive");
        let table = TableName::new("events").unwrap();
        let run = RunIdGenerator::new().generate().unwrap();

        let path = options.archive_path(&table, &run);
        assert_eq!(
            path,
            Path::new("/archive/events").join(format!("events-{run}.parquet"))
        );
        assert!(is_archive_path(&path));

        let temp = temp_path_for(&path);
        assert_eq!(temp.parent(), path.parent());
        assert!(temp.to_string_lossy().ends_with(".parquet.tmp"));
        assert!(!is_archive_path(&temp));
    }

    #[test]
    fn table_names_are_deduplicated_in_request_order() {
        let options =
            CompactorOptions::new("a.db", "out").tables(["sessions", "events", "sessions"]);
        let names: Vec<String> = options
            .table_names()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["sessions", "events"]);
    }

    #[test]
    fn table_names_differing_in_case_are_one_table() {
        let options = CompactorOptions::new("a.db", "out").tables(["Events", "events", "EVENTS"]);
        let names: Vec<String> = options
            .table_names()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["Events"]);
    }

    #[test]
    fn ledger_table_cannot_be_compacted() {
        let options = CompactorOptions::new("a.db", "out").tables(["events", "Compactions"]);
        assert!(matches!(
            options.table_names(),
            Err(CompactError::LedgerNotCompactable(_))
        ));
    }

    #[test]
    fn defaults_match_documented_values() {
        let options = CompactorOptions::new("a.db", "out");
        assert_eq!(options.threshold(), 100_000);
        assert_eq!(options.row_group_size, 100_000);
        assert_eq!(options.ledger_table, "compactions");
    }
}
