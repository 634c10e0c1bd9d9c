use std::sync::Arc;

use super::{CompactionBackend, EligibleTable, RunContext, TableResult};
use crate::{
    archive::{self, ArchiveError, ArchiveFile, ArchiveWriter},
    error::CompactError,
    ledger::CompactionRecord,
    observability::{log_debug, log_warn},
    store::{self, RowStore},
    table::TableName,
};

/// Transaction-then-rename backend.
///
/// Per table: open a store transaction, delete and return every row, write
/// the archive to a temporary sibling and rename it into place, append the
/// ledger record on the same transaction, then commit. Any failure rolls the
/// transaction back; a published archive whose commit failed is removed again.
#[derive(Clone)]
pub struct RenameBackend {
    writer: Arc<dyn ArchiveWriter>,
}

impl RenameBackend {
    /// Backend publishing archives through `writer`.
    pub fn new(writer: Arc<dyn ArchiveWriter>) -> Self {
        Self { writer }
    }

    fn compact_table(
        &self,
        row_store: &mut RowStore,
        run: &RunContext<'_>,
        table: &TableName,
    ) -> Result<ArchiveFile, CompactError> {
        let tx = row_store.transaction()?;
        let rows = store::extract_rows(&tx, table)?;
        let min = run.options.min_rows_to_compact;
        if (rows.len() as u64) < min {
            return Err(CompactError::InsufficientRows {
                rows: rows.len() as u64,
                min,
            });
        }

        let batch = store::rows_to_batch(&rows).map_err(ArchiveError::from)?;
        let destination = run.options.archive_path(table, &run.run_id);
        let archive = archive::write_or_discard(&*self.writer, &batch, &destination)?;

        let record =
            CompactionRecord::new(&run.run_id, run.timestamp_ms, archive.file_name(), table);
        if let Err(error) = run.ledger.append(&tx, &record) {
            drop(tx);
            unpublish(table, &archive);
            return Err(error);
        }
        if let Err(error) = tx.commit() {
            unpublish(table, &archive);
            return Err(error.into());
        }

        log_debug!(
            component = "compaction",
            event = "table_committed",
            table = %table,
            rows = archive.rows(),
            path = %archive.path().display(),
        );
        Ok(archive)
    }
}

fn unpublish(table: &TableName, archive: &ArchiveFile) {
    log_warn!(
        component = "compaction",
        event = "archive_unpublished",
        table = %table,
        path = %archive.path().display(),
    );
    archive::discard(archive.path());
}

impl CompactionBackend for RenameBackend {
    fn compact(
        &self,
        store: &mut RowStore,
        run: &RunContext<'_>,
        tables: &[EligibleTable],
    ) -> Result<Vec<TableResult>, CompactError> {
        Ok(tables
            .iter()
            .map(|table| {
                let result = self.compact_table(store, run, &table.name);
                (table.name.clone(), result)
            })
            .collect())
    }
}
