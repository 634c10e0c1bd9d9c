use std::sync::Arc;

use super::{CompactionBackend, EligibleTable, RunContext, TableResult};
use crate::{
    archive::ArchiveWriter,
    error::CompactError,
    ledger::CompactionRecord,
    option::archive_file_name,
    script::{compact_table, ExportOptions, Script, ScriptBuilder, ScriptRunner},
    store::RowStore,
};

/// Backend that composes one [`Script`] for every eligible table and runs it.
///
/// The runner attaches the store by path on its own connection. Each table's
/// block commits or rolls back independently of the others.
#[derive(Clone)]
pub struct ScriptBackend {
    runner: ScriptRunner,
}

impl ScriptBackend {
    /// Backend exporting archives through `writer`.
    pub fn new(writer: Arc<dyn ArchiveWriter>) -> Self {
        Self {
            runner: ScriptRunner::new().with_writer(writer),
        }
    }
}

/// Compose the script that compacts `tables` for `run`.
pub(crate) fn compose(run: &RunContext<'_>, tables: &[EligibleTable]) -> Script {
    let options = run.options;
    let ledger = run.ledger.table();
    let export = ExportOptions {
        compression: options.compression,
        row_group_size: options.row_group_size,
        min_rows: options.min_rows_to_compact,
    };

    tables
        .iter()
        .fold(
            ScriptBuilder::new()
                .attach_store(options.store_path())
                .create_ledger(ledger.clone()),
            |script, table| {
                let record = CompactionRecord::new(
                    &run.run_id,
                    run.timestamp_ms,
                    archive_file_name(&table.name, &run.run_id),
                    &table.name,
                );
                let path = options.archive_path(&table.name, &run.run_id);
                script.transaction(
                    table.name.clone(),
                    compact_table(ledger, record, &table.name, &path, export),
                )
            },
        )
        .build()
}

impl CompactionBackend for ScriptBackend {
    fn compact(
        &self,
        _store: &mut RowStore,
        run: &RunContext<'_>,
        tables: &[EligibleTable],
    ) -> Result<Vec<TableResult>, CompactError> {
        let script = compose(run, tables);
        let report = self.runner.execute(&script)?;
        Ok(report
            .into_blocks()
            .into_iter()
            .map(|block| (block.table, block.result))
            .collect())
    }
}
