use std::{path::PathBuf, sync::Arc};

use super::{Script, ScriptError, Statement};
use crate::{
    archive::{self, ArchiveError, ArchiveFile, ArchiveWriter, ParquetArchiveWriter},
    error::CompactError,
    ledger::Ledger,
    observability::{log_debug, log_warn},
    store::{self, RowStore},
    table::TableName,
};

/// Result of one transactional block.
#[derive(Debug)]
pub struct BlockResult {
    /// Table the block compacted.
    pub table: TableName,
    /// Published archive, or why the block was rolled back.
    pub result: Result<ArchiveFile, CompactError>,
}

/// Per-block results of an executed script, in execution order.
#[derive(Debug, Default)]
pub struct ScriptReport {
    blocks: Vec<BlockResult>,
}

impl ScriptReport {
    /// Block results in execution order.
    pub fn blocks(&self) -> &[BlockResult] {
        &self.blocks
    }

    /// Consume the report, yielding the block results.
    pub fn into_blocks(self) -> Vec<BlockResult> {
        self.blocks
    }
}

/// Executes [`Script`]s against SQLite and Parquet.
///
/// Each transactional block runs on its own store transaction. Archives the
/// block exported are deleted again if the block does not commit, so a
/// failed block leaves neither rows removed, nor a ledger record, nor an
/// archive behind. A failed block does not stop later blocks.
#[derive(Clone, Default)]
pub struct ScriptRunner {
    writer: Option<Arc<dyn ArchiveWriter>>,
}

impl ScriptRunner {
    /// Runner that writes archives with the settings carried by each export.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `writer` for every export instead of the per-statement settings.
    pub fn with_writer(mut self, writer: Arc<dyn ArchiveWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Execute `script`.
    ///
    /// Errors in store setup are returned; errors inside a block are reported
    /// in that block's [`BlockResult`].
    pub fn execute(&self, script: &Script) -> Result<ScriptReport, CompactError> {
        let mut attached: Option<(String, RowStore)> = None;
        let mut report = ScriptReport::default();

        for statement in script.statements() {
            match statement {
                Statement::AttachStore { path, alias } => {
                    let store = RowStore::open(path)?;
                    log_debug!(
                        component = "script",
                        event = "store_attached",
                        path = %path.display(),
                        alias = %alias,
                    );
                    attached = Some((alias.clone(), store));
                }
                Statement::UseStore { alias } => match &attached {
                    Some((current, _)) if current == alias => {}
                    _ => return Err(ScriptError::UnknownAlias(alias.clone()).into()),
                },
                Statement::CreateLedger { ledger } => {
                    let (_, store) = attached
                        .as_ref()
                        .ok_or(ScriptError::NoStoreAttached(statement.kind()))?;
                    Ledger::new(ledger.clone())
                        .ensure_schema(store.connection())
                        .map_err(|source| CompactError::StoreUnavailable {
                            path: store.path().to_path_buf(),
                            source,
                        })?;
                }
                Statement::Transaction { table, body } => {
                    let (_, store) = attached
                        .as_mut()
                        .ok_or(ScriptError::NoStoreAttached(statement.kind()))?;
                    let result = self.run_block(store, table, body);
                    report.blocks.push(BlockResult {
                        table: table.clone(),
                        result,
                    });
                }
                other => return Err(ScriptError::OutsideTransaction(other.kind()).into()),
            }
        }

        Ok(report)
    }

    fn run_block(
        &self,
        row_store: &mut RowStore,
        table: &TableName,
        body: &[Statement],
    ) -> Result<ArchiveFile, CompactError> {
        let mut exported: Vec<PathBuf> = Vec::new();
        let result = self.apply_block(row_store, table, body, &mut exported);
        if result.is_err() {
            for path in &exported {
                archive::discard(path);
            }
            log_warn!(
                component = "script",
                event = "block_rolled_back",
                table = %table,
                discarded = exported.len(),
            );
        }
        result
    }

    fn apply_block(
        &self,
        row_store: &mut RowStore,
        table: &TableName,
        body: &[Statement],
        exported: &mut Vec<PathBuf>,
    ) -> Result<ArchiveFile, CompactError> {
        let tx = row_store.transaction()?;
        let mut archives: Vec<ArchiveFile> = Vec::new();

        for statement in body {
            match statement {
                Statement::InsertRecord { ledger, record } => {
                    if record.table_name != table.as_str() {
                        return Err(ScriptError::ForeignTable {
                            block: table.clone(),
                            statement: TableName::new(record.table_name.as_str())?,
                        }
                        .into());
                    }
                    Ledger::new(ledger.clone()).append(&tx, record)?;
                }
                Statement::ExportColumnar {
                    table: source,
                    path,
                    options,
                } => {
                    ensure_same_table(table, source)?;
                    let rows = store::select_rows(&tx, source)?;
                    if (rows.len() as u64) < options.min_rows {
                        return Err(CompactError::InsufficientRows {
                            rows: rows.len() as u64,
                            min: options.min_rows,
                        });
                    }
                    let batch = store::rows_to_batch(&rows).map_err(ArchiveError::from)?;
                    let archive = match &self.writer {
                        Some(writer) => archive::write_or_discard(&**writer, &batch, path),
                        None => archive::write_or_discard(
                            &ParquetArchiveWriter::new(options.compression)
                                .with_row_group_size(options.row_group_size),
                            &batch,
                            path,
                        ),
                    }?;
                    exported.push(path.clone());
                    archives.push(archive);
                }
                Statement::DeleteArchived {
                    table: source,
                    path,
                } => {
                    ensure_same_table(table, source)?;
                    let row_ids = archive::read_row_ids(path)?;
                    let deleted = store::delete_row_ids(&tx, source, &row_ids)?;
                    if deleted != row_ids.len() {
                        return Err(ScriptError::RowCountMismatch {
                            table: source.clone(),
                            archived: row_ids.len(),
                            deleted,
                        }
                        .into());
                    }
                }
                other => return Err(ScriptError::InsideTransaction(other.kind()).into()),
            }
        }

        if archives.len() != 1 {
            return Err(ScriptError::ArchiveCount {
                table: table.clone(),
                exported: archives.len(),
            }
            .into());
        }
        tx.commit()?;
        Ok(archives.remove(0))
    }
}

fn ensure_same_table(block: &TableName, statement: &TableName) -> Result<(), ScriptError> {
    if block == statement {
        Ok(())
    } else {
        Err(ScriptError::ForeignTable {
            block: block.clone(),
            statement: statement.clone(),
        })
    }
}
