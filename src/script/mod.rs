//! Composable compaction scripts.
//!
//! A [`Script`] is an ordered list of structured [`Statement`]s: store setup,
//! ledger creation, and one transactional block per table holding
//! {ledger insert, columnar export, row deletion}. Building a script does no
//! I/O. A script can be rendered to DuckDB SQL for review or executed by the
//! native [`ScriptRunner`], which binds every value as a parameter.

mod render;
mod runner;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

pub use self::runner::{BlockResult, ScriptReport, ScriptRunner};
use crate::{archive::ArchiveCompression, ledger::CompactionRecord, table::TableName};

/// Alias the source store is attached under.
pub const STORE_ALIAS: &str = "db";

/// One structured script operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// Attach the SQLite store at `path` under `alias`.
    AttachStore {
        /// Store location.
        path: PathBuf,
        /// Alias used by later statements.
        alias: String,
    },
    /// Make `alias` the default catalog.
    UseStore {
        /// Previously attached alias.
        alias: String,
    },
    /// Create the ledger table if it is absent.
    CreateLedger {
        /// Ledger table.
        ledger: TableName,
    },
    /// Run `body` atomically; a failure rolls back every statement in it.
    Transaction {
        /// Table the block compacts.
        table: TableName,
        /// Statements inside the block.
        body: Vec<Statement>,
    },
    /// Append a provenance record.
    InsertRecord {
        /// Ledger table.
        ledger: TableName,
        /// Record to append.
        record: CompactionRecord,
    },
    /// Copy every row of `table`, rowid first, into an archive at `path`.
    ExportColumnar {
        /// Source table.
        table: TableName,
        /// Archive destination.
        path: PathBuf,
        /// Archive settings.
        options: ExportOptions,
    },
    /// Delete the rows of `table` whose rowids appear in the archive at `path`.
    DeleteArchived {
        /// Source table.
        table: TableName,
        /// Archive listing the rowids to delete.
        path: PathBuf,
    },
}

impl Statement {
    /// Short name of the statement kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::AttachStore { .. } => "attach_store",
            Statement::UseStore { .. } => "use_store",
            Statement::CreateLedger { .. } => "create_ledger",
            Statement::Transaction { .. } => "transaction",
            Statement::InsertRecord { .. } => "insert_record",
            Statement::ExportColumnar { .. } => "export_columnar",
            Statement::DeleteArchived { .. } => "delete_archived",
        }
    }
}

/// Settings for a columnar export.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportOptions {
    /// Page compression.
    pub compression: ArchiveCompression,
    /// Maximum rows per row group.
    pub row_group_size: usize,
    /// Abort the block if the table holds fewer rows than this at export time.
    pub min_rows: u64,
}

/// Immutable builder of a [`Script`].
///
/// Every method consumes the builder and returns the extended one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScriptBuilder {
    statements: Vec<Statement>,
}

impl ScriptBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the store at `path` and make it the default catalog.
    pub fn attach_store(self, path: impl Into<PathBuf>) -> Self {
        self.push(Statement::AttachStore {
            path: path.into(),
            alias: STORE_ALIAS.to_string(),
        })
        .push(Statement::UseStore {
            alias: STORE_ALIAS.to_string(),
        })
    }

    /// Create `ledger` if it is absent.
    pub fn create_ledger(self, ledger: TableName) -> Self {
        self.push(Statement::CreateLedger { ledger })
    }

    /// Wrap everything composed in `block` in one transaction for `table`.
    pub fn transaction(self, table: TableName, block: ScriptBuilder) -> Self {
        self.push(Statement::Transaction {
            table,
            body: block.statements,
        })
    }

    /// Append `record` to `ledger`.
    pub fn insert_record(self, ledger: TableName, record: CompactionRecord) -> Self {
        self.push(Statement::InsertRecord { ledger, record })
    }

    /// Export `table` into an archive at `path`.
    pub fn export_columnar(
        self,
        table: TableName,
        path: impl Into<PathBuf>,
        options: ExportOptions,
    ) -> Self {
        self.push(Statement::ExportColumnar {
            table,
            path: path.into(),
            options,
        })
    }

    /// Delete the rows of `table` recorded in the archive at `path`.
    pub fn delete_archived(self, table: TableName, path: impl Into<PathBuf>) -> Self {
        self.push(Statement::DeleteArchived {
            table,
            path: path.into(),
        })
    }

    /// Finish composing.
    pub fn build(self) -> Script {
        Script {
            statements: self.statements,
        }
    }

    fn push(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }
}

/// The canonical per-table block: ledger insert, export, then deletion.
pub fn compact_table(
    ledger: &TableName,
    record: CompactionRecord,
    table: &TableName,
    path: &Path,
    options: ExportOptions,
) -> ScriptBuilder {
    ScriptBuilder::new()
        .insert_record(ledger.clone(), record)
        .export_columnar(table.clone(), path, options)
        .delete_archived(table.clone(), path)
}

/// A composed, immutable script.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Script {
    statements: Vec<Statement>,
}

impl Script {
    /// Top-level statements in execution order.
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Tables with a transactional block, in execution order.
    pub fn tables(&self) -> Vec<&TableName> {
        self.statements
            .iter()
            .filter_map(|statement| match statement {
                Statement::Transaction { table, .. } => Some(table),
                _ => None,
            })
            .collect()
    }

    /// Render as DuckDB SQL, one statement per line.
    pub fn render_duckdb(&self) -> String {
        render::render(&self.statements).join("\n")
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_duckdb())
    }
}

/// Structural problems found while executing a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// A statement needed a store before any was attached.
    #[error("{0} requires an attached store")]
    NoStoreAttached(&'static str),
    /// `UseStore` named an alias that was never attached.
    #[error("store alias {0:?} was never attached")]
    UnknownAlias(String),
    /// A block-only statement appeared at the top level.
    #[error("{0} must run inside a transaction block")]
    OutsideTransaction(&'static str),
    /// A setup statement appeared inside a block.
    #[error("{0} is not allowed inside a transaction block")]
    InsideTransaction(&'static str),
    /// A block finished without exporting exactly one archive.
    #[error("transaction block for {table} exported {exported} archives, expected 1")]
    ArchiveCount {
        /// Table of the block.
        table: TableName,
        /// Archives exported.
        exported: usize,
    },
    /// A block's statement targeted a different table than the block.
    #[error("transaction block for {block} contains a statement for {statement}")]
    ForeignTable {
        /// Table of the block.
        block: TableName,
        /// Table named by the statement.
        statement: TableName,
    },
    /// The rows deleted did not match the rows archived.
    #[error("deleted {deleted} rows from {table} but the archive holds {archived}")]
    RowCountMismatch {
        /// Table rows were deleted from.
        table: TableName,
        /// Rows in the archive.
        archived: usize,
        /// Rows actually deleted.
        deleted: usize,
    },
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{compact_table, ExportOptions, ScriptBuilder, Statement};
    use crate::{
        archive::ArchiveCompression, id::RunIdGenerator, ledger::CompactionRecord,
        table::TableName,
    };

    fn export_options() -> ExportOptions {
        ExportOptions {
            compression: ArchiveCompression::Zstd,
            row_group_size: 100_000,
            min_rows: 10,
        }
    }

    #[test]
    fn builder_is_persistent() {
        let base = ScriptBuilder::new().attach_store("/data/app.db");
        let with_ledger = base
            .clone()
            .create_ledger(TableName::new("compactions").unwrap());

        assert_eq!(base.build().statements().len(), 2);
        assert_eq!(with_ledger.build().statements().len(), 3);
    }

    #[test]
    fn compact_table_orders_insert_export_delete() {
        let run = RunIdGenerator::new().generate().unwrap();
        let ledger = TableName::new("compactions").unwrap();
        let events = TableName::new("events").unwrap();
        let record = CompactionRecord::new(&run, 42, "events-x.parquet", &events);
        let path = Path::new("/out/events/events-x.parquet");

        let script = ScriptBuilder::new()
            .attach_store("/data/app.db")
            .create_ledger(ledger.clone())
            .transaction(
                events.clone(),
                compact_table(&ledger, record, &events, path, export_options()),
            )
            .build();

        assert_eq!(script.tables(), vec![&events]);
        let Statement::Transaction { body, .. } = &script.statements()[3] else {
            panic!("expected a transaction block");
        };
        let kinds: Vec<&str> = body.iter().map(Statement::kind).collect();
        assert_eq!(kinds, ["insert_record", "export_columnar", "delete_archived"]);
    }
}
