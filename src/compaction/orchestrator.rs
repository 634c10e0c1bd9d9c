use std::sync::Arc;

use super::{
    scripted, CompactionBackend, CompactionReport, CompactionStrategy, EligibleTable,
    RenameBackend, RunContext, ScriptBackend, TableOutcome,
};
use crate::{
    archive::{ArchiveWriter, ParquetArchiveWriter},
    error::CompactError,
    id::{RunId, RunIdGenerator},
    ledger::Ledger,
    observability::{CompactionEvent, EventSink, TracingSink},
    option::CompactorOptions,
    script::Script,
    store::RowStore,
    table::TableName,
};

/// Moves rows of the configured tables out of the store and into archives.
///
/// ```no_run
/// use strata::{Compactor, CompactorOptions};
///
/// let options = CompactorOptions::new("app.db", "archive")
///     .tables(["events", "sessions"])
///     .min_rows_to_compact(100_000);
/// let report = Compactor::new(options).compact()?;
/// for (table, outcome) in report.outcomes() {
///     println!("{table}: {outcome}");
/// }
/// # Ok::<(), strata::CompactError>(())
/// ```
pub struct Compactor {
    options: CompactorOptions,
    writer: Arc<dyn ArchiveWriter>,
    sink: Arc<dyn EventSink>,
    ids: RunIdGenerator,
}

impl Compactor {
    /// Compactor writing Parquet archives and logging through `tracing`.
    pub fn new(options: CompactorOptions) -> Self {
        let writer = ParquetArchiveWriter::new(options.compression)
            .with_row_group_size(options.row_group_size);
        Self {
            options,
            writer: Arc::new(writer),
            sink: Arc::new(TracingSink),
            ids: RunIdGenerator::new(),
        }
    }

    /// Replace the archive writer.
    pub fn with_writer(self, writer: Arc<dyn ArchiveWriter>) -> Self {
        Self { writer, ..self }
    }

    /// Replace the progress event sink.
    pub fn with_sink(self, sink: Arc<dyn EventSink>) -> Self {
        Self { sink, ..self }
    }

    /// Configuration of this compactor.
    pub fn options(&self) -> &CompactorOptions {
        &self.options
    }

    /// Run one compaction over every configured table.
    ///
    /// Per-table problems are reported as [`TableOutcome::Failed`] and do not
    /// stop other tables. `Err` is returned only when the run cannot start:
    /// invalid table names, an unavailable store, an uninitialisable ledger,
    /// or a run id that cannot be generated.
    pub fn compact(&self) -> Result<CompactionReport, CompactError> {
        let tables = self.options.table_names()?;
        let ledger = Ledger::new(self.options.ledger_name()?);
        let mut store = RowStore::open(self.options.store_path())?;
        let size_before = store.size_bytes();
        ledger
            .ensure_schema(store.connection())
            .map_err(|source| CompactError::StoreUnavailable {
                path: store.path().to_path_buf(),
                source,
            })?;

        let run_id = self.ids.generate()?;
        self.sink.emit(&CompactionEvent::RunStarted {
            run_id: &run_id,
            tables: tables.len(),
        });
        let run = RunContext {
            run_id,
            timestamp_ms: run_timestamp(&run_id),
            options: &self.options,
            ledger: &ledger,
        };

        let (eligible, mut settled) = self.select(&store, &tables);
        for (table, result) in self.backend().compact(&mut store, &run, &eligible)? {
            settled.push((table, TableOutcome::from(result)));
        }

        let mut outcomes = Vec::with_capacity(tables.len());
        for table in &tables {
            if let Some(index) = settled.iter().position(|(name, _)| name == table) {
                let entry = settled.swap_remove(index);
                self.emit_outcome(&entry.0, &entry.1);
                outcomes.push(entry);
            }
        }

        let reclaim_error = match store.reclaim() {
            Ok(()) => None,
            Err(error) => {
                self.sink.emit(&CompactionEvent::ReclaimFailed {
                    store: store.path(),
                    error: &error,
                });
                Some(error)
            }
        };
        let size_after = store.size_bytes();
        if reclaim_error.is_none() {
            self.sink.emit(&CompactionEvent::Reclaimed {
                before_bytes: size_before,
                after_bytes: size_after,
            });
        }

        Ok(CompactionReport {
            run_id,
            outcomes,
            reclaim_error,
            size_before,
            size_after,
        })
    }

    /// Work out what [`Compactor::compact`] would do without changing anything.
    ///
    /// The store is only read. The plan carries its own run id; a later
    /// `compact` generates a fresh one.
    pub fn plan(&self) -> Result<CompactionPlan, CompactError> {
        let tables = self.options.table_names()?;
        let ledger = Ledger::new(self.options.ledger_name()?);
        let store = RowStore::open(self.options.store_path())?;
        let run_id = self.ids.generate()?;
        let run = RunContext {
            run_id,
            timestamp_ms: run_timestamp(&run_id),
            options: &self.options,
            ledger: &ledger,
        };

        let (eligible, settled) = self.select(&store, &tables);
        let script = scripted::compose(&run, &eligible);
        Ok(CompactionPlan {
            run_id,
            eligible,
            settled,
            script,
        })
    }

    fn backend(&self) -> Box<dyn CompactionBackend> {
        match self.options.strategy {
            CompactionStrategy::Rename => Box::new(RenameBackend::new(self.writer.clone())),
            CompactionStrategy::Script => Box::new(ScriptBackend::new(self.writer.clone())),
        }
    }

    /// Split `tables` into those at or above the threshold and those already settled.
    fn select(
        &self,
        store: &RowStore,
        tables: &[TableName],
    ) -> (Vec<EligibleTable>, Vec<(TableName, TableOutcome)>) {
        let min = self.options.min_rows_to_compact;
        let mut eligible = Vec::new();
        let mut settled = Vec::new();
        for table in tables {
            match store.count_rows(table) {
                Ok(rows) if rows >= min => eligible.push(EligibleTable {
                    name: table.clone(),
                    rows,
                }),
                Ok(rows) => settled.push((table.clone(), TableOutcome::Skipped { rows })),
                Err(error) => settled.push((
                    table.clone(),
                    TableOutcome::Failed {
                        error: error.into(),
                    },
                )),
            }
        }
        (eligible, settled)
    }

    fn emit_outcome(&self, table: &TableName, outcome: &TableOutcome) {
        let event = match outcome {
            TableOutcome::Compacted { archive } => {
                CompactionEvent::TableCompacted { table, archive }
            }
            TableOutcome::Skipped { rows } => CompactionEvent::TableSkipped {
                table,
                rows: *rows,
                min_rows: self.options.min_rows_to_compact,
            },
            TableOutcome::Failed { error } => CompactionEvent::TableFailed { table, error },
        };
        self.sink.emit(&event);
    }
}

fn run_timestamp(run_id: &RunId) -> i64 {
    i64::try_from(run_id.timestamp_ms()).unwrap_or(i64::MAX)
}

/// Result of [`Compactor::plan`].
#[derive(Debug)]
pub struct CompactionPlan {
    run_id: RunId,
    eligible: Vec<EligibleTable>,
    settled: Vec<(TableName, TableOutcome)>,
    script: Script,
}

impl CompactionPlan {
    /// Run id the script was composed for.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Tables that would be compacted, in request order.
    pub fn eligible(&self) -> &[EligibleTable] {
        &self.eligible
    }

    /// Tables that would be skipped or could not be inspected.
    pub fn settled(&self) -> &[(TableName, TableOutcome)] {
        &self.settled
    }

    /// Script compacting the eligible tables.
    pub fn script(&self) -> &Script {
        &self.script
    }
}
