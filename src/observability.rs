//! Logging infrastructure for strata.
//!
//! strata uses `tracing` for structured logging. All events use target
//! "strata" and include an `event` field for filtering.
//!
//! ## Library Integration
//!
//! strata never initializes a global subscriber. Applications configure
//! tracing via `tracing_subscriber` or similar. The orchestrator reports its
//! progress through an injected [`EventSink`]; [`TracingSink`] forwards those
//! events to `tracing`.
//!
//! ## Conventions
//!
//! - `event`: snake_case event name (required)
//! - `component`: module/subsystem (e.g., "archive", "ledger")
//! - Use `%` for Display, `?` for Debug formatting

use std::path::Path;

use crate::{archive::ArchiveFile, error::CompactError, id::RunId, table::TableName};

/// Target for all strata log events.
pub(crate) const STRATA_TARGET: &str = "strata";

/// Macro for info-level log events.
///
/// # Example
/// ```ignore
/// log_info!(
///     component = "archive",
///     event = "archive_committed",
///     path = %path.display(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::STRATA_TARGET, $($field)*)
    };
}

/// Macro for debug-level log events.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::STRATA_TARGET, $($field)*)
    };
}

/// Macro for warn-level log events.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::STRATA_TARGET, $($field)*)
    };
}

/// Macro for error-level log events.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::STRATA_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;

/// Progress events emitted by the orchestrator during one run.
#[derive(Debug)]
pub enum CompactionEvent<'a> {
    /// A run has been assigned an id and is about to inspect tables.
    RunStarted {
        /// Identifier of the run.
        run_id: &'a RunId,
        /// Number of distinct tables requested.
        tables: usize,
    },
    /// A table was left untouched because it holds too few rows.
    TableSkipped {
        /// Table that was skipped.
        table: &'a TableName,
        /// Row count observed.
        rows: u64,
        /// Configured threshold.
        min_rows: u64,
    },
    /// A table's rows were moved into an archive and recorded in the ledger.
    TableCompacted {
        /// Table that was compacted.
        table: &'a TableName,
        /// Archive that now holds the rows.
        archive: &'a ArchiveFile,
    },
    /// A table could not be compacted; its rows are unchanged.
    TableFailed {
        /// Table that failed.
        table: &'a TableName,
        /// Cause of the failure.
        error: &'a CompactError,
    },
    /// The store was vacuumed after every table was processed.
    Reclaimed {
        /// Store file size before the run, in bytes.
        before_bytes: u64,
        /// Store file size after vacuuming, in bytes.
        after_bytes: u64,
    },
    /// Vacuuming failed; compacted data remains valid.
    ReclaimFailed {
        /// Path of the store.
        store: &'a Path,
        /// Cause of the failure.
        error: &'a CompactError,
    },
}

impl CompactionEvent<'_> {
    /// Stable snake_case name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            CompactionEvent::RunStarted { .. } => "run_started",
            CompactionEvent::TableSkipped { .. } => "table_skipped",
            CompactionEvent::TableCompacted { .. } => "table_compacted",
            CompactionEvent::TableFailed { .. } => "table_failed",
            CompactionEvent::Reclaimed { .. } => "reclaimed",
            CompactionEvent::ReclaimFailed { .. } => "reclaim_failed",
        }
    }
}

/// Receiver for orchestrator progress events.
pub trait EventSink: Send + Sync {
    /// Observe one event. Implementations must not panic.
    fn emit(&self, event: &CompactionEvent<'_>);
}

/// [`EventSink`] that forwards every event to `tracing` under the "strata" target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

const MIB: f64 = 1024.0 * 1024.0;

impl EventSink for TracingSink {
    fn emit(&self, event: &CompactionEvent<'_>) {
        match event {
            CompactionEvent::RunStarted { run_id, tables } => log_info!(
                component = "compaction",
                event = event.name(),
                run_id = %run_id,
                tables = *tables,
            ),
            CompactionEvent::TableSkipped {
                table,
                rows,
                min_rows,
            } => log_info!(
                component = "compaction",
                event = event.name(),
                table = %table,
                rows = *rows,
                min_rows = *min_rows,
                "skipping table with too few rows to compact"
            ),
            CompactionEvent::TableCompacted { table, archive } => log_info!(
                component = "compaction",
                event = event.name(),
                table = %table,
                rows = archive.rows(),
                file = %archive.file_name(),
                bytes = archive.bytes(),
            ),
            CompactionEvent::TableFailed { table, error } => log_error!(
                component = "compaction",
                event = event.name(),
                table = %table,
                error = %error,
            ),
            CompactionEvent::Reclaimed {
                before_bytes,
                after_bytes,
            } => log_info!(
                component = "store",
                event = event.name(),
                before_mib = *before_bytes as f64 / MIB,
                after_mib = *after_bytes as f64 / MIB,
            ),
            CompactionEvent::ReclaimFailed { store, error } => log_warn!(
                component = "store",
                event = event.name(),
                store = %store.display(),
                error = %error,
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::{CompactionEvent, EventSink};

    /// Sink that remembers event names in order.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        names: Mutex<Vec<&'static str>>,
    }

    impl RecordingSink {
        pub(crate) fn names(&self) -> Vec<&'static str> {
            self.names.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &CompactionEvent<'_>) {
            self.names.lock().unwrap().push(event.name());
        }
    }
}
