//! Append-only provenance ledger stored alongside the source tables.
//!
//! One row per (run, table) compaction:
//! `(id TEXT, timestamp_ms INTEGER, file_name TEXT, table_name TEXT)`.
//! Appends happen on the caller's transaction so a record becomes durable in
//! the same commit that deletes the archived rows.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use crate::{error::CompactError, id::RunId, table::TableName};

/// One durable ledger entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompactionRecord {
    /// Run id the rows were moved by.
    pub id: String,
    /// Run start, milliseconds since the Unix epoch (UTC).
    pub timestamp_ms: i64,
    /// Archive file name, relative to the table's archive directory.
    pub file_name: String,
    /// Source table.
    pub table_name: String,
}

impl CompactionRecord {
    /// Record for `table`'s archive `file_name` written by `run_id`.
    pub fn new(
        run_id: &RunId,
        timestamp_ms: i64,
        file_name: impl Into<String>,
        table: &TableName,
    ) -> Self {
        Self {
            id: run_id.to_string(),
            timestamp_ms,
            file_name: file_name.into(),
            table_name: table.to_string(),
        }
    }

    /// Resolve the archive this record points at under `output_dir`.
    pub fn archive_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.table_name).join(&self.file_name)
    }
}

/// Handle on the ledger table.
#[derive(Clone, Debug)]
pub struct Ledger {
    table: TableName,
}

impl Ledger {
    /// Ledger stored in `table`.
    pub fn new(table: TableName) -> Self {
        Self { table }
    }

    /// Name of the ledger table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Create the ledger table if it does not exist yet.
    pub fn ensure_schema(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT, timestamp_ms INTEGER, file_name TEXT, \
             table_name TEXT)",
            self.table.quoted()
        ))
    }

    /// Append `record` on `conn`, which should be the transaction that also
    /// removes the archived rows.
    pub fn append(&self, conn: &Connection, record: &CompactionRecord) -> Result<(), CompactError> {
        let sql = format!(
            "INSERT INTO {} (id, timestamp_ms, file_name, table_name) VALUES (?1, ?2, ?3, ?4)",
            self.table.quoted()
        );
        conn.execute(
            &sql,
            params![
                record.id,
                record.timestamp_ms,
                record.file_name,
                record.table_name
            ],
        )
        .map(|_| ())
        .map_err(CompactError::LedgerWrite)
    }

    /// Every record, oldest run first, ties in append order.
    pub fn list(&self, conn: &Connection) -> rusqlite::Result<Vec<CompactionRecord>> {
        self.query(conn, None)
    }

    /// Records for one source table, ordered like [`Ledger::list`].
    pub fn list_for_table(
        &self,
        conn: &Connection,
        table: &TableName,
    ) -> rusqlite::Result<Vec<CompactionRecord>> {
        self.query(conn, Some(table))
    }

    fn query(
        &self,
        conn: &Connection,
        table: Option<&TableName>,
    ) -> rusqlite::Result<Vec<CompactionRecord>> {
        let sql = format!(
            "SELECT id, timestamp_ms, file_name, table_name FROM {} \
             WHERE ?1 IS NULL OR table_name = ?1 ORDER BY timestamp_ms, rowid",
            self.table.quoted()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([table.map(TableName::as_str)], |row| {
            Ok(CompactionRecord {
                id: row.get(0)?,
                timestamp_ms: row.get(1)?,
                file_name: row.get(2)?,
                table_name: row.get(3)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rusqlite::Connection;

    use super::{CompactionRecord, Ledger};
    use crate::{id::RunIdGenerator, table::TableName};

    fn ledger() -> (Connection, Ledger) {
        let conn = Connection::open_in_memory().unwrap();
        let ledger = Ledger::new(TableName::new("compactions").unwrap());
        ledger.ensure_schema(&conn).unwrap();
        (conn, ledger)
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let (conn, ledger) = ledger();
        ledger.ensure_schema(&conn).unwrap();
        assert!(ledger.list(&conn).unwrap().is_empty());
    }

    #[test]
    fn appended_records_are_listed_in_order() {
        let (conn, ledger) = ledger();
        let ids = RunIdGenerator::new();
        let events = TableName::new("events").unwrap();
        let sessions = TableName::new("sessions").unwrap();

        let first = CompactionRecord::new(&ids.generate().unwrap(), 10, "a.parquet", &events);
        let second = CompactionRecord::new(&ids.generate().unwrap(), 20, "b.parquet", &sessions);
        let third = CompactionRecord::new(&ids.generate().unwrap(), 30, "c.parquet", &events);
        for record in [&first, &second, &third] {
            ledger.append(&conn, record).unwrap();
        }

        assert_eq!(
            ledger.list(&conn).unwrap(),
            vec![first.clone(), second, third.clone()]
        );
        assert_eq!(
            ledger.list_for_table(&conn, &events).unwrap(),
            vec![first, third]
        );
    }

    #[test]
    fn append_rolls_back_with_its_transaction() {
        let (mut conn, ledger) = ledger();
        let run = RunIdGenerator::new().generate().unwrap();
        let events = TableName::new("events").unwrap();
        {
            let tx = conn.transaction().unwrap();
            ledger
                .append(&tx, &CompactionRecord::new(&run, 1, "x.parquet", &events))
                .unwrap();
        }
        assert!(ledger.list(&conn).unwrap().is_empty());
    }

    #[test]
    fn record_resolves_to_table_directory() {
        let run = RunIdGenerator::new().generate().unwrap();
        let events = TableName::new("events").unwrap();
        let record = CompactionRecord::new(&run, 1, "events-x.parquet", &events);
        assert_eq!(
            record.archive_path(Path::new("/out")),
            Path::new("/out/events/events-x.parquet")
        );
    }
}
