//! SQLite row store connector.
//!
//! Every mutation runs inside a caller-owned [`Transaction`]; dropping the
//! transaction without committing rolls the mutation back.

mod convert;

use std::{
    fs,
    path::{Path, PathBuf},
};

use rusqlite::{
    types::{Value, ValueRef},
    Connection, OpenFlags, Transaction,
};

pub use self::convert::rows_to_batch;
use crate::{error::CompactError, option::ROW_ID_COLUMN, table::TableName};

/// Rows pulled out of a table, rowid first, in store column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ExtractedRows {
    /// Column names; the first is always the rowid column.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row values, each row aligned with [`ExtractedRows::columns`].
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were extracted.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Handle on the SQLite store being compacted.
#[derive(Debug)]
pub struct RowStore {
    conn: Connection,
    path: PathBuf,
}

impl RowStore {
    /// Open an existing store at `path`.
    ///
    /// The file must already exist and be a readable SQLite database;
    /// otherwise [`CompactError::StoreUnavailable`] is returned. Foreign key
    /// constraints are enforced on the returned connection.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CompactError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |source| CompactError::StoreUnavailable {
            path: path.clone(),
            source,
        };
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&path, flags).map_err(unavailable)?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(unavailable)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")
            .map_err(unavailable)?;
        Ok(Self { conn, path })
    }

    /// Location of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared access to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start a transaction scope.
    pub fn transaction(&mut self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.transaction()
    }

    /// Live row count of `table`.
    pub fn count_rows(&self, table: &TableName) -> rusqlite::Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Size of the store file in bytes, or zero if it cannot be read.
    pub fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map(|meta| meta.len()).unwrap_or(0)
    }

    /// Return pages freed by deleted rows to the filesystem.
    ///
    /// Blocks until the rebuild finishes; must not run while a transaction is open.
    pub fn reclaim(&self) -> Result<(), CompactError> {
        self.conn
            .execute_batch("VACUUM")
            .map_err(CompactError::Reclaim)
    }
}

/// Delete every row of `table` and return what was deleted.
///
/// Selection and removal happen in one `DELETE … RETURNING` statement, so no
/// row can slip in between reading and deleting. Nothing is durable until
/// the enclosing transaction commits.
pub fn extract_rows(conn: &Connection, table: &TableName) -> rusqlite::Result<ExtractedRows> {
    let sql = format!(
        "DELETE FROM {} RETURNING rowid AS {}, *",
        table.quoted(),
        crate::table::quote_identifier(ROW_ID_COLUMN)
    );
    collect_rows(conn, &sql)
}

/// Read every row of `table` without removing it.
pub fn select_rows(conn: &Connection, table: &TableName) -> rusqlite::Result<ExtractedRows> {
    let sql = format!(
        "SELECT rowid AS {}, * FROM {}",
        crate::table::quote_identifier(ROW_ID_COLUMN),
        table.quoted()
    );
    collect_rows(conn, &sql)
}

/// Delete the rows of `table` whose rowid is in `row_ids`, returning how many went.
pub fn delete_row_ids(
    conn: &Connection,
    table: &TableName,
    row_ids: &[i64],
) -> rusqlite::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE rowid = ?1", table.quoted());
    let mut stmt = conn.prepare(&sql)?;
    let mut deleted = 0;
    for row_id in row_ids {
        deleted += stmt.execute([row_id])?;
    }
    Ok(deleted)
}

fn collect_rows(conn: &Connection, sql: &str) -> rusqlite::Result<ExtractedRows> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for idx in 0..width {
            values.push(owned_value(row.get_ref(idx)?));
        }
        rows.push(values);
    }
    Ok(ExtractedRows { columns, rows })
}

/// TEXT that is not valid UTF-8 is kept as its raw bytes.
fn owned_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::Integer(int),
        ValueRef::Real(real) => Value::Real(real),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_owned()),
            Err(_) => Value::Blob(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::{types::Value, Connection};
    use tempfile::TempDir;

    use super::{delete_row_ids, extract_rows, select_rows, RowStore};
    use crate::{error::CompactError, table::TableName};

    fn seeded_store(dir: &TempDir, rows: i64) -> RowStore {
        let path = dir.path().join("store.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE events (kind TEXT, value REAL)")
            .unwrap();
        for i in 0..rows {
            conn.execute(
                "INSERT INTO events (kind, value) VALUES (?1, ?2)",
                rusqlite::params![format!("k{i}"), i as f64 / 2.0],
            )
            .unwrap();
        }
        drop(conn);
        RowStore::open(&path).unwrap()
    }

    #[test]
    fn missing_store_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = RowStore::open(dir.path().join("absent.db")).unwrap_err();
        assert!(matches!(err, CompactError::StoreUnavailable { .. }));
        assert!(!dir.path().join("absent.db").exists());
    }

    #[test]
    fn garbage_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();
        assert!(matches!(
            RowStore::open(&path),
            Err(CompactError::StoreUnavailable { .. })
        ));
    }

    #[test]
    fn extraction_is_undone_when_the_transaction_is_dropped() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir, 5);
        let events = TableName::new("events").unwrap();

        {
            let tx = store.transaction().unwrap();
            let rows = extract_rows(&tx, &events).unwrap();
            assert_eq!(rows.len(), 5);
            assert_eq!(rows.columns(), ["_compacter_row_id", "kind", "value"]);
            assert_eq!(store_count(&tx), 0);
        }

        assert_eq!(store.count_rows(&events).unwrap(), 5);
    }

    #[test]
    fn committed_extraction_empties_the_table() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir, 3);
        let events = TableName::new("events").unwrap();

        let tx = store.transaction().unwrap();
        let mut rows = extract_rows(&tx, &events).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.count_rows(&events).unwrap(), 0);
        rows.rows.sort_by_key(|row| match row[0] {
            Value::Integer(id) => id,
            _ => i64::MAX,
        });
        assert_eq!(rows.rows()[0][1], Value::Text("k0".into()));
        assert_eq!(rows.rows()[2][2], Value::Real(1.0));
    }

    #[test]
    fn delete_by_row_id_only_touches_listed_rows() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir, 4);
        let events = TableName::new("events").unwrap();

        let tx = store.transaction().unwrap();
        let snapshot = select_rows(&tx, &events).unwrap();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(delete_row_ids(&tx, &events, &[1, 3, 99]).unwrap(), 2);
        tx.commit().unwrap();

        assert_eq!(store.count_rows(&events).unwrap(), 2);
    }

    #[test]
    fn text_that_is_not_utf8_comes_back_as_bytes() {
        let dir = TempDir::new().unwrap();
        let mut store = seeded_store(&dir, 0);
        store
            .conn
            .execute_batch(
                "INSERT INTO events (kind, value) VALUES ('ok', 1.0), (CAST(x'ff00fe' AS TEXT), 2.0)",
            )
            .unwrap();
        let events = TableName::new("events").unwrap();

        let tx = store.transaction().unwrap();
        let mut rows = extract_rows(&tx, &events).unwrap();
        tx.commit().unwrap();

        rows.rows.sort_by_key(|row| match row[2] {
            Value::Real(value) => value as i64,
            _ => i64::MAX,
        });
        assert_eq!(rows.rows()[0][1], Value::Text("ok".into()));
        assert_eq!(rows.rows()[1][1], Value::Blob(vec![0xff, 0x00, 0xfe]));
        assert_eq!(store.count_rows(&events).unwrap(), 0);
    }

    #[test]
    fn counting_an_unknown_table_fails() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir, 1);
        let missing = TableName::new("missing").unwrap();
        assert!(store.count_rows(&missing).is_err());
    }

    fn store_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap()
    }
}
