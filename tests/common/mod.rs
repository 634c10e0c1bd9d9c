//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::{
    fs,
    hash::Hasher,
    io::Write,
    path::{Path, PathBuf},
};

use arrow::{
    array::{Array, AsArray},
    datatypes::{Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use rusqlite::{params, Connection};
use strata::{
    archive::{read_archive, ArchiveError},
    option::{is_archive_path, ROW_ID_COLUMN},
    ArchiveFile, ArchiveWriter, CompactionRecord, Ledger, TableName,
};
use tempfile::TempDir;

const STRING_SIZE: usize = 24;
const PAYLOAD_SIZE: usize = 16;

/// Scratch store plus archive root, removed on drop.
pub struct Fixture {
    pub dir: TempDir,
    pub store: PathBuf,
    pub out: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("app.db");
        let out = dir.path().join("archive");
        Connection::open(&store).unwrap();
        Fixture { dir, store, out }
    }

    pub fn conn(&self) -> Connection {
        Connection::open(&self.store).unwrap()
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.out.join(table)
    }

    /// Create `table` and fill it with `rows` seeded rows, returning their CRC32.
    pub fn seed_events(&self, table: &str, rows: usize, seed: u64) -> u32 {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut hasher = crc32fast::Hasher::new();
        let mut conn = self.conn();
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (name TEXT, amount REAL, count INTEGER, payload BLOB)"
        ))
        .unwrap();

        let tx = conn.transaction().unwrap();
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {table} (name, amount, count, payload) VALUES (?1, ?2, ?3, ?4)"
                ))
                .unwrap();
            for _ in 0..rows {
                let row = EventRow::generate(&mut rng);
                row.crc_hash(&mut hasher);
                stmt.execute(params![row.name, row.amount, row.count, row.payload])
                    .unwrap();
            }
        }
        tx.commit().unwrap();
        hasher.finalize()
    }

    pub fn count(&self, table: &str) -> i64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
    }

    pub fn ledger(&self, name: &str) -> Vec<CompactionRecord> {
        let conn = self.conn();
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        if exists == 0 {
            return Vec::new();
        }
        Ledger::new(TableName::new(name).unwrap())
            .list(&conn)
            .unwrap()
    }

    /// Published archives of `table`, sorted by name.
    pub fn archives(&self, table: &str) -> Vec<PathBuf> {
        files_in(&self.table_dir(table))
            .into_iter()
            .filter(|path| is_archive_path(path))
            .collect()
    }
}

/// Every regular file in `dir`, sorted; empty if `dir` is missing.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub name: String,
    pub amount: f64,
    pub count: i64,
    pub payload: Vec<u8>,
}

impl EventRow {
    pub fn generate(rng: &mut fastrand::Rng) -> Self {
        EventRow {
            name: gen_string(rng, STRING_SIZE),
            amount: rng.f64() * 1_000.0,
            count: rng.i64(..),
            payload: (0..PAYLOAD_SIZE).map(|_| rng.u8(..)).collect(),
        }
    }

    pub fn crc_hash(&self, hasher: &mut crc32fast::Hasher) {
        hasher.write(self.name.as_bytes());
        hasher.write_u64(self.amount.to_bits());
        hasher.write_i64(self.count);
        hasher.write(&self.payload);
    }
}

fn gen_string(rng: &mut fastrand::Rng, len: usize) -> String {
    let charset = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| charset[rng.usize(0..charset.len())] as char)
        .collect()
}

/// Rows of an events archive ordered by source rowid.
pub fn archived_events(path: &Path) -> Vec<(i64, EventRow)> {
    let mut rows = Vec::new();
    for batch in read_archive(path).unwrap() {
        rows.extend(event_rows(&batch));
    }
    rows.sort_by_key(|(row_id, _)| *row_id);
    rows
}

fn event_rows(batch: &RecordBatch) -> Vec<(i64, EventRow)> {
    let column = |name: &str| batch.column_by_name(name).unwrap().clone();
    let row_ids = column(ROW_ID_COLUMN);
    let row_ids = row_ids.as_primitive::<Int64Type>();
    let names = column("name");
    let names = names.as_string::<i32>();
    let amounts = column("amount");
    let amounts = amounts.as_primitive::<Float64Type>();
    let counts = column("count");
    let counts = counts.as_primitive::<Int64Type>();
    let payloads = column("payload");
    let payloads = payloads.as_binary::<i32>();

    (0..batch.num_rows())
        .map(|i| {
            assert!(!names.is_null(i));
            (
                row_ids.value(i),
                EventRow {
                    name: names.value(i).to_string(),
                    amount: amounts.value(i),
                    count: counts.value(i),
                    payload: payloads.value(i).to_vec(),
                },
            )
        })
        .collect()
}

/// CRC32 over an archive's rows in source insertion order.
pub fn archive_crc(path: &Path) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for (_, row) in archived_events(path) {
        row.crc_hash(&mut hasher);
    }
    hasher.finalize()
}

/// Writer that fails before touching the filesystem.
pub struct FailingWriter;

impl ArchiveWriter for FailingWriter {
    fn write(&self, _batch: &RecordBatch, destination: &Path) -> Result<ArchiveFile, ArchiveError> {
        Err(ArchiveError::Io {
            path: destination.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "injected write failure"),
        })
    }
}

/// Writer that leaves a truncated temp file behind and then fails, as a
/// process killed mid-write would.
pub struct PartialTempWriter;

impl PartialTempWriter {
    pub fn temp_path(destination: &Path) -> PathBuf {
        let mut name = destination.file_name().unwrap().to_os_string();
        name.push(".tmp");
        destination.with_file_name(name)
    }
}

impl ArchiveWriter for PartialTempWriter {
    fn write(&self, _batch: &RecordBatch, destination: &Path) -> Result<ArchiveFile, ArchiveError> {
        let temp = Self::temp_path(destination);
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        let mut file = fs::File::create(&temp).unwrap();
        file.write_all(b"PAR1\x00\x00partial").unwrap();
        Err(ArchiveError::Io {
            path: temp,
            source: std::io::Error::new(std::io::ErrorKind::Other, "injected crash mid-write"),
        })
    }
}

/// Make every insert into `ledger` abort.
pub fn break_ledger(conn: &Connection, ledger: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {ledger} (id TEXT, timestamp_ms INTEGER, file_name TEXT, \
         table_name TEXT);
         CREATE TRIGGER {ledger}_readonly BEFORE INSERT ON {ledger} \
         BEGIN SELECT RAISE(ABORT, 'ledger is read-only'); END;"
    ))
    .unwrap();
}
