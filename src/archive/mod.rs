//! Immutable Parquet archives.
//!
//! An archive is first written to a `.tmp` sibling of its final path, synced,
//! and only then renamed into place. The rename is the publication point: a
//! reader that sees the final name always sees a complete file.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use arrow::{
    array::{Array, Int64Array},
    error::ArrowError,
    record_batch::RecordBatch,
};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter, ProjectionMask},
    basic::{Compression, GzipLevel, ZstdLevel},
    errors::ParquetError,
    file::properties::WriterProperties,
};
use thiserror::Error;

use crate::{
    observability::{log_debug, log_warn},
    option::{temp_path_for, DEFAULT_ROW_GROUP_SIZE, ROW_ID_COLUMN},
};

/// Errors raised while writing, publishing, or reading an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem operation on `path` failed.
    #[error("archive io error at {}: {source}", path.display())]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },
    /// The Parquet encoder or decoder failed.
    #[error("archive parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Arrow conversion failed.
    #[error("archive arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// A published archive already exists under the destination name.
    #[error("archive {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    /// The destination has no parent directory or file name.
    #[error("archive path {} is not a file path", .0.display())]
    InvalidPath(PathBuf),
    /// The archive does not carry the expected rowid column.
    #[error("archive {} has no usable {column} column", path.display())]
    MissingRowIds {
        /// Archive inspected.
        path: PathBuf,
        /// Column that was expected.
        column: &'static str,
    },
}

impl ArchiveError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Block compression applied to archive pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ArchiveCompression {
    /// Leave pages uncompressed.
    None,
    /// Snappy.
    Snappy,
    /// Gzip with the default level.
    Gzip,
    /// Zstd with the default level.
    #[default]
    Zstd,
}

impl ArchiveCompression {
    pub(crate) fn to_parquet(self) -> Compression {
        match self {
            ArchiveCompression::None => Compression::UNCOMPRESSED,
            ArchiveCompression::Snappy => Compression::SNAPPY,
            ArchiveCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ArchiveCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }

    /// Codec keyword understood by DuckDB's `COPY … (COMPRESSION …)`.
    pub fn keyword(self) -> &'static str {
        match self {
            ArchiveCompression::None => "UNCOMPRESSED",
            ArchiveCompression::Snappy => "SNAPPY",
            ArchiveCompression::Gzip => "GZIP",
            ArchiveCompression::Zstd => "ZSTD",
        }
    }
}

impl fmt::Display for ArchiveCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveCompression::None => "none",
            ArchiveCompression::Snappy => "snappy",
            ArchiveCompression::Gzip => "gzip",
            ArchiveCompression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

impl FromStr for ArchiveCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Ok(ArchiveCompression::None),
            "snappy" => Ok(ArchiveCompression::Snappy),
            "gzip" => Ok(ArchiveCompression::Gzip),
            "zstd" => Ok(ArchiveCompression::Zstd),
            other => Err(format!(
                "unknown compression {other:?}, expected one of none, snappy, gzip, zstd"
            )),
        }
    }
}

/// A published archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    path: PathBuf,
    file_name: String,
    rows: u64,
    bytes: u64,
}

impl ArchiveFile {
    /// Full path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name as recorded in the ledger.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Rows stored in the archive.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Size of the archive in bytes.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Writes a batch of rows to a new archive.
///
/// Implementations must either publish a complete file at `destination` and
/// return it, or return an error and leave nothing under `destination`.
pub trait ArchiveWriter: Send + Sync {
    /// Write `batch` and publish it at `destination`.
    fn write(&self, batch: &RecordBatch, destination: &Path) -> Result<ArchiveFile, ArchiveError>;
}

/// [`ArchiveWriter`] producing Parquet files through a temp-file-then-rename sequence.
#[derive(Clone, Debug)]
pub struct ParquetArchiveWriter {
    compression: ArchiveCompression,
    row_group_size: usize,
}

impl ParquetArchiveWriter {
    /// Writer using `compression` and the default row group size.
    pub fn new(compression: ArchiveCompression) -> Self {
        Self {
            compression,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    /// Cap rows per row group.
    pub fn with_row_group_size(mut self, row_group_size: usize) -> Self {
        self.row_group_size = row_group_size.max(1);
        self
    }

    fn properties(&self) -> WriterProperties {
        WriterProperties::builder()
            .set_compression(self.compression.to_parquet())
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    fn write_temp(&self, batch: &RecordBatch, temp: &Path) -> Result<u64, ArchiveError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp)
            .map_err(|err| ArchiveError::io(temp, err))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(self.properties()))?;
        writer.write(batch)?;
        let file = writer.into_inner()?;
        file.sync_all().map_err(|err| ArchiveError::io(temp, err))?;
        let bytes = file
            .metadata()
            .map_err(|err| ArchiveError::io(temp, err))?
            .len();
        Ok(bytes)
    }
}

impl Default for ParquetArchiveWriter {
    fn default() -> Self {
        Self::new(ArchiveCompression::default())
    }
}

impl ArchiveWriter for ParquetArchiveWriter {
    fn write(&self, batch: &RecordBatch, destination: &Path) -> Result<ArchiveFile, ArchiveError> {
        let (Some(dir), Some(file_name)) = (destination.parent(), destination.file_name()) else {
            return Err(ArchiveError::InvalidPath(destination.to_path_buf()));
        };
        if destination.exists() {
            return Err(ArchiveError::AlreadyExists(destination.to_path_buf()));
        }
        fs::create_dir_all(dir).map_err(|err| ArchiveError::io(dir, err))?;

        let temp = temp_path_for(destination);
        let bytes = match self.write_temp(batch, &temp) {
            Ok(bytes) => bytes,
            Err(err) => {
                discard(&temp);
                return Err(err);
            }
        };
        log_debug!(
            component = "archive",
            event = "archive_temp_written",
            path = %temp.display(),
            rows = batch.num_rows(),
            bytes,
        );

        if let Err(err) = fs::rename(&temp, destination) {
            discard(&temp);
            return Err(ArchiveError::io(destination, err));
        }
        sync_dir(dir);
        log_debug!(
            component = "archive",
            event = "archive_published",
            path = %destination.display(),
        );

        Ok(ArchiveFile {
            path: destination.to_path_buf(),
            file_name: file_name.to_string_lossy().into_owned(),
            rows: batch.num_rows() as u64,
            bytes,
        })
    }
}

/// Best-effort removal of an archive or temp file; failures are logged only.
pub(crate) fn discard(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => log_debug!(
            component = "archive",
            event = "archive_discarded",
            path = %path.display(),
        ),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log_warn!(
            component = "archive",
            event = "archive_discard_failed",
            path = %path.display(),
            error = %err,
        ),
    }
}

/// Run `writer` and remove its temp sibling of `destination` if it fails.
pub(crate) fn write_or_discard(
    writer: &dyn ArchiveWriter,
    batch: &RecordBatch,
    destination: &Path,
) -> Result<ArchiveFile, ArchiveError> {
    writer.write(batch, destination).inspect_err(|_| {
        discard(&temp_path_for(destination));
    })
}

// Makes the rename durable; not every platform can open a directory.
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        log_debug!(
            component = "archive",
            event = "archive_dir_sync_skipped",
            path = %dir.display(),
            error = %err,
        );
    }
}

/// Read every batch stored in the archive at `path`.
pub fn read_archive(path: &Path) -> Result<Vec<RecordBatch>, ArchiveError> {
    let file = File::open(path).map_err(|err| ArchiveError::io(path, err))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    reader
        .collect::<Result<Vec<_>, ArrowError>>()
        .map_err(ArchiveError::from)
}

/// Read the source rowids recorded in the archive at `path`.
pub fn read_row_ids(path: &Path) -> Result<Vec<i64>, ArchiveError> {
    let missing = || ArchiveError::MissingRowIds {
        path: path.to_path_buf(),
        column: ROW_ID_COLUMN,
    };
    let file = File::open(path).map_err(|err| ArchiveError::io(path, err))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let index = builder
        .schema()
        .index_of(ROW_ID_COLUMN)
        .map_err(|_| missing())?;
    let mask = ProjectionMask::roots(builder.parquet_schema(), [index]);
    let reader = builder.with_projection(mask).build()?;

    let mut ids = Vec::new();
    for batch in reader {
        let batch = batch?;
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(missing)?;
        if column.null_count() > 0 {
            return Err(missing());
        }
        ids.extend(column.values().iter().copied());
    }
    Ok(ids)
}
