//! Sink writer: persists a [`CanonicalTable`] as CSV.
//!
//! Serialization goes through a [`TableSink`] into a temporary file next to the
//! destination, which is renamed over the destination only once the sink has
//! finished. A failing sink leaves the destination untouched and the temporary
//! file is removed when it drops.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, error, info};

use crate::contract::TableSink;
use crate::error::WriteError;
use crate::table::CanonicalTable;

/// CSV with a header row. Cells use [`crate::table::Value::render`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSink;

impl TableSink for CsvSink {
    fn write_to(
        &self,
        table: &CanonicalTable,
        out: &mut dyn Write,
        path: &Path,
    ) -> Result<(), WriteError> {
        let csv_error = |source| WriteError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::Writer::from_writer(out);
        writer
            .write_record(table.column_names())
            .map_err(csv_error)?;
        for index in 0..table.row_count() {
            let cells = table
                .columns()
                .iter()
                .map(|column| column.values[index].render());
            writer.write_record(cells).map_err(csv_error)?;
        }
        writer.flush().map_err(|source| WriteError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// What an atomic write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lower-case hex SHA-256 of the file contents.
    pub sha256: String,
}

/// Write `table` to `destination` with the default [`CsvSink`].
pub fn write(table: &CanonicalTable, destination: &Path) -> Result<Written, WriteError> {
    write_atomic(&CsvSink, table, destination)
}

/// Serialize through `sink` into a sibling temp file, then rename it over
/// `destination`. Parent directories are created as needed.
pub fn write_atomic<S: TableSink + ?Sized>(
    sink: &S,
    table: &CanonicalTable,
    destination: &Path,
) -> Result<Written, WriteError> {
    let io_error = |source| WriteError::Io {
        path: destination.to_path_buf(),
        source,
    };

    let parent = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(io_error)?;

    let temp = NamedTempFile::new_in(&parent).map_err(io_error)?;
    debug!(temp = %temp.path().display(), destination = %destination.display(), "[WRITE] Staging output");

    let (bytes, sha256) = {
        let mut out = HashingWriter::new(BufWriter::new(temp.as_file()));
        if let Err(e) = sink.write_to(table, &mut out, destination) {
            error!(destination = %destination.display(), error = %e, "[WRITE] Sink failed, discarding staged output");
            return Err(e);
        }
        out.flush().map_err(io_error)?;
        out.finish()
    };
    temp.as_file().sync_all().map_err(io_error)?;

    temp.persist(destination).map_err(|e| {
        error!(destination = %destination.display(), error = %e.error, "[WRITE] Failed to replace destination");
        io_error(e.error)
    })?;

    info!(
        destination = %destination.display(),
        rows = table.row_count(),
        bytes,
        "[WRITE] Output written"
    );
    Ok(Written {
        path: destination.to_path_buf(),
        bytes,
        sha256,
    })
}

/// Counts and hashes every byte passed through to `inner`.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        (self.bytes, format!("{:x}", self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
