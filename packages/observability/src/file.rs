//! Append-only JSONL log file.
//!
//! Each line is flushed as soon as it is written so a crash loses at most
//! the line in progress, and several processes can share one file.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to the open log file.
#[derive(Clone)]
pub struct LogFileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
}

impl LogFileWriter {
    /// Open `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::with_capacity(8192, file))),
        })
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.inner.lock();
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // One lock for the whole line keeps lines from interleaving
        let mut file = self.inner.lock();
        file.write_all(buf)?;
        file.flush()
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// Hands out clones of a [`LogFileWriter`] to tracing layers.
#[derive(Clone)]
pub struct WriterFactory {
    writer: LogFileWriter,
}

impl WriterFactory {
    pub fn new(writer: LogFileWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for WriterFactory {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}
