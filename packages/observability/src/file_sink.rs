//! Append-only JSONL file sink.
//!
//! Several processes may log into the same file, so every write is flushed
//! immediately and the file is opened in append mode.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

/// Shared handle to an open JSONL log file.
#[derive(Clone)]
pub struct JsonlFileWriter {
    inner: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
}

impl JsonlFileWriter {
    /// Open (creating parents if needed) `path` in append mode.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(BufWriter::new(file))),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Write for JsonlFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self.inner.lock();
        let written = file.write(buf)?;
        file.flush()?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().flush()
    }
}

/// Hands out clones of one [`JsonlFileWriter`] to tracing layers.
#[derive(Clone)]
pub struct JsonlMakeWriter {
    writer: JsonlFileWriter,
}

impl JsonlMakeWriter {
    pub fn new(writer: JsonlFileWriter) -> Self {
        Self { writer }
    }
}

impl<'a> MakeWriter<'a> for JsonlMakeWriter {
    type Writer = JsonlFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.writer.clone()
    }
}
