//! Persistent packet log.
//!
//! The log is a flat file: the raw concatenation of every packet received,
//! terminators included. There is no header and no record index. Access is
//! strictly sequential (one connection at a time), so append-then-read is
//! never interleaved with another writer.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Handle to the on-disk packet log.
#[derive(Debug, Clone)]
pub struct PacketLog {
    path: PathBuf,
}

impl PacketLog {
    /// Create a handle for the log at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the log for appending, creating it if needed.
    pub fn open_writer(&self) -> io::Result<LogWriter> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        Ok(LogWriter { file })
    }

    /// Stream the whole log into `out` through a fresh read handle.
    ///
    /// `out` is flushed once the full contents are written. Returns the
    /// number of bytes sent.
    pub fn stream_to<W: Write>(&self, out: &mut W) -> io::Result<u64> {
        let mut file = File::open(&self.path)?;
        let sent = io::copy(&mut file, out)?;
        out.flush()?;
        trace!(bytes = sent, "Streamed packet log");
        Ok(sent)
    }

    /// Delete the log file.
    ///
    /// Returns `Ok(false)` if there was nothing to delete.
    pub fn remove(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed packet log");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Append handle held for the lifetime of one connection.
#[derive(Debug)]
pub struct LogWriter {
    file: File,
}

impl LogWriter {
    /// Append one packet and sync it to disk before returning.
    pub fn append(&mut self, packet: &[u8]) -> io::Result<()> {
        self.file.write_all(packet)?;
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("packets"));

        let mut writer = log.open_writer().unwrap();
        writer.append(b"hello\n").unwrap();

        let mut out = Vec::new();
        assert_eq!(log.stream_to(&mut out).unwrap(), 6);
        assert_eq!(out, b"hello\n");

        writer.append(b"world\n").unwrap();
        out.clear();
        log.stream_to(&mut out).unwrap();
        assert_eq!(out, b"hello\nworld\n");
    }

    #[test]
    fn test_append_on_disk_before_writer_closes() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("packets"));

        let mut writer = log.open_writer().unwrap();
        writer.append(b"one\n").unwrap();
        writer.append(b"\n").unwrap();
        assert_eq!(std::fs::read(log.path()).unwrap(), b"one\n\n");
        drop(writer);
    }

    #[test]
    fn test_writers_share_one_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("packets"));

        log.open_writer().unwrap().append(b"first\n").unwrap();
        log.open_writer().unwrap().append(b"second\n").unwrap();

        let contents = std::fs::read(log.path()).unwrap();
        assert_eq!(contents, b"first\nsecond\n");
    }

    #[test]
    fn test_open_writer_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("packets"));
        assert!(!log.path().exists());

        let _writer = log.open_writer().unwrap();
        assert_eq!(std::fs::metadata(log.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_open_writer_fails_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("missing").join("packets"));
        assert!(log.open_writer().is_err());
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let log = PacketLog::new(dir.path().join("packets"));

        assert!(!log.remove().unwrap());
        log.open_writer().unwrap().append(b"x\n").unwrap();
        assert!(log.remove().unwrap());
        assert!(!log.path().exists());
        assert!(!log.remove().unwrap());
    }
}
