// ABOUTME: Output sink abstraction for received transfers, with file-backed
// ABOUTME: and diagnostic counting implementations used by the server binary

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;

/// Capability set a session needs from its output.
///
/// The factory binds a sink to a session-scoped staging name; `rename`
/// promotes the staging artifact to the stored name once the descriptor is
/// known, and `delete` discards it on timeout or failure. No other side
/// effects are observable.
pub trait StreamSink: Send {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn set_name(&mut self, name: String);
    fn rename(&mut self) -> io::Result<()>;
    fn delete(&mut self) -> io::Result<()>;
}

/// Factory handed to the session manager; invoked once per new session id.
pub type SinkFactory = Box<dyn Fn(u32) -> io::Result<Box<dyn StreamSink>> + Send + Sync>;

/// File-backed sink writing under `{session_id}.tmp` until renamed.
pub struct FileStream {
    directory: PathBuf,
    staging_path: PathBuf,
    file: Option<File>,
    stored_name: Option<String>,
}

impl FileStream {
    pub fn new(session_id: u32, directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        let staging_path = directory.join(format!("{session_id}.tmp"));
        let file = File::create(&staging_path)?;
        Ok(FileStream {
            directory,
            staging_path,
            file: Some(file),
            stored_name: None,
        })
    }
}

impl StreamSink for FileStream {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.write_all(data),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "staging file already closed",
            )),
        }
    }

    fn set_name(&mut self, name: String) {
        self.stored_name = Some(name);
    }

    fn rename(&mut self) -> io::Result<()> {
        let name = self.stored_name.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no stored name has been set")
        })?;
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.staging_path, self.directory.join(name))
    }

    fn delete(&mut self) -> io::Result<()> {
        self.file = None;
        match fs::remove_file(&self.staging_path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

/// Diagnostic sink that counts payload bytes instead of writing them.
pub struct DropStream {
    session_id: u32,
    bytes_discarded: u64,
    stored_name: Option<String>,
}

impl DropStream {
    pub fn new(session_id: u32) -> Self {
        DropStream {
            session_id,
            bytes_discarded: 0,
            stored_name: None,
        }
    }

    pub fn bytes_discarded(&self) -> u64 {
        self.bytes_discarded
    }
}

impl StreamSink for DropStream {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.bytes_discarded += data.len() as u64;
        Ok(())
    }

    fn set_name(&mut self, name: String) {
        self.stored_name = Some(name);
    }

    fn rename(&mut self) -> io::Result<()> {
        info!(
            session = self.session_id,
            bytes = self.bytes_discarded,
            name = self.stored_name.as_deref().unwrap_or(""),
            "transfer complete, payload discarded"
        );
        Ok(())
    }

    fn delete(&mut self) -> io::Result<()> {
        info!(
            session = self.session_id,
            bytes = self.bytes_discarded,
            "transfer abandoned"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("diode-stream-{tag}-{}", rand::random::<u32>()));
        fs::create_dir_all(&dir).expect("failed to create scratch dir");
        dir
    }

    #[test]
    fn rename_promotes_the_staging_file() {
        let dir = scratch_dir("rename");
        let mut sink = FileStream::new(7, &dir).unwrap();
        sink.write(b"payload").unwrap();
        sink.set_name("stored.bin".to_string());
        sink.rename().unwrap();

        assert!(!dir.join("7.tmp").exists());
        assert_eq!(fs::read(dir.join("stored.bin")).unwrap(), b"payload");
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn rename_without_a_stored_name_fails() {
        let dir = scratch_dir("noname");
        let mut sink = FileStream::new(8, &dir).unwrap();
        assert!(sink.rename().is_err());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn delete_removes_the_staging_file_idempotently() {
        let dir = scratch_dir("delete");
        let mut sink = FileStream::new(9, &dir).unwrap();
        sink.write(b"partial").unwrap();
        sink.delete().unwrap();
        assert!(!dir.join("9.tmp").exists());
        sink.delete().unwrap();

        assert!(sink.write(b"more").is_err());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn drop_stream_counts_instead_of_writing() {
        let mut sink = DropStream::new(3);
        sink.write(b"abcd").unwrap();
        sink.write(b"ef").unwrap();
        assert_eq!(sink.bytes_discarded(), 6);
        sink.set_name("ignored".to_string());
        sink.rename().unwrap();
    }
}
