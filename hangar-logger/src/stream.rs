//! One rotating log file. Writes are one JSON object per line; rotation is
//! serialised by the stream's own lock so a write arriving mid-rotation
//! queues behind it instead of being dropped or interleaved.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use hangar_bus::LogRecord;

struct Inner {
    file: File,
    size: u64,
}

pub struct LogStream {
    path: PathBuf,
    max_size: u64,
    max_files: usize,
    inner: Mutex<Inner>,
}

impl LogStream {
    pub fn open(path: PathBuf, max_size: u64, max_files: usize) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            max_size,
            max_files,
            inner: Mutex::new(Inner { file, size }),
        })
    }

    pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(std::io::Error::other)?;
        line.push(b'\n');

        let mut inner = self.inner.lock().unwrap();
        inner.file.write_all(&line)?;
        inner.size += line.len() as u64;

        if inner.size > self.max_size {
            self.rotate(&mut inner)?;
        }
        Ok(())
    }

    fn rotate(&self, inner: &mut Inner) -> std::io::Result<()> {
        for index in (1..self.max_files).rev() {
            let from = rotated_path(&self.path, index);
            let to = rotated_path(&self.path, index + 1);
            if from.exists() {
                let _ = std::fs::rename(&from, &to);
            }
        }
        let first_rotated = rotated_path(&self.path, 1);
        std::fs::rename(&self.path, &first_rotated)?;

        let oldest = rotated_path(&self.path, self.max_files + 1);
        if oldest.exists() {
            let _ = std::fs::remove_file(&oldest);
        }

        let fresh = OpenOptions::new().create(true).append(true).open(&self.path)?;
        inner.file = fresh;
        inner.size = 0;
        Ok(())
    }
}

fn rotated_path(base: &std::path::Path, index: usize) -> PathBuf {
    let mut name = base
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("log")
        .to_string();
    name.push_str(&format!(".{index}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            level: "info".into(),
            pid: 1,
            message: message.to_string(),
            function: None,
            correlation_id: None,
            target: None,
        }
    }

    #[test]
    fn rotates_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let stream = LogStream::open(path.clone(), 50, 3).unwrap();

        for i in 0..20 {
            stream.append(&record(&format!("message number {i}"))).unwrap();
        }

        assert!(path.exists());
        assert!(rotated_path(&path, 1).exists());
    }

    #[test]
    fn retains_at_most_max_files_rotated_copies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let stream = LogStream::open(path.clone(), 30, 2).unwrap();

        for i in 0..200 {
            stream.append(&record(&format!("m{i}"))).unwrap();
        }

        assert!(rotated_path(&path, 1).exists());
        assert!(rotated_path(&path, 2).exists());
        assert!(!rotated_path(&path, 3).exists());
    }
}
