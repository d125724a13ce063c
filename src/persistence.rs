//! Append-only log persistence for the image cache store.
//!
//! Mutations are framed as binary records and appended to a single log
//! file; opening the log replays every record to rebuild the in-memory
//! image. The log is compacted on open when it carries substantially more
//! records than live keys.

use crate::error::{PhotomapError, Result};
use crate::storage::{MemoryBackend, StorageBackend};
use bytes::{BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const RECORD_PUT: u8 = 0;
const RECORD_DELETE: u8 = 1;

/// Replayed logs longer than this factor times the live key count are
/// rewritten in place on open.
const COMPACT_FACTOR: usize = 4;
const COMPACT_MIN_RECORDS: usize = 1024;

#[derive(Debug)]
pub enum LogRecord {
    Put { key: Bytes, value: Bytes },
    Delete { key: Bytes },
}

/// Append-only record log.
pub struct CacheLog {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
    size: u64,
    scratch: BytesMut,
}

impl CacheLog {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);
        Ok(CacheLog {
            file,
            writer,
            path,
            size,
            scratch: BytesMut::with_capacity(4 * 1024),
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch
            .reserve(1 + 4 + key.len() + 4 + value.len());
        self.scratch.put_u8(RECORD_PUT);
        self.scratch.put_u32(key.len() as u32);
        self.scratch.put(key);
        self.scratch.put_u32(value.len() as u32);
        self.scratch.put(value);
        self.writer.write_all(&self.scratch)?;
        self.size += self.scratch.len() as u64;
        Ok(())
    }

    pub fn write_delete(&mut self, key: &[u8]) -> Result<()> {
        self.scratch.clear();
        self.scratch.reserve(1 + 4 + key.len());
        self.scratch.put_u8(RECORD_DELETE);
        self.scratch.put_u32(key.len() as u32);
        self.scratch.put(key);
        self.writer.write_all(&self.scratch)?;
        self.size += self.scratch.len() as u64;
        Ok(())
    }

    /// Reads back every record from the start of the log.
    pub fn replay(&mut self) -> Result<Vec<LogRecord>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut self.file);
        let mut records = Vec::new();
        loop {
            match read_record(&mut reader) {
                Ok(rec) => records.push(rec),
                Err(PhotomapError::UnexpectedEof) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for CacheLog {
    fn drop(&mut self) {
        // best effort flush on drop
        let _ = self.writer.flush();
    }
}

fn read_record<R: Read>(reader: &mut R) -> Result<LogRecord> {
    let mut tag = [0u8; 1];
    if reader.read_exact(&mut tag).is_err() {
        return Err(PhotomapError::UnexpectedEof);
    }
    match tag[0] {
        RECORD_PUT => {
            let key = read_bytes(reader)?;
            let value = read_bytes(reader)?;
            Ok(LogRecord::Put { key, value })
        }
        RECORD_DELETE => {
            let key = read_bytes(reader)?;
            Ok(LogRecord::Delete { key })
        }
        _ => Err(PhotomapError::InvalidLogRecord),
    }
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Bytes> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .map_err(|_| PhotomapError::InvalidLogRecord)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| PhotomapError::InvalidLogRecord)?;
    Ok(Bytes::from(buf))
}

/// Durable storage backend: an in-memory image fronted by a [`CacheLog`].
pub struct AofBackend {
    memory: MemoryBackend,
    log: CacheLog,
    closed: bool,
}

impl AofBackend {
    /// Opens (or creates) the log at `path` and replays it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut log = CacheLog::open(path)?;
        let records = log.replay()?;
        let nrecords = records.len();

        let mut memory = MemoryBackend::new();
        for rec in records {
            match rec {
                LogRecord::Put { key, value } => memory.put(&key, value)?,
                LogRecord::Delete { key } => {
                    memory.delete(&key)?;
                }
            }
        }

        let mut backend = AofBackend {
            memory,
            log,
            closed: false,
        };
        if nrecords >= COMPACT_MIN_RECORDS && nrecords > COMPACT_FACTOR * backend.memory.len()? {
            backend.compact()?;
        }
        Ok(backend)
    }

    /// Rewrites the log so it holds exactly one put per live key. The new
    /// log is written beside the old one and swapped in with a rename.
    fn compact(&mut self) -> Result<()> {
        self.log.sync()?;
        let compact_path = self.log.path().with_extension("compact");
        {
            let mut fresh = CacheLog::open(&compact_path)?;
            for (key, value) in self.memory.entries() {
                fresh.write_put(key, value)?;
            }
            fresh.sync()?;
        }
        let path = self.log.path().to_path_buf();
        std::fs::rename(&compact_path, &path)?;
        self.log = CacheLog::open(path)?;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(PhotomapError::StorageClosed);
        }
        Ok(())
    }
}

impl StorageBackend for AofBackend {
    fn put(&mut self, key: &[u8], value: Bytes) -> Result<()> {
        self.check_open()?;
        self.log.write_put(key, &value)?;
        self.memory.put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_open()?;
        self.memory.get(key)
    }

    fn delete(&mut self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_open()?;
        self.log.write_delete(key)?;
        self.memory.delete(key)
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        self.check_open()?;
        self.memory.contains_key(key)
    }

    fn len(&self) -> Result<usize> {
        self.check_open()?;
        self.memory.len()
    }

    fn sync(&mut self) -> Result<()> {
        self.check_open()?;
        self.log.sync()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.log.sync()?;
        self.closed = true;
        self.memory.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.log");

        let mut log = CacheLog::open(&path).unwrap();
        log.write_put(b"key1", b"value1").unwrap();
        log.write_delete(b"key2").unwrap();
        log.flush().unwrap();

        let records = log.replay().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            LogRecord::Put { key, value } => {
                assert_eq!(key.as_ref(), b"key1");
                assert_eq!(value.as_ref(), b"value1");
            }
            _ => panic!("expected put record"),
        }
        match &records[1] {
            LogRecord::Delete { key } => assert_eq!(key.as_ref(), b"key2"),
            _ => panic!("expected delete record"),
        }
    }

    #[test]
    fn test_backend_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.log");

        {
            let mut backend = AofBackend::open(&path).unwrap();
            backend.put(b"a", Bytes::from_static(b"1")).unwrap();
            backend.put(b"b", Bytes::from_static(b"2")).unwrap();
            backend.delete(b"a").unwrap();
            backend.sync().unwrap();
        }

        let backend = AofBackend::open(&path).unwrap();
        assert!(backend.get(b"a").unwrap().is_none());
        assert_eq!(backend.get(b"b").unwrap().unwrap().as_ref(), b"2");
        assert_eq!(backend.len().unwrap(), 1);
    }

    #[test]
    fn test_closed_backend_rejects_ops() {
        let dir = TempDir::new().unwrap();
        let mut backend = AofBackend::open(dir.path().join("c.log")).unwrap();
        backend.close().unwrap();
        assert!(matches!(
            backend.put(b"x", Bytes::new()),
            Err(PhotomapError::StorageClosed)
        ));
    }

    #[test]
    fn test_compaction_keeps_live_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.log");

        {
            let mut backend = AofBackend::open(&path).unwrap();
            // many overwrites of few keys leaves a long log with little data
            for i in 0..2000u32 {
                let key = format!("k{}", i % 4);
                backend
                    .put(key.as_bytes(), Bytes::from(i.to_be_bytes().to_vec()))
                    .unwrap();
            }
            backend.sync().unwrap();
        }

        let size_before = std::fs::metadata(&path).unwrap().len();
        let backend = AofBackend::open(&path).unwrap();
        let size_after = std::fs::metadata(&path).unwrap().len();
        assert!(size_after < size_before);
        assert_eq!(backend.len().unwrap(), 4);
        assert_eq!(
            backend.get(b"k3").unwrap().unwrap().as_ref(),
            &1999u32.to_be_bytes()
        );
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.log");
        {
            let mut log = CacheLog::open(&path).unwrap();
            log.write_put(b"good", b"record").unwrap();
            log.flush().unwrap();
        }
        // chop off the tail of the last record
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 3]).unwrap();

        let mut log = CacheLog::open(&path).unwrap();
        assert!(matches!(
            log.replay(),
            Err(PhotomapError::InvalidLogRecord)
        ));
    }
}
