//! Append-only key-value store in a single log file
//!
//! Directory layout:
//! ```text
//! <dir>/LOCK       advisory lock held while a handle has the store open
//! <dir>/data.log   header followed by write-batch records
//! ```
//!
//! Log format:
//! ```text
//! [HEADER: 16 bytes]
//!   - magic: 8 bytes ("MPTDBLOG")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (reserved)
//!
//! [RECORDS: variable] one per write batch
//!   - payload_len: 4 bytes (u32 LE)
//!   - crc32: 4 bytes (u32 LE, over the payload)
//!   - payload:
//!       op_count: u32 LE
//!       per op: kind u8 (0 put, 1 delete), key_len u32 LE, key,
//!               and for puts: value_len u32 LE, encoded blob
//! ```
//!
//! A record is either replayed whole or not at all. A torn record at the
//! tail of the log (crash during append) is cut off on open.

use crate::config::StoreConfig;
use crate::store::{BatchOp, Blob, KvStore};
use crate::{Error, Result, MAGIC, VERSION};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_SIZE: u64 = 16;
const RECORD_HEADER_SIZE: u64 = 8;
const LOG_FILE: &str = "data.log";
const LOCK_FILE: &str = "LOCK";
const COMPACT_FILE: &str = "data.log.compact";

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// Entries per record when compaction rewrites the log
const COMPACT_BATCH: usize = 1024;

/// Location of an encoded value inside the log
#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
}

/// Mutable state guarded by one lock
struct Inner {
    file: File,
    /// Ordered index of live keys
    index: BTreeMap<Vec<u8>, IndexEntry>,
    /// Current append position
    write_offset: u64,
    /// Bytes of values that were overwritten or deleted
    garbage: u64,
}

/// Exclusive claim on a store directory
///
/// The claim is an OS file lock on `LOCK`, so it ends with the handle or
/// with the process, however that exits. The file itself stays behind and
/// only records the pid of the last holder.
struct DirLock {
    _file: File,
}

impl DirLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(Error::Locked(path)),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(DirLock { _file: file })
    }
}

/// A durable key-value store backed by an append-only log
pub struct FileStore {
    /// Store directory
    dir: PathBuf,
    config: StoreConfig,
    inner: Mutex<Inner>,
    _lock: DirLock,
}

impl FileStore {
    /// Open the store in `dir`, creating it if needed
    pub fn open(dir: impl AsRef<Path>, config: &StoreConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = DirLock::acquire(dir.join(LOCK_FILE))?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOG_FILE))?;

        let len = file.seek(SeekFrom::End(0))?;
        let (index, write_offset, garbage) = if len == 0 {
            write_header(&mut file)?;
            file.sync_all()?;
            (BTreeMap::new(), HEADER_SIZE, 0)
        } else {
            read_header(&mut file)?;
            replay(&mut file, len)?
        };

        info!(
            "opened store {} ({} keys, {} bytes)",
            dir.display(),
            index.len(),
            write_offset
        );

        Ok(FileStore {
            dir,
            config: config.clone(),
            inner: Mutex::new(Inner {
                file,
                index,
                write_offset,
                garbage,
            }),
            _lock: lock,
        })
    }

    /// Bytes used by the log, header included
    pub fn size_on_disk(&self) -> u64 {
        self.inner.lock().write_offset
    }

    /// Bytes held by overwritten or deleted values
    pub fn garbage_bytes(&self) -> u64 {
        self.inner.lock().garbage
    }

    /// Sync and release the store
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

impl KvStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let entry = match inner.index.get(key) {
            Some(entry) => *entry,
            None => return Ok(None),
        };
        let raw = read_at(&mut inner.file, entry)?;
        Ok(Some(Blob::decode(&raw)?.data))
    }

    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.inner.lock().index.contains_key(key))
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        // Encode outside the lock
        let mut payload = Vec::new();
        payload.extend_from_slice(&(ops.len() as u32).to_le_bytes());
        let mut placements = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    let encoded = Blob::new(value).encode(self.config.compression_level)?;
                    payload.push(OP_PUT);
                    payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    payload.extend_from_slice(&key);
                    payload.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                    let at = payload.len() as u64;
                    payload.extend_from_slice(&encoded);
                    placements.push((key, Some((at, encoded.len() as u32))));
                }
                BatchOp::Delete { key } => {
                    payload.push(OP_DELETE);
                    payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                    payload.extend_from_slice(&key);
                    placements.push((key, None));
                }
            }
        }

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        record.extend_from_slice(&payload);

        let mut inner = self.inner.lock();
        let start = inner.write_offset;

        if let Err(e) = append(&mut inner.file, start, &record, self.config.sync_writes) {
            // Leave no partial record behind for the next append to trail
            let _ = inner.file.set_len(start);
            return Err(e);
        }
        inner.write_offset = start + record.len() as u64;

        let base = start + RECORD_HEADER_SIZE;
        for (key, placement) in placements {
            let replaced = match placement {
                Some((at, size)) => inner.index.insert(
                    key,
                    IndexEntry {
                        offset: base + at,
                        size,
                    },
                ),
                None => inner.index.remove(&key),
            };
            if let Some(old) = replaced {
                inner.garbage += old.size as u64;
            }
        }

        debug!("appended batch of {} bytes at {}", record.len(), start);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut inner = self.inner.lock();
        let matches: Vec<(Vec<u8>, IndexEntry)> = inner
            .index
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), *entry))
            .collect();

        let mut results = Vec::with_capacity(matches.len());
        for (key, entry) in matches {
            let raw = read_at(&mut inner.file, entry)?;
            results.push((key, Blob::decode(&raw)?.data));
        }
        Ok(results)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let inner = self.inner.lock();
        Ok(inner
            .index
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let before = inner.write_offset;
        let tmp_path = self.dir.join(COMPACT_FILE);

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        write_header(&mut out)?;

        let live: Vec<(Vec<u8>, IndexEntry)> = inner
            .index
            .iter()
            .map(|(key, entry)| (key.clone(), *entry))
            .collect();

        let mut index = BTreeMap::new();
        let mut offset = HEADER_SIZE;

        for chunk in live.chunks(COMPACT_BATCH) {
            let mut payload = Vec::new();
            payload.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            let mut placed = Vec::with_capacity(chunk.len());

            for (key, entry) in chunk {
                // Values are copied still encoded
                let raw = read_at(&mut inner.file, *entry)?;
                payload.push(OP_PUT);
                payload.extend_from_slice(&(key.len() as u32).to_le_bytes());
                payload.extend_from_slice(key);
                payload.extend_from_slice(&(raw.len() as u32).to_le_bytes());
                placed.push((key.clone(), payload.len() as u64, raw.len() as u32));
                payload.extend_from_slice(&raw);
            }

            out.write_all(&(payload.len() as u32).to_le_bytes())?;
            out.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            out.write_all(&payload)?;

            let base = offset + RECORD_HEADER_SIZE;
            for (key, at, size) in placed {
                index.insert(
                    key,
                    IndexEntry {
                        offset: base + at,
                        size,
                    },
                );
            }
            offset += RECORD_HEADER_SIZE + payload.len() as u64;
        }

        out.sync_all()?;
        fs::rename(&tmp_path, self.dir.join(LOG_FILE))?;

        inner.file = out;
        inner.index = index;
        inner.write_offset = offset;
        inner.garbage = 0;

        info!("compacted store {}: {} -> {} bytes", self.dir.display(), before, offset);
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.inner.lock().file.sync_all();
    }
}

fn write_header(file: &mut File) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..8].copy_from_slice(MAGIC);
    header[8..12].copy_from_slice(&VERSION.to_le_bytes());
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header)?;
    Ok(())
}

fn read_header(file: &mut File) -> Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::InvalidFile("Truncated header".into()),
        _ => Error::Io(e),
    })?;

    if &header[0..8] != MAGIC {
        return Err(Error::InvalidFile("Invalid magic bytes".into()));
    }

    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != VERSION {
        return Err(Error::VersionMismatch {
            expected: VERSION,
            found: version,
        });
    }
    Ok(())
}

/// Rebuild the index from the log. Returns (index, end of valid data, garbage).
fn replay(file: &mut File, len: u64) -> Result<(BTreeMap<Vec<u8>, IndexEntry>, u64, u64)> {
    let mut index = BTreeMap::new();
    let mut garbage = 0u64;
    let mut offset = HEADER_SIZE;

    file.seek(SeekFrom::Start(HEADER_SIZE))?;
    let mut reader = BufReader::new(&mut *file);

    while offset < len {
        if offset + RECORD_HEADER_SIZE > len {
            warn_torn(offset, len, "short header");
            break;
        }
        let mut head = [0u8; RECORD_HEADER_SIZE as usize];
        reader.read_exact(&mut head)?;
        let payload_len = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as u64;
        let crc = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);

        let end = offset + RECORD_HEADER_SIZE + payload_len;
        if end > len {
            warn_torn(offset, len, "short payload");
            break;
        }

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload)?;

        if crc32fast::hash(&payload) != crc {
            if end == len {
                warn_torn(offset, len, "checksum mismatch");
                break;
            }
            return Err(Error::Corruption(format!(
                "Checksum mismatch in record at offset {}",
                offset
            )));
        }

        let base = offset + RECORD_HEADER_SIZE;
        for (key, placement) in parse_payload(&payload, offset)? {
            let replaced = match placement {
                Some((at, size)) => index.insert(
                    key,
                    IndexEntry {
                        offset: base + at,
                        size,
                    },
                ),
                None => index.remove(&key),
            };
            if let Some(old) = replaced {
                garbage += old.size as u64;
            }
        }
        offset = end;
    }

    drop(reader);
    if offset < len {
        file.set_len(offset)?;
        file.sync_all()?;
    }

    Ok((index, offset, garbage))
}

fn warn_torn(offset: u64, len: u64, reason: &str) {
    warn!(
        "discarding torn record at offset {} ({}), log length {}",
        offset, reason, len
    );
}

type Placement = (Vec<u8>, Option<(u64, u32)>);

/// Cursor over a record payload
struct PayloadReader<'a> {
    payload: &'a [u8],
    pos: usize,
    record_offset: u64,
}

impl<'a> PayloadReader<'a> {
    fn bad(&self, what: &str) -> Error {
        Error::Corruption(format!("{} in record at offset {}", what, self.record_offset))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.payload.len())
            .ok_or_else(|| self.bad("Truncated operation"))?;
        let bytes = &self.payload[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Decode the operations of a checksummed payload
fn parse_payload(payload: &[u8], record_offset: u64) -> Result<Vec<Placement>> {
    let mut reader = PayloadReader {
        payload,
        pos: 0,
        record_offset,
    };

    let count = reader.u32()? as usize;
    let mut ops = Vec::with_capacity(count.min(payload.len()));

    for _ in 0..count {
        let kind = reader.take(1)?[0];
        let key_len = reader.u32()? as usize;
        let key = reader.take(key_len)?.to_vec();
        match kind {
            OP_PUT => {
                let value_len = reader.u32()?;
                let at = reader.pos as u64;
                reader.take(value_len as usize)?;
                ops.push((key, Some((at, value_len))));
            }
            OP_DELETE => ops.push((key, None)),
            other => return Err(reader.bad(&format!("Unknown operation {}", other))),
        }
    }

    if reader.pos != payload.len() {
        return Err(reader.bad("Trailing bytes"));
    }
    Ok(ops)
}

fn append(file: &mut File, offset: u64, record: &[u8], sync: bool) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(record)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

fn read_at(file: &mut File, entry: IndexEntry) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(entry.offset))?;
    let mut data = vec![0u8; entry.size as usize];
    file.read_exact(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> StoreConfig {
        StoreConfig::default()
    }

    #[test]
    fn test_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");

        {
            let store = FileStore::open(&path, &config()).unwrap();
            assert_eq!(store.len(), 0);
            store.put(b"key", b"value").unwrap();
            store.close().unwrap();
        }

        {
            let store = FileStore::open(&path, &config()).unwrap();
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
            assert_eq!(store.get(b"missing").unwrap(), None);
        }
    }

    #[test]
    fn test_overwrite_and_delete_persist() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"a", b"2").unwrap();
            store.put(b"b", b"3").unwrap();
            store.delete(b"b").unwrap();
            assert!(store.garbage_bytes() > 0);
        }

        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert!(!store.contains(b"b").unwrap());
    }

    #[test]
    fn test_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), &config()).unwrap();

        let err = FileStore::open(dir.path(), &config()).err().unwrap();
        assert!(matches!(err, Error::Locked(_)));

        drop(store);
        assert!(FileStore::open(dir.path(), &config()).is_ok());
    }

    #[test]
    fn test_lock_file_left_by_dead_process_does_not_block() {
        let dir = tempdir().unwrap();
        {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            store.put(b"key", b"value").unwrap();
        }

        // What a killed holder leaves behind: the file, but no OS lock
        fs::write(dir.path().join(LOCK_FILE), b"4194304\n").unwrap();

        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(b"value".to_vec()));
        let holder = fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_batch_is_atomic_and_ordered() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), &config()).unwrap();

        store
            .write_batch(vec![
                BatchOp::put(b"k1".to_vec(), b"v1".to_vec()),
                BatchOp::put(b"k2".to_vec(), b"v2".to_vec()),
                BatchOp::delete(b"k1".to_vec()),
                BatchOp::put(b"k3".to_vec(), vec![0u8; 2048]),
            ])
            .unwrap();

        assert_eq!(store.get(b"k1").unwrap(), None);
        assert_eq!(store.get(b"k2").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(store.get(b"k3").unwrap(), Some(vec![0u8; 2048]));
    }

    #[test]
    fn test_scan_prefix() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), &config()).unwrap();

        store.put(b"prefix:2", b"value2").unwrap();
        store.put(b"prefix:1", b"value1").unwrap();
        store.put(b"other:1", b"other1").unwrap();

        let results = store.scan_prefix(b"prefix:").unwrap();
        assert_eq!(
            results,
            vec![
                (b"prefix:1".to_vec(), b"value1".to_vec()),
                (b"prefix:2".to_vec(), b"value2".to_vec()),
            ]
        );
        assert_eq!(store.scan_prefix(b"").unwrap().len(), 3);
    }

    #[test]
    fn test_keys_with_prefix_skips_values() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), &config()).unwrap();
        store.put(b"prefix:1", b"value1").unwrap();
        store.put(b"prefix:2", b"value2").unwrap();
        store.put(b"other:1", b"other1").unwrap();

        // Damage every value on disk; listing keys never reads them
        {
            let mut inner = store.inner.lock();
            let end = inner.write_offset;
            inner.file.seek(SeekFrom::Start(HEADER_SIZE)).unwrap();
            inner
                .file
                .write_all(&vec![0xee; (end - HEADER_SIZE) as usize])
                .unwrap();
        }

        assert_eq!(
            store.keys_with_prefix(b"prefix:").unwrap(),
            vec![b"prefix:1".to_vec(), b"prefix:2".to_vec()]
        );
        assert_eq!(store.keys_with_prefix(b"").unwrap().len(), 3);
        assert!(store.get(b"prefix:1").is_err());
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let log = dir.path().join(LOG_FILE);

        let good_len = {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            store.put(b"first", b"1").unwrap();
            store.size_on_disk()
        };

        // A record header promising more payload than was written
        {
            let mut file = OpenOptions::new().append(true).open(&log).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[0, 0, 0, 0, 1, 2, 3]).unwrap();
        }

        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.get(b"first").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.size_on_disk(), good_len);
        assert_eq!(fs::metadata(&log).unwrap().len(), good_len);

        // The store keeps appending after recovery
        store.put(b"second", b"2").unwrap();
        drop(store);
        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.get(b"second").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_checksum_mismatch_in_last_record_drops_it() {
        let dir = tempdir().unwrap();
        let log = dir.path().join(LOG_FILE);

        {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            store.put(b"kept", b"1").unwrap();
            store.put(b"lost", b"2").unwrap();
        }

        let mut bytes = fs::read(&log).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&log, bytes).unwrap();

        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"lost").unwrap(), None);
    }

    #[test]
    fn test_checksum_mismatch_mid_log_is_corruption() {
        let dir = tempdir().unwrap();
        let log = dir.path().join(LOG_FILE);

        {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            store.put(b"first", b"1").unwrap();
            store.put(b"second", b"2").unwrap();
        }

        let mut bytes = fs::read(&log).unwrap();
        // Last byte of the first record's payload
        let first_payload_len = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        bytes[16 + 8 + first_payload_len - 1] ^= 0xff;
        fs::write(&log, bytes).unwrap();

        let err = FileStore::open(dir.path(), &config()).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_invalid_magic() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(LOG_FILE), [0u8; 32]).unwrap();

        let err = FileStore::open(dir.path(), &config()).err().unwrap();
        assert!(matches!(err, Error::InvalidFile(_)));

        // The failed open released its lock
        fs::remove_file(dir.path().join(LOG_FILE)).unwrap();
        assert!(FileStore::open(dir.path(), &config()).is_ok());
    }

    #[test]
    fn test_compact_keeps_live_entries() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path(), &config()).unwrap();
            for i in 0..50u32 {
                store.put(b"hot", &i.to_le_bytes()).unwrap();
                store.put(&i.to_be_bytes(), b"cold").unwrap();
            }
            store.delete(&7u32.to_be_bytes()).unwrap();

            let before = store.size_on_disk();
            store.compact().unwrap();
            assert!(store.size_on_disk() < before);
            assert_eq!(store.garbage_bytes(), 0);

            assert_eq!(store.get(b"hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));
            store.put(b"after", b"compaction").unwrap();
        }

        let store = FileStore::open(dir.path(), &config()).unwrap();
        assert_eq!(store.len(), 51);
        assert_eq!(store.get(b"hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));
        assert_eq!(store.get(&7u32.to_be_bytes()).unwrap(), None);
        assert_eq!(store.get(&8u32.to_be_bytes()).unwrap(), Some(b"cold".to_vec()));
        assert_eq!(store.get(b"after").unwrap(), Some(b"compaction".to_vec()));
    }
}
