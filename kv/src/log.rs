//! The append-only change log: a file of fixed 24-byte blocks recording
//! `(timestamp, key-fragment)` pairs. Every write issues a fresh timestamp
//! by appending one block per 16-byte chunk of the key (all blocks of one
//! record share the same timestamp, which is how replication later
//! reconstructs the full key from a cursor position). This is distinct
//! from the engine's own on-disk file: the change log exists purely to
//! drive replication checkpoints, and replicated writes never touch it
//! (see `node::Node::put_key_pairs`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs4::FileExt;

use crate::clock::Clock;
use crate::error::{CResult, Error};

pub const BLOCK_SIZE: usize = 24;
const HEAD_LEN: usize = 8;
const FRAGMENT_LEN: usize = 16;
const TS_MASK: i64 = 0x00ff_ffff_ffff_ffff;

fn encode_head(fragment_len: u8, ts: i64) -> [u8; HEAD_LEN] {
    let packed = ((fragment_len as i64) << 56) | (ts & TS_MASK);
    packed.to_be_bytes()
}

fn decode_head(bytes: &[u8; HEAD_LEN]) -> CResult<(u8, i64)> {
    let packed = i64::from_be_bytes(*bytes);
    let fragment_len = (packed >> 56) as u8;
    if fragment_len as usize > FRAGMENT_LEN {
        return Err(Error::Corruption(format!("key fragment length {} exceeds 16", fragment_len)));
    }
    Ok((fragment_len, packed & TS_MASK))
}

/// An append-only, block-aligned file of `(ts, key-fragment)` records.
pub struct ChangeLog {
    path: PathBuf,
    file: Mutex<File>,
    clock: Clock,
}

impl ChangeLog {
    /// Opens or creates the change log at `path`. Validates that the file
    /// size is block-aligned and that the process clock is not behind the
    /// log's last recorded timestamp, failing open with a time-skew error
    /// otherwise.
    pub fn open(path: impl AsRef<Path>) -> CResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive().map_err(|e| Error::Internal(format!("lock {:?}: {}", path, e)))?;

        let file_len = file.metadata()?.len();
        if file_len % BLOCK_SIZE as u64 != 0 {
            return Err(Error::Corruption(format!(
                "change log size {} is not a multiple of {}",
                file_len, BLOCK_SIZE
            )));
        }

        let last_ts = if file_len == 0 {
            0
        } else {
            let (_, ts) = read_head_at(&mut file, file_len - BLOCK_SIZE as u64)?;
            ts
        };

        let clock = Clock::open(last_ts)?;
        file.seek(SeekFrom::End(0))?;

        Ok(ChangeLog { path, file: Mutex::new(file), clock })
    }

    /// Assigns a fresh timestamp and appends `ceil(len(key)/16)` blocks
    /// recording it, all sharing that timestamp. Serialized by an
    /// exclusive lock so one key's blocks are always contiguous on disk.
    pub fn append(&self, key: &[u8]) -> CResult<i64> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key is empty".into()));
        }
        let mut file = self.file.lock()?;
        let ts = self.clock.timestamp();
        file.seek(SeekFrom::End(0))?;
        for chunk in key.chunks(FRAGMENT_LEN) {
            let head = encode_head(chunk.len() as u8, ts);
            let mut fragment = [0u8; FRAGMENT_LEN];
            fragment[..chunk.len()].copy_from_slice(chunk);
            file.write_all(&head)?;
            file.write_all(&fragment)?;
        }
        file.sync_data()?;
        Ok(ts)
    }

    /// A fresh timestamp from this log's clock without recording anything,
    /// used to build "as of now" read probes.
    pub fn now(&self) -> i64 {
        self.clock.timestamp()
    }

    /// Total size of the log file in bytes.
    pub fn size(&self) -> CResult<u64> {
        Ok(self.file.lock()?.metadata()?.len())
    }

    /// The timestamp of the first record in the log, or `None` if empty.
    pub fn genesis(&self) -> CResult<Option<i64>> {
        let mut file = self.file.lock()?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        let (_, ts) = read_head_at(&mut file, 0)?;
        Ok(Some(ts))
    }

    /// Opens an independent read handle positioned at the first record
    /// whose timestamp is `>= start_ts`.
    pub fn cursor(&self, start_ts: i64) -> CResult<Cursor> {
        let mut file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let total_blocks = file_len / BLOCK_SIZE as u64;

        let mut lo = 0u64;
        let mut hi = total_blocks;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (_, ts) = read_head_at(&mut file, mid * BLOCK_SIZE as u64)?;
            if ts < start_ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let mut idx = lo;
        // The binary search may land in the middle of a multi-block
        // record; back up while the neighbor shares the same timestamp so
        // Data() sees the record's first block.
        if idx < total_blocks {
            let (_, target_ts) = read_head_at(&mut file, idx * BLOCK_SIZE as u64)?;
            while idx > 0 {
                let (_, prev_ts) = read_head_at(&mut file, (idx - 1) * BLOCK_SIZE as u64)?;
                if prev_ts == target_ts {
                    idx -= 1;
                } else {
                    break;
                }
            }
        }

        Ok(Cursor { file, pos: idx * BLOCK_SIZE as u64, file_len, record_end: None })
    }
}

fn read_head_at(file: &mut File, offset: u64) -> CResult<(u8, i64)> {
    file.seek(SeekFrom::Start(offset))?;
    let mut head = [0u8; HEAD_LEN];
    file.read_exact(&mut head)?;
    decode_head(&head)
}

fn read_fragment_at(file: &mut File, block_offset: u64, fragment_len: u8) -> CResult<Vec<u8>> {
    file.seek(SeekFrom::Start(block_offset + HEAD_LEN as u64))?;
    let mut fragment = [0u8; FRAGMENT_LEN];
    file.read_exact(&mut fragment)?;
    Ok(fragment[..fragment_len as usize].to_vec())
}

/// A read-only cursor over the change log, independent of the writer.
pub struct Cursor {
    file: File,
    pos: u64,
    file_len: u64,
    record_end: Option<u64>,
}

impl Cursor {
    /// True if the cursor is positioned at a record (not past EOF).
    pub fn has_data(&self) -> bool {
        self.pos < self.file_len
    }

    /// Reads the record at the current position, reconstructing the full
    /// key from however many fragment blocks share its timestamp.
    pub fn data(&mut self) -> CResult<(i64, Vec<u8>)> {
        if !self.has_data() {
            return Err(Error::Corruption("cursor has no data at EOF".into()));
        }
        let (first_len, ts) = read_head_at(&mut self.file, self.pos)?;
        let mut key = read_fragment_at(&mut self.file, self.pos, first_len)?;

        let mut cursor_pos = self.pos + BLOCK_SIZE as u64;
        while cursor_pos < self.file_len {
            let (len, block_ts) = read_head_at(&mut self.file, cursor_pos)?;
            if block_ts != ts {
                break;
            }
            key.extend(read_fragment_at(&mut self.file, cursor_pos, len)?);
            cursor_pos += BLOCK_SIZE as u64;
        }
        self.record_end = Some(cursor_pos);
        Ok((ts, key))
    }

    /// Advances past the current multi-block record. Returns `false` at
    /// EOF (nothing left to read).
    pub fn next(&mut self) -> CResult<bool> {
        let record_end = match self.record_end {
            Some(end) => end,
            None => {
                self.data()?;
                self.record_end.expect("data() always sets record_end on success")
            }
        };
        self.pos = record_end;
        self.record_end = None;
        Ok(self.has_data())
    }
}
