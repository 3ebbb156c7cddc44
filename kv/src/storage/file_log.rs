use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use fs4::FileExt;

use crate::error::{CResult, Error};

/// An append-only log of composite-key/value entries, encoded as:
///
/// - Key length as big-endian u32.
/// - Value length as big-endian i32, or -1 for tombstones.
/// - Key as raw bytes.
/// - Value as raw bytes.
///
/// This is [`FileEngine`](super::file_engine::FileEngine)'s own on-disk
/// representation. It has no relationship to the replication change log
/// (`crate::log::ChangeLog`), a separate file with a different, fixed
/// 24-byte-block format.
pub struct FileLog {
    pub(crate) path: PathBuf,
    pub(crate) file: std::fs::File,
}

/// In-memory index from a stored composite key to its value's
/// `(offset, length)` in the log file. `None` length marks a tombstone.
pub type KeyDir = std::collections::BTreeMap<Vec<u8>, (u64, u32)>;

enum Record {
    Live { key: Vec<u8>, value_pos: u64, value_len: u32 },
    Tombstone { key: Vec<u8>, end_pos: u64 },
}

/// Reads one entry starting at `pos` and advances `r` past it. The header
/// is an 8-byte `(key_len: u32, value_len: i32)` pair in one read rather
/// than two, since both are always consumed together; `value_len == -1`
/// marks a tombstone.
fn read_record(r: &mut BufReader<&mut std::fs::File>, pos: u64, file_len: u64) -> std::io::Result<Record> {
    let mut header = [0u8; 8];
    r.read_exact(&mut header)?;
    let key_len = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let value_len = i32::from_be_bytes(header[4..8].try_into().unwrap());
    let value_pos = pos + 8 + key_len as u64;

    let mut key = vec![0; key_len as usize];
    r.read_exact(&mut key)?;

    if value_len < 0 {
        return Ok(Record::Tombstone { key, end_pos: value_pos });
    }
    let value_len = value_len as u32;
    if value_pos + value_len as u64 > file_len {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "value runs past end of file"));
    }
    r.seek_relative(value_len as i64)?;
    Ok(Record::Live { key, value_pos, value_len })
}

impl FileLog {
    /// Opens a log file, creating it if absent, and takes an exclusive
    /// lock on it until the process exits.
    pub fn open(path: PathBuf) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.try_lock_exclusive()?;
        Ok(Self { path, file })
    }

    /// Replays the log from the start to rebuild the keydir in memory.
    /// Truncates a trailing partial write left by a crash mid-append.
    pub fn build_keydir(&mut self) -> CResult<KeyDir> {
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);
        let mut pos = r.seek(SeekFrom::Start(0))?;
        let mut keydir = KeyDir::new();

        loop {
            if pos >= file_len {
                break;
            }
            match read_record(&mut r, pos, file_len) {
                Ok(Record::Live { key, value_pos, value_len }) => {
                    pos = value_pos + value_len as u64;
                    keydir.insert(key, (value_pos, value_len));
                }
                Ok(Record::Tombstone { key, end_pos }) => {
                    pos = end_pos;
                    keydir.remove(&key);
                }
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!("log entry at offset {} is incomplete, dropping tail of {}", pos, self.path.display());
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(keydir)
    }

    pub fn read_value(&mut self, value_pos: u64, value_len: u32) -> CResult<Vec<u8>> {
        let mut value = vec![0; value_len as usize];
        self.file.seek(SeekFrom::Start(value_pos))?;
        self.file.read_exact(&mut value)?;
        Ok(value)
    }

    /// Appends a key/value entry, or a tombstone if `value` is `None`.
    /// Returns `Some((value_offset, value_len))` for a live write, `None`
    /// for a tombstone write.
    pub fn write_entry(&mut self, key: &[u8], value: Option<&[u8]>) -> CResult<Option<(u64, u32)>> {
        let key_len = key.len() as u32;
        let value_len_or_tombstone = value.map_or(-1, |v| v.len() as i32);
        let entry_len = 4 + 4 + key_len + value.map_or(0, |v| v.len() as u32);

        let pos = self.file.seek(SeekFrom::End(0))?;
        let mut w = BufWriter::with_capacity(entry_len as usize, &mut self.file);
        w.write_all(&key_len.to_be_bytes())?;
        w.write_all(&value_len_or_tombstone.to_be_bytes())?;
        w.write_all(key)?;
        if let Some(value) = value {
            w.write_all(value)?;
        }
        w.flush()?;

        Ok(value.map(|v| (pos + 4 + 4 + key_len as u64, v.len() as u32)))
    }

    pub fn sync(&self) -> CResult<()> {
        self.file.sync_data().map_err(Error::from)
    }
}
