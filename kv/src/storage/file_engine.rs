//! A bitcask-style `Engine`: values live in an append-only log file, with
//! an in-memory `BTreeMap` keydir mapping each stored key to its value's
//! offset and length, exposing the ordered floor/seek operations the
//! composite-key layer needs instead of exact-match `get`.

use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::engine::{CursorStep, Engine};
use super::file_log::{FileLog, KeyDir};
use crate::error::CResult;

pub struct FileEngine {
    file: Mutex<FileLog>,
    keydir: RwLock<KeyDir>,
}

impl FileEngine {
    pub fn open(path: impl AsRef<Path>) -> CResult<Self> {
        let mut file = FileLog::open(path.as_ref().to_path_buf())?;
        let keydir = file.build_keydir()?;
        Ok(FileEngine { file: Mutex::new(file), keydir: RwLock::new(keydir) })
    }

    fn read_at(&self, file: &mut FileLog, pos: u64, len: u32) -> CResult<Vec<u8>> {
        file.read_value(pos, len)
    }
}

impl Engine for FileEngine {
    fn get_floor(&self, key: &[u8]) -> CResult<Option<(Vec<u8>, Vec<u8>)>> {
        let keydir = self.keydir.read()?;
        let Some((found_key, &(pos, len))) = keydir.range(..=key.to_vec()).next_back() else {
            return Ok(None);
        };
        let found_key = found_key.clone();
        drop(keydir);
        let mut file = self.file.lock()?;
        let value = self.read_at(&mut file, pos, len)?;
        Ok(Some((found_key, value)))
    }

    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> CResult<()> {
        let mut file = self.file.lock()?;
        let mut keydir = self.keydir.write()?;
        for (key, value) in entries {
            if let Some(loc) = file.write_entry(key, Some(value))? {
                keydir.insert(key.clone(), loc);
            }
        }
        file.sync()
    }

    fn delete_batch(&self, keys: &[Vec<u8>]) -> CResult<()> {
        let mut file = self.file.lock()?;
        let mut keydir = self.keydir.write()?;
        for key in keys {
            file.write_entry(key, None)?;
            keydir.remove(key);
        }
        file.sync()
    }

    fn seek(&self, start: &[u8], cb: &mut dyn FnMut(&[u8], &[u8]) -> CursorStep) -> CResult<()> {
        let keydir = self.keydir.read()?;
        let Some(mut current) = keydir.range(start.to_vec()..).next().map(|(k, _)| k.clone()) else {
            return Ok(());
        };
        loop {
            let Some(&(pos, len)) = keydir.get(&current) else { return Ok(()) };
            let value = {
                let mut file = self.file.lock()?;
                self.read_at(&mut file, pos, len)?
            };
            match cb(&current, &value) {
                CursorStep::Abort => return Ok(()),
                CursorStep::Next => match keydir.range(next_key(&current)..).next() {
                    Some((k, _)) => current = k.clone(),
                    None => return Ok(()),
                },
                CursorStep::Prev => match keydir.range(..current.clone()).next_back() {
                    Some((k, _)) => current = k.clone(),
                    None => return Ok(()),
                },
            }
        }
    }
}

fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

#[cfg(test)]
mod test {
    use super::*;

    fn temp_path() -> std::path::PathBuf {
        tempdir::TempDir::new("mvkv-file-engine").unwrap().into_path().join("mvkv.db")
    }

    #[test]
    fn put_get_floor_delete() {
        let engine = FileEngine::open(temp_path()).unwrap();
        engine.put_batch(&[(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]).unwrap();
        assert_eq!(engine.get_floor(b"b").unwrap(), Some((b"a".to_vec(), b"1".to_vec())));
        engine.delete_batch(&[b"a".to_vec()]).unwrap();
        assert_eq!(engine.get_floor(b"b").unwrap(), None);
    }

    #[test]
    fn survives_reopen() {
        let path = temp_path();
        {
            let engine = FileEngine::open(&path).unwrap();
            engine.put_batch(&[(b"a".to_vec(), b"1".to_vec())]).unwrap();
        }
        let engine = FileEngine::open(&path).unwrap();
        assert_eq!(engine.get_floor(b"a").unwrap(), Some((b"a".to_vec(), b"1".to_vec())));
    }

    #[test]
    fn seek_walks_in_order() {
        let engine = FileEngine::open(temp_path()).unwrap();
        engine
            .put_batch(&[
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ])
            .unwrap();
        let mut seen = Vec::new();
        engine
            .seek(b"", &mut |k, _| {
                seen.push(k.to_vec());
                CursorStep::Next
            })
            .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }
}
