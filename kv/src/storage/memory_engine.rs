//! An in-memory `Engine`, used by tests and by `kv-cli --engine memory`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::engine::{CursorStep, Engine};
use crate::error::CResult;

#[derive(Default)]
pub struct MemoryEngine {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn get_floor(&self, key: &[u8]) -> CResult<Option<(Vec<u8>, Vec<u8>)>> {
        let data = self.data.read()?;
        Ok(data.range(..=key.to_vec()).next_back().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn put_batch(&self, entries: &[(Vec<u8>, Vec<u8>)]) -> CResult<()> {
        let mut data = self.data.write()?;
        for (k, v) in entries {
            data.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    fn delete_batch(&self, keys: &[Vec<u8>]) -> CResult<()> {
        let mut data = self.data.write()?;
        for k in keys {
            data.remove(k);
        }
        Ok(())
    }

    fn seek(&self, start: &[u8], cb: &mut dyn FnMut(&[u8], &[u8]) -> CursorStep) -> CResult<()> {
        let data = self.data.read()?;
        let Some(mut current) = data.range(start.to_vec()..).next().map(|(k, _)| k.clone()) else {
            return Ok(());
        };
        loop {
            let Some(value) = data.get(&current) else { return Ok(()) };
            match cb(&current, value) {
                CursorStep::Abort => return Ok(()),
                CursorStep::Next => match data.range(next_key(&current)..).next() {
                    Some((k, _)) => current = k.clone(),
                    None => return Ok(()),
                },
                CursorStep::Prev => match data.range(..current.clone()).next_back() {
                    Some((k, _)) => current = k.clone(),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// The smallest key strictly greater than `key`, used to exclude `key`
/// itself from a forward `range` bound.
fn next_key(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0);
    next
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn get_floor_returns_greatest_key_at_or_below() {
        let engine = MemoryEngine::new();
        engine.put_batch(&[(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]).unwrap();
        assert_eq!(engine.get_floor(b"b").unwrap(), Some((b"a".to_vec(), b"1".to_vec())));
        assert_eq!(engine.get_floor(b"c").unwrap(), Some((b"c".to_vec(), b"3".to_vec())));
        assert_eq!(engine.get_floor(b"").unwrap(), None);
    }

    #[test]
    fn seek_forward_and_abort() {
        let engine = MemoryEngine::new();
        engine
            .put_batch(&[
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ])
            .unwrap();
        let mut seen = Vec::new();
        engine
            .seek(b"a", &mut |k, v| {
                seen.push((k.to_vec(), v.to_vec()));
                if k == b"b" {
                    CursorStep::Abort
                } else {
                    CursorStep::Next
                }
            })
            .unwrap();
        assert_eq!(seen, vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn seek_can_reverse_direction_mid_scan() {
        let engine = MemoryEngine::new();
        engine
            .put_batch(&[
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ])
            .unwrap();
        let mut seen = Vec::new();
        let mut reversed = false;
        engine
            .seek(b"b", &mut |k, v| {
                seen.push(k.to_vec());
                let _ = v;
                if !reversed {
                    reversed = true;
                    CursorStep::Prev
                } else {
                    CursorStep::Abort
                }
            })
            .unwrap();
        assert_eq!(seen, vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn delete_batch_removes_keys() {
        let engine = MemoryEngine::new();
        engine.put_batch(&[(b"a".to_vec(), b"1".to_vec())]).unwrap();
        engine.delete_batch(&[b"a".to_vec(), b"missing".to_vec()]).unwrap();
        assert_eq!(engine.get_floor(b"a").unwrap(), None);
    }
}
