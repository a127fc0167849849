//! Pass 3 driver: merges the duplicate-index, optical-index, and
//! representative-info streams into O(1)-amortized per-record decisions
//! for the writer (spec §4.5).

use crate::detector::RepresentativeInfo;
use crate::header::SortOrder;
use crate::signature::FixedName;
use anyhow::Result;

/// A single sorted `u64` index cursor with the "sticky" query-name
/// semantics query-name-ordered input requires (spec §4.5).
struct IndexCursor<I: Iterator<Item = Result<u64>>> {
    source: I,
    next_index: u64,
    last_matched_name: Option<Vec<u8>>,
    sort_order: SortOrder,
}

impl<I: Iterator<Item = Result<u64>>> IndexCursor<I> {
    fn new(mut source: I, sort_order: SortOrder) -> Result<Self> {
        let next_index = match source.next() {
            Some(r) => r?,
            None => u64::MAX,
        };
        Ok(Self { source, next_index, last_matched_name: None, sort_order })
    }

    fn advance(&mut self) -> Result<()> {
        self.next_index = match self.source.next() {
            Some(r) => r?,
            None => u64::MAX,
        };
        Ok(())
    }

    /// Whether the record at file position `i` with query name `name` is a
    /// hit. The cursor only advances once `i` has moved past the current
    /// index AND (the input is coordinate-ordered, or `name` no longer
    /// matches the last matching query name) - per spec §4.5's advance
    /// rule. This means an exact match does NOT advance immediately: under
    /// query-name order the second mate/supplementary records sharing the
    /// same file-index must still see `i == next_index` (or the sticky
    /// follow-on check) before the group is truly left behind.
    fn check(&mut self, i: u64, name: &[u8]) -> Result<bool> {
        loop {
            if i == self.next_index {
                self.last_matched_name = Some(name.to_vec());
                return Ok(true);
            }
            if i > self.next_index {
                let sticky =
                    self.sort_order == SortOrder::QueryName && self.last_matched_name.as_deref() == Some(name);
                if sticky {
                    return Ok(true);
                }
                self.advance()?;
                continue;
            }
            return Ok(false);
        }
    }
}

/// A cursor over [`RepresentativeInfo`] rows, keyed the same way as
/// [`IndexCursor`] but carrying payload data on a hit. Sticky reuse across
/// records sharing a query name is handled by the caller ([`IndexMerger`]),
/// which caches the last hit.
struct RepresentativeCursor<I: Iterator<Item = Result<RepresentativeInfo>>> {
    source: I,
    next: Option<RepresentativeInfo>,
}

impl<I: Iterator<Item = Result<RepresentativeInfo>>> RepresentativeCursor<I> {
    fn new(mut source: I) -> Result<Self> {
        let next = source.next().transpose()?;
        Ok(Self { source, next })
    }

    fn advance(&mut self) -> Result<()> {
        self.next = self.source.next().transpose()?;
        Ok(())
    }

    fn check(&mut self, i: u64) -> Result<Option<(FixedName, u64)>> {
        while let Some(row) = &self.next {
            if row.file_index < i {
                self.advance()?;
                continue;
            }
            break;
        }
        match &self.next {
            Some(row) if row.file_index == i => {
                let result = (row.representative_name, row.set_size);
                self.advance()?;
                Ok(Some(result))
            }
            _ => Ok(None),
        }
    }
}

/// Per-record duplicate decision exposed to the writer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecision {
    pub is_duplicate: bool,
    pub is_optical_duplicate: bool,
}

/// Drives the three index streams in lockstep with the writer's position
/// counter. The writer calls [`IndexMerger::decide`] once per primary
/// mapped record, in the same stream order Pass 1/2 observed.
pub struct IndexMerger<D, O, R>
where
    D: Iterator<Item = Result<u64>>,
    O: Iterator<Item = Result<u64>>,
    R: Iterator<Item = Result<RepresentativeInfo>>,
{
    duplicate: IndexCursor<D>,
    optical: IndexCursor<O>,
    representative: RepresentativeCursor<R>,
    sort_order: SortOrder,
    last_representative: Option<(FixedName, u64)>,
    last_representative_name: Option<Vec<u8>>,
}

impl<D, O, R> IndexMerger<D, O, R>
where
    D: Iterator<Item = Result<u64>>,
    O: Iterator<Item = Result<u64>>,
    R: Iterator<Item = Result<RepresentativeInfo>>,
{
    pub fn new(duplicate: D, optical: O, representative: R, sort_order: SortOrder) -> Result<Self> {
        Ok(Self {
            duplicate: IndexCursor::new(duplicate, sort_order)?,
            optical: IndexCursor::new(optical, sort_order)?,
            representative: RepresentativeCursor::new(representative)?,
            sort_order,
            last_representative: None,
            last_representative_name: None,
        })
    }

    pub fn decide(&mut self, file_index: u64, query_name: &[u8]) -> Result<RecordDecision> {
        let is_duplicate = self.duplicate.check(file_index, query_name)?;
        let is_optical_duplicate = self.optical.check(file_index, query_name)?;
        Ok(RecordDecision { is_duplicate, is_optical_duplicate })
    }

    /// Representative-read lookup, returning `(name, set_size)` when this
    /// record belongs to a tagged duplicate set.
    pub fn representative_for(&mut self, file_index: u64, query_name: &[u8]) -> Result<Option<(FixedName, u64)>> {
        match self.representative.check(file_index)? {
            Some(hit) => {
                self.last_representative = Some(hit);
                self.last_representative_name = Some(query_name.to_vec());
                Ok(Some(hit))
            }
            None if self.sort_order == SortOrder::QueryName
                && self.last_representative_name.as_deref() == Some(query_name) =>
            {
                Ok(self.last_representative)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx_stream(values: Vec<u64>) -> impl Iterator<Item = Result<u64>> {
        values.into_iter().map(Ok)
    }

    /// Scenario S4: under query-name order, every record sharing a template
    /// (both mates plus a supplementary) carries the same file-index in the
    /// index stream. All of them must report a hit, not just the first.
    #[test]
    fn query_name_sticky_inherits_across_whole_template() {
        let mut cursor = IndexCursor::new(idx_stream(vec![3, 40]), SortOrder::QueryName).unwrap();
        assert!(cursor.check(3, b"p2").unwrap());
        assert!(cursor.check(4, b"p2").unwrap()); // second mate
        assert!(cursor.check(5, b"p2").unwrap()); // supplementary
        assert!(!cursor.check(6, b"p3").unwrap());
        assert!(!cursor.check(7, b"p3").unwrap());
    }

    #[test]
    fn query_name_sticky_resumes_at_next_group() {
        let mut cursor = IndexCursor::new(idx_stream(vec![3, 40]), SortOrder::QueryName).unwrap();
        assert!(cursor.check(3, b"p2").unwrap());
        assert!(cursor.check(4, b"p2").unwrap());
        assert!(!cursor.check(6, b"p3").unwrap());
        assert!(cursor.check(40, b"p9").unwrap());
        assert!(cursor.check(41, b"p9").unwrap());
    }

    #[test]
    fn coordinate_order_has_no_stickiness() {
        let mut cursor = IndexCursor::new(idx_stream(vec![3, 5]), SortOrder::Coordinate).unwrap();
        assert!(!cursor.check(0, b"a").unwrap());
        assert!(cursor.check(3, b"b").unwrap());
        assert!(!cursor.check(4, b"c").unwrap());
        assert!(cursor.check(5, b"d").unwrap());
    }

    #[test]
    fn exhausted_cursor_never_hits() {
        let mut cursor = IndexCursor::new(idx_stream(vec![]), SortOrder::Coordinate).unwrap();
        assert!(!cursor.check(0, b"a").unwrap());
        assert!(!cursor.check(1_000_000, b"b").unwrap());
    }

    #[test]
    fn representative_cursor_round_trips() {
        let rows = vec![
            RepresentativeInfo { file_index: 0, set_size: 2, representative_name: FixedName::from_bytes(b"r1") },
            RepresentativeInfo { file_index: 1, set_size: 2, representative_name: FixedName::from_bytes(b"r1") },
        ];
        let mut cursor = RepresentativeCursor::new(rows.into_iter().map(Ok)).unwrap();
        assert_eq!(cursor.check(0).unwrap().map(|(n, s)| (n.as_bytes().to_vec(), s)), Some((b"r1".to_vec(), 2)));
        assert_eq!(cursor.check(1).unwrap().map(|(n, s)| (n.as_bytes().to_vec(), s)), Some((b"r1".to_vec(), 2)));
        assert_eq!(cursor.check(2).unwrap(), None);
    }
}
