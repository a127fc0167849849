//! Generic external merge-sorter.
//!
//! Accumulates records in memory up to a configured batch size, stably
//! sorts and spills them (LZ4-framed) when the budget is exceeded, and on
//! `finish()` yields a single sorted stream - either the in-memory buffer
//! directly (no spills occurred) or a k-way merge over every spill file
//! plus any residue. Mirrors the teacher's `save_chunk_parallel` /
//! `open_chunk_reader` / `BinaryHeap` merge, generalized over any record
//! type implementing [`SortRecord`] instead of being hard-coded to one
//! `Metadata` shape.

use anyhow::{Context, Result};
use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A value that can be sorted externally: totally ordered, and encodable to
/// / decodable from a fixed-width binary representation.
pub trait SortRecord: Ord + Send {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()>;
    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Option<Self>>
    where
        Self: Sized;
}

impl SortRecord for u64 {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.to_le_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Option<Self>> {
        let mut buf = [0u8; 8];
        match r.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u64::from_le_bytes(buf))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Accumulates, spills, and merge-sorts records of type `T`.
pub struct ExternalSorter<T: SortRecord> {
    batch_size: usize,
    tmp_dir: PathBuf,
    buffer: Vec<T>,
    spill_paths: Vec<PathBuf>,
    max_open_files: usize,
}

impl<T: SortRecord> ExternalSorter<T> {
    pub fn new(batch_size: usize, tmp_dir: impl Into<PathBuf>, max_open_files: usize) -> Self {
        Self {
            batch_size,
            tmp_dir: tmp_dir.into(),
            buffer: Vec::with_capacity(batch_size.min(1 << 20)),
            spill_paths: Vec::new(),
            max_open_files,
        }
    }

    pub fn add(&mut self, record: T) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.spill()?;
        }
        Ok(())
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.spill_paths.len() >= self.max_open_files {
            anyhow::bail!(
                "external sorter exceeded the configured spill-file budget ({} files)",
                self.max_open_files
            );
        }
        let mut chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        chunk.par_sort_unstable();
        let path = self.tmp_dir.join(format!("sort-{}.lz4", fastrand::u64(..)));
        let file = File::create(&path)
            .with_context(|| format!("creating spill file {}", path.display()))?;
        let mut enc = FrameEncoder::new(BufWriter::with_capacity(1 << 20, file));
        for record in &chunk {
            record.write_to(&mut enc)?;
        }
        enc.finish().context("finishing spill file")?;
        self.spill_paths.push(path);
        Ok(())
    }

    /// Mark the sorter as done accepting input and return a sorted stream.
    pub fn finish(mut self) -> Result<SortedStream<T>> {
        self.buffer.par_sort_unstable();
        if self.spill_paths.is_empty() {
            return Ok(SortedStream::InMemory(self.buffer.into_iter()));
        }
        // Residue becomes one more "spill" run read straight from memory.
        let mut runs: Vec<Run<T>> = Vec::with_capacity(self.spill_paths.len() + 1);
        if !self.buffer.is_empty() {
            runs.push(Run::Memory(self.buffer.into_iter()));
        }
        for path in &self.spill_paths {
            let file = File::open(path)
                .with_context(|| format!("opening spill file {}", path.display()))?;
            let reader = BufReader::with_capacity(1 << 18, FrameDecoder::new(file));
            runs.push(Run::Disk(reader));
        }
        let mut heap = BinaryHeap::with_capacity(runs.len());
        for (idx, run) in runs.iter_mut().enumerate() {
            if let Some(record) = run.next()? {
                heap.push(HeapItem { record, run_idx: idx });
            }
        }
        Ok(SortedStream::Merged(MergeIter { runs, heap }))
    }
}

enum Run<T: SortRecord> {
    Memory(std::vec::IntoIter<T>),
    Disk(BufReader<FrameDecoder<File>>),
}

impl<T: SortRecord> Run<T> {
    fn next(&mut self) -> Result<Option<T>> {
        match self {
            Run::Memory(it) => Ok(it.next()),
            Run::Disk(r) => Ok(T::read_from(r)?),
        }
    }
}

struct HeapItem<T: SortRecord> {
    record: T,
    run_idx: usize,
}

impl<T: SortRecord> PartialEq for HeapItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}
impl<T: SortRecord> Eq for HeapItem<T> {}
impl<T: SortRecord> PartialOrd for HeapItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T: SortRecord> Ord for HeapItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest record on top.
        other.record.cmp(&self.record)
    }
}

/// Iterator performing the k-way merge across spilled runs plus residue.
pub struct MergeIter<T: SortRecord> {
    runs: Vec<Run<T>>,
    heap: BinaryHeap<HeapItem<T>>,
}

impl<T: SortRecord> Iterator for MergeIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.heap.pop()?;
        let refill = self.runs[item.run_idx].next();
        match refill {
            Ok(Some(next_record)) => self.heap.push(HeapItem { record: next_record, run_idx: item.run_idx }),
            Ok(None) => {}
            Err(e) => return Some(Err(e)),
        }
        Some(Ok(item.record))
    }
}

/// A fully sorted stream of records, yielded by [`ExternalSorter::finish`].
pub enum SortedStream<T: SortRecord> {
    InMemory(std::vec::IntoIter<T>),
    Merged(MergeIter<T>),
}

impl<T: SortRecord> Iterator for SortedStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SortedStream::InMemory(it) => it.next().map(Ok),
            SortedStream::Merged(it) => it.next(),
        }
    }
}

/// Convenience: build an external sorter rooted at one of several candidate
/// temp directories (single dir in this implementation; kept as a `&[PathBuf]`
/// to mirror the spec's round-robin contract for future multi-volume use).
pub fn pick_tmp_dir(dirs: &[PathBuf]) -> &Path {
    &dirs[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_small_batch_in_memory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::<u64>::new(100, tmp.path(), 8000);
        for v in [5u64, 1, 4, 2, 3] {
            sorter.add(v).unwrap();
        }
        let sorted: Vec<u64> = sorter.finish().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(sorted, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn spills_and_merges_across_batches() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::<u64>::new(4, tmp.path(), 8000);
        let mut values: Vec<u64> = (0..37).rev().collect();
        for v in values.drain(..) {
            sorter.add(v).unwrap();
        }
        let sorted: Vec<u64> = sorter.finish().unwrap().map(|r| r.unwrap()).collect();
        let expected: Vec<u64> = (0..37).collect();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn empty_sorter_yields_empty_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let sorter = ExternalSorter::<u64>::new(4, tmp.path(), 8000);
        let sorted: Vec<u64> = sorter.finish().unwrap().map(|r| r.unwrap()).collect();
        assert!(sorted.is_empty());
    }

    #[test]
    fn respects_spill_file_budget() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sorter = ExternalSorter::<u64>::new(1, tmp.path(), 2);
        assert!(sorter.add(1).is_ok());
        assert!(sorter.add(2).is_ok());
        // Third spill would exceed the 2-file budget.
        assert!(sorter.add(3).is_err());
    }
}
