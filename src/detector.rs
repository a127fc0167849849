//! Pass 2: consumes the sorted pair and fragment signature streams,
//! groups comparable signatures into duplicate sets, and emits file-index
//! decisions into three index sorters (spec §4.4).

use crate::external_sort::{ExternalSorter, SortRecord};
use crate::metrics::MetricsAccumulator;
use crate::optical::find_optical_clusters;
use crate::signature::{FixedName, FragmentSignature, OpticalLocation, PairSignature};
use anyhow::Result;
use std::io::{Read, Write};

/// One row of the representative-info stream: every member of a duplicate
/// set points at the same representative read name and set size.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepresentativeInfo {
    pub file_index: u64,
    pub set_size: u64,
    pub representative_name: FixedName,
}

impl SortRecord for RepresentativeInfo {
    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.file_index.to_le_bytes())?;
        w.write_all(&self.set_size.to_le_bytes())?;
        self.representative_name.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> std::io::Result<Option<Self>> {
        let mut buf8 = [0u8; 8];
        if r.read_exact(&mut buf8).is_err() {
            return Ok(None);
        }
        let file_index = u64::from_le_bytes(buf8);
        r.read_exact(&mut buf8)?;
        let set_size = u64::from_le_bytes(buf8);
        let representative_name = FixedName::read_from(r)?;
        Ok(Some(Self { file_index, set_size, representative_name }))
    }
}

pub struct Pass2Config {
    pub tag_representative_read: bool,
    pub optical_indexing_enabled: bool,
    pub optical_pixel_distance: i32,
    pub tmp_dir: std::path::PathBuf,
    pub batch_size: usize,
    pub max_open_spill_files: usize,
}

pub struct Pass2Result {
    pub duplicate_index: ExternalSorter<u64>,
    pub optical_index: ExternalSorter<u64>,
    pub representative_info: ExternalSorter<RepresentativeInfo>,
}

fn new_sorters(cfg: &Pass2Config) -> (ExternalSorter<u64>, ExternalSorter<u64>, ExternalSorter<RepresentativeInfo>) {
    (
        ExternalSorter::new(cfg.batch_size, &cfg.tmp_dir, cfg.max_open_spill_files),
        ExternalSorter::new(cfg.batch_size, &cfg.tmp_dir, cfg.max_open_spill_files),
        ExternalSorter::new(cfg.batch_size, &cfg.tmp_dir, cfg.max_open_spill_files),
    )
}

/// Runs both sweeps, returning the three populated index sorters.
pub fn run_pass2(
    pair_stream: impl Iterator<Item = Result<PairSignature>>,
    fragment_stream: impl Iterator<Item = Result<FragmentSignature>>,
    cfg: &Pass2Config,
    metrics: &mut MetricsAccumulator,
) -> Result<Pass2Result> {
    let (mut duplicate_index, mut optical_index, mut representative_info) = new_sorters(cfg);

    pair_sweep(pair_stream, cfg, metrics, &mut duplicate_index, &mut optical_index, &mut representative_info)?;
    fragment_sweep(fragment_stream, &mut duplicate_index, metrics)?;

    Ok(Pass2Result { duplicate_index, optical_index, representative_info })
}

fn pair_sweep(
    stream: impl Iterator<Item = Result<PairSignature>>,
    cfg: &Pass2Config,
    metrics: &mut MetricsAccumulator,
    duplicate_index: &mut ExternalSorter<u64>,
    optical_index: &mut ExternalSorter<u64>,
    representative_info: &mut ExternalSorter<RepresentativeInfo>,
) -> Result<()> {
    let mut chunk: Vec<PairSignature> = Vec::new();

    for item in stream {
        let sig = item?;
        if let Some(first) = chunk.first() {
            if !first.comparable(&sig) {
                flush_pair_chunk(
                    std::mem::take(&mut chunk),
                    cfg,
                    metrics,
                    duplicate_index,
                    optical_index,
                    representative_info,
                )?;
            }
        }
        chunk.push(sig);
    }
    flush_pair_chunk(chunk, cfg, metrics, duplicate_index, optical_index, representative_info)?;
    Ok(())
}

fn flush_pair_chunk(
    chunk: Vec<PairSignature>,
    cfg: &Pass2Config,
    metrics: &mut MetricsAccumulator,
    duplicate_index: &mut ExternalSorter<u64>,
    optical_index: &mut ExternalSorter<u64>,
    representative_info: &mut ExternalSorter<RepresentativeInfo>,
) -> Result<()> {
    if chunk.len() <= 1 {
        return Ok(());
    }
    let library_id = chunk[0].library_id;

    // Stable max-by-score: first occurrence wins ties.
    let best_idx = chunk
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.score.cmp(&b.score).then(ib.cmp(ia)))
        .map(|(i, _)| i)
        .unwrap();

    let locations: Vec<OpticalLocation> = chunk.iter().map(|s| s.optical).collect();
    let optical_flags = find_optical_clusters(&locations, best_idx, cfg.optical_pixel_distance);
    let optical_count = optical_flags.iter().filter(|b| **b).count() as u64;
    metrics.entry(library_id).read_pair_optical_duplicates += optical_count * 2;

    for (i, sig) in chunk.iter().enumerate() {
        if i == best_idx {
            continue;
        }
        duplicate_index.add(sig.read1_index)?;
        if sig.read2_index != sig.read1_index {
            duplicate_index.add(sig.read2_index)?;
        }
        metrics.entry(library_id).read_pair_duplicates += 2;
        if optical_flags[i] && cfg.optical_indexing_enabled {
            optical_index.add(sig.read1_index)?;
            if sig.read2_index != sig.read1_index {
                optical_index.add(sig.read2_index)?;
            }
        }
    }

    if cfg.tag_representative_read {
        let representative_name = chunk[best_idx].representative_name;
        let set_size = chunk.len() as u64;
        for sig in &chunk {
            representative_info.add(RepresentativeInfo {
                file_index: sig.read1_index,
                set_size,
                representative_name,
            })?;
        }
    }

    Ok(())
}

fn fragment_sweep(
    stream: impl Iterator<Item = Result<FragmentSignature>>,
    duplicate_index: &mut ExternalSorter<u64>,
    metrics: &mut MetricsAccumulator,
) -> Result<()> {
    let mut chunk: Vec<FragmentSignature> = Vec::new();

    for item in stream {
        let sig = item?;
        if let Some(first) = chunk.first() {
            if !first.comparable(&sig) {
                flush_fragment_chunk(std::mem::take(&mut chunk), duplicate_index, metrics)?;
            }
        }
        chunk.push(sig);
    }
    flush_fragment_chunk(chunk, duplicate_index, metrics)?;
    Ok(())
}

fn flush_fragment_chunk(
    chunk: Vec<FragmentSignature>,
    duplicate_index: &mut ExternalSorter<u64>,
    metrics: &mut MetricsAccumulator,
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    let library_id = chunk[0].library_id;
    let contains_pairs = chunk.iter().any(|s| s.has_mapped_mate());
    let contains_frags = chunk.iter().any(|s| !s.has_mapped_mate());

    if contains_pairs && contains_frags {
        for sig in chunk.iter().filter(|s| !s.has_mapped_mate()) {
            duplicate_index.add(sig.read1_index)?;
            metrics.entry(library_id).unpaired_read_duplicates += 1;
        }
    } else if contains_frags && chunk.len() > 1 {
        let best_idx = chunk
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.score.cmp(&b.score).then(ib.cmp(ia)))
            .map(|(i, _)| i)
            .unwrap();
        for (i, sig) in chunk.iter().enumerate() {
            if i == best_idx {
                continue;
            }
            duplicate_index.add(sig.read1_index)?;
            metrics.entry(library_id).unpaired_read_duplicates += 1;
        }
    }

    Ok(())
}
