//! Pass 1: streams alignment records, emits fragment and pair signatures
//! into their respective external sorters (spec §4.3).

use crate::external_sort::ExternalSorter;
use crate::header::{BarcodeConfig, LibraryResolver, SortOrder};
use crate::mate_map::{MateKey, UnmatchedMateMap};
use crate::metrics::MetricsAccumulator;
use crate::position::unclipped_5p_position;
use crate::scoring::ScoringStrategy;
use crate::signature::{BarcodeTriple, FixedName, FragmentSignature, OpticalLocation, Orientation, PairSignature};
use anyhow::{Context, Result};
use noodles::bam;

/// Partial pair information stored in the unmatched-mate map until the
/// second mate arrives.
#[derive(Clone)]
struct PendingMate {
    library_id: i32,
    ref_id: i32,
    coord: i32,
    reverse: bool,
    score: u32,
    index: u64,
    is_first_of_pair: bool,
    own_barcode: BarcodeTriple,
    optical: OpticalLocation,
    rg_ordinal: i32,
}

pub struct Pass1Result {
    pub pair_sorter: ExternalSorter<PairSignature>,
    pub fragment_sorter: ExternalSorter<FragmentSignature>,
    /// Count of records actually visited (may be less than the file's total
    /// record count when the input is coordinate-ordered and a trailing
    /// unmapped block was hit).
    pub records_visited: u64,
}

pub struct Pass1Config<'a> {
    pub sort_order: SortOrder,
    pub resolver: &'a LibraryResolver,
    pub scoring: &'a dyn ScoringStrategy,
    pub barcodes: BarcodeConfig,
    pub read_name_regex: Option<&'a regex::Regex>,
    pub batch_size: usize,
    pub tmp_dir: std::path::PathBuf,
    pub max_open_spill_files: usize,
    pub max_file_handles_for_read_ends_map: usize,
}

fn optical_location(cfg: &Pass1Config, record: &bam::Record, rg_ordinal: i32) -> OpticalLocation {
    let Some(re) = cfg.read_name_regex else {
        return OpticalLocation::sentinel();
    };
    let Some(name) = record.name() else {
        return OpticalLocation::sentinel();
    };
    match crate::header::parse_optical_coordinates(re, name.as_ref()) {
        Some((tile, x, y)) => OpticalLocation { read_group_ordinal: rg_ordinal, tile, x, y },
        None => OpticalLocation::sentinel(),
    }
}

/// Runs Pass 1 over every record in `reader`, in stream order.
pub fn run_pass1<R: std::io::Read>(
    reader: &mut bam::io::Reader<R>,
    cfg: &Pass1Config,
    metrics: &mut MetricsAccumulator,
) -> Result<Pass1Result> {
    let mut pair_sorter = ExternalSorter::<PairSignature>::new(cfg.batch_size, &cfg.tmp_dir, cfg.max_open_spill_files);
    let mut fragment_sorter =
        ExternalSorter::<FragmentSignature>::new(cfg.batch_size, &cfg.tmp_dir, cfg.max_open_spill_files);

    let mut pending: UnmatchedMateMap<PendingMate> = UnmatchedMateMap::new(cfg.max_file_handles_for_read_ends_map);
    let mut last_query_name: Option<Vec<u8>> = None;
    let mut query_name_index: u64 = 0;
    let mut records_visited: u64 = 0;

    for (index, result) in reader.records().enumerate() {
        let index = index as u64;
        let record = result.context("reading alignment record in pass 1")?;
        let flags = record.flags();

        let qname = record.name().map(|n| n.as_ref().to_vec());
        if qname != last_query_name {
            query_name_index = index;
            last_query_name = qname.clone();
        }
        let index_for_read = match cfg.sort_order {
            SortOrder::QueryName => query_name_index,
            SortOrder::Coordinate => index,
        };

        let ref_id = record.reference_sequence_id().transpose()?.map(|i| i as i32).unwrap_or(-1);

        if flags.is_unmapped() {
            if cfg.sort_order == SortOrder::Coordinate && ref_id == -1 {
                break;
            }
            // UNMAPPED_READS is tallied in pass 3, which re-reads every
            // record unconditionally; pass 1 breaks early on the trailing
            // unmapped block under coordinate order (spec §4.3, scenario
            // S6) and so cannot be the source of truth for this count.
            records_visited = index + 1;
            continue;
        }
        if flags.is_secondary() || flags.is_supplementary() {
            // SECONDARY_OR_SUPPLEMENTARY_RDS is likewise tallied in pass 3,
            // for the same reason.
            records_visited = index + 1;
            continue;
        }

        let (library_id, rg_ordinal) = cfg.resolver.resolve(&record);
        let coord = unclipped_5p_position(&record)?;
        let score = cfg.scoring.score(&record);
        let reverse = flags.is_reverse_complemented();
        let barcodes = cfg.barcodes.triple_for_record(&record);
        let optical = optical_location(cfg, &record, rg_ordinal);
        let name = qname.as_deref().unwrap_or(b"");

        let mate_ref_id = if flags.is_segmented() && !flags.is_mate_unmapped() {
            record.mate_reference_sequence_id().transpose()?.map(|i| i as i32)
        } else {
            None
        };

        fragment_sorter.add(FragmentSignature {
            library_id,
            barcodes,
            read1_ref_id: ref_id,
            read1_coord: coord,
            orientation: Orientation::lone(reverse),
            read2_ref_id: mate_ref_id.unwrap_or(-1),
            score,
            read1_index: index_for_read,
            optical,
            representative_name: FixedName::from_bytes(name),
        })?;

        if flags.is_segmented() && !flags.is_mate_unmapped() {
            let rg_id = crate::header::read_group_id(&record).unwrap_or_default();
            let key = MateKey::new(mate_ref_id.unwrap_or(-1), &rg_id, name);
            if let Some(mate) = pending.remove(&key) {
                let (r1_ref, r1_coord, r1_rev, r1_idx, r2_ref, r2_coord, r2_rev, r2_idx) =
                    if (mate.ref_id, mate.coord) <= (ref_id, coord) {
                        (mate.ref_id, mate.coord, mate.reverse, mate.index, ref_id, coord, reverse, index_for_read)
                    } else {
                        (ref_id, coord, reverse, index_for_read, mate.ref_id, mate.coord, mate.reverse, mate.index)
                    };
                let (first_reverse, second_reverse) =
                    if mate.is_first_of_pair { (mate.reverse, reverse) } else { (reverse, mate.reverse) };
                let general_barcode = mate.own_barcode.barcode.or(barcodes.barcode);
                let (read_one_barcode, read_two_barcode) = if mate.is_first_of_pair {
                    (mate.own_barcode.read_one_barcode, barcodes.read_two_barcode)
                } else {
                    (barcodes.read_one_barcode, mate.own_barcode.read_two_barcode)
                };

                pair_sorter.add(PairSignature {
                    library_id,
                    barcodes: BarcodeTriple { barcode: general_barcode, read_one_barcode, read_two_barcode },
                    read1_ref_id: r1_ref,
                    read1_coord: r1_coord,
                    orientation: Orientation::paired(r1_rev, r2_rev),
                    read2_ref_id: r2_ref,
                    read2_coord: r2_coord,
                    score: score + mate.score,
                    read1_index: r1_idx,
                    read2_index: r2_idx,
                    optical,
                    orientation_for_optical: Orientation::paired(first_reverse, second_reverse),
                    // Open-behavior note (spec §9): set from the *completing*
                    // (second-observed) mate, not the truly first.
                    representative_name: FixedName::from_bytes(name),
                })?;
                metrics.entry(library_id).read_pairs_examined += 2;
            } else {
                pending.put(
                    key,
                    PendingMate {
                        library_id,
                        ref_id,
                        coord,
                        reverse,
                        score,
                        index: index_for_read,
                        is_first_of_pair: flags.is_first_segment(),
                        own_barcode: barcodes,
                        optical,
                        rg_ordinal,
                    },
                );
            }
        } else {
            metrics.entry(library_id).unpaired_reads_examined += 1;
        }

        records_visited = index + 1;
    }

    // Remaining pending mates never found their partner (mate turned out
    // unmapped downstream, or truncated input); treat each as an unpaired
    // fragment already accounted for by its own fragment signature above.
    for (_, mate) in pending.drain() {
        metrics.entry(mate.library_id).unpaired_reads_examined += 1;
    }

    Ok(Pass1Result { pair_sorter, fragment_sorter, records_visited })
}
