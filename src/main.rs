use anyhow::{Context, Result};
use clap::Parser;
use noodles::bam;
use noodles::bgzf::io::Writer as BgzfWriter;
use std::fs::File;
use std::time::Instant;
use tempfile::Builder;

#[cfg(not(windows))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod args;
mod builder;
mod detector;
mod external_sort;
mod header;
mod mate_map;
mod merger;
mod metrics;
mod optical;
mod position;
mod scoring;
mod signature;
mod utils;
mod writer;

use args::{effective_threads, Args};
use builder::{run_pass1, Pass1Config};
use detector::{run_pass2, Pass2Config};
use header::{BarcodeConfig, LibraryResolver};
use merger::IndexMerger;
use metrics::MetricsAccumulator;
use scoring::SumOfBaseQualities;
use utils::format_duration_verbose;
use writer::{run_pass3, write_header, WriterConfig};

/// Batch size used by the index/representative-info sorters, which hold far
/// smaller records than the signature sorters and so can afford a bigger
/// in-memory slice per spill.
const INDEX_BATCH_SIZE: usize = 8_000_000;

/// Cap on spill files per external sorter; distinct from
/// `--max-file-handles-for-read-ends-map`, which bounds the unmatched-mate
/// map instead (spec §6).
const EXTERNAL_SORTER_MAX_SPILL_FILES: usize = 8000;

fn main() -> Result<()> {
    let args = Args::parse();
    let threads = effective_threads(&args);
    if threads > 1 {
        rayon::ThreadPoolBuilder::new().num_threads(threads).build_global().ok();
    }
    eprintln!(
        "markdup-engine: using {} threads{}",
        threads,
        if args.single_threaded { " (single-threaded mode)" } else { "" }
    );

    let total_start = Instant::now();
    let tmp_dir = Builder::new()
        .prefix("markdup_rust")
        .tempdir_in(args.tmp_dir.clone().unwrap_or_else(std::env::temp_dir))
        .context("creating temp directory for spill files")?;

    let read_name_regex = match &args.read_name_regex {
        Some(pattern) => Some(regex::Regex::new(pattern).context("parsing READ_NAME_REGEX")?),
        None => {
            eprintln!("markdup-engine: READ_NAME_REGEX not set, optical-duplicate classification disabled");
            None
        }
    };

    let barcodes = BarcodeConfig {
        barcode_tag: args.barcode_tag.as_deref().map(header::parse_tag).transpose()?,
        read_one_tag: args.read_one_barcode_tag.as_deref().map(header::parse_tag).transpose()?,
        read_two_tag: args.read_two_barcode_tag.as_deref().map(header::parse_tag).transpose()?,
    };

    let mut metrics = MetricsAccumulator::new();

    // --- Pass 1: signature construction -----------------------------------
    let pass1_start = Instant::now();
    eprintln!("pass 1: building fragment and pair signatures...");

    let mut reader1 = bam::io::reader::Builder::default()
        .build_from_path(&args.input)
        .with_context(|| format!("opening input {}", args.input))?;
    let sam_header = reader1.read_header().context("reading input header")?;
    let sort_order = header::detect_sort_order(&sam_header)?;
    let resolver = LibraryResolver::from_header(&sam_header);
    let scoring = SumOfBaseQualities;

    let pass1_cfg = Pass1Config {
        sort_order,
        resolver: &resolver,
        scoring: &scoring,
        barcodes,
        read_name_regex: read_name_regex.as_ref(),
        batch_size: args.batch_size,
        tmp_dir: tmp_dir.path().to_path_buf(),
        max_open_spill_files: EXTERNAL_SORTER_MAX_SPILL_FILES,
        max_file_handles_for_read_ends_map: args.max_file_handles_for_read_ends_map,
    };
    let pass1 = run_pass1(&mut reader1, &pass1_cfg, &mut metrics)?;
    eprintln!(
        "  pass 1 done in {} ({} records visited)",
        format_duration_verbose(pass1_start.elapsed()),
        pass1.records_visited
    );

    let pair_stream = pass1.pair_sorter.finish().context("sorting pair signatures")?;
    let fragment_stream = pass1.fragment_sorter.finish().context("sorting fragment signatures")?;

    // --- Pass 2: duplicate detection ---------------------------------------
    let pass2_start = Instant::now();
    eprintln!("pass 2: grouping signatures and marking duplicates...");

    let pass2_cfg = Pass2Config {
        tag_representative_read: args.tag_representative_read,
        optical_indexing_enabled: true,
        optical_pixel_distance: args.optical_duplicate_pixel_distance,
        tmp_dir: tmp_dir.path().to_path_buf(),
        batch_size: INDEX_BATCH_SIZE,
        max_open_spill_files: EXTERNAL_SORTER_MAX_SPILL_FILES,
    };
    let pass2 = run_pass2(pair_stream, fragment_stream, &pass2_cfg, &mut metrics)?;
    eprintln!("  pass 2 done in {}", format_duration_verbose(pass2_start.elapsed()));

    let duplicate_stream = pass2.duplicate_index.finish().context("sorting duplicate-index stream")?;
    let optical_stream = pass2.optical_index.finish().context("sorting optical-index stream")?;
    let representative_stream =
        pass2.representative_info.finish().context("sorting representative-info stream")?;

    let mut merger = IndexMerger::new(duplicate_stream, optical_stream, representative_stream, sort_order)?;

    // --- Pass 3: write the marked alignment stream -------------------------
    let pass3_start = Instant::now();
    eprintln!("pass 3: writing marked alignment stream...");

    let mut reader3 = bam::io::reader::Builder::default()
        .build_from_path(&args.input)
        .with_context(|| format!("re-opening input {} for pass 3", args.input))?;
    reader3.read_header().context("re-reading input header")?;

    let out_file = File::create(&args.output).with_context(|| format!("creating output {}", args.output))?;
    let mut bgzf_writer = BgzfWriter::new(out_file);
    write_header(&mut bgzf_writer, &sam_header)?;

    let writer_cfg = WriterConfig::from_args(&args, sort_order);
    let written =
        run_pass3(&mut reader3, &sam_header, &mut bgzf_writer, &mut merger, &writer_cfg, &resolver, &mut metrics)?;
    bgzf_writer.finish().context("finishing BGZF output stream")?;
    eprintln!(
        "  pass 3 done in {} ({} records written)",
        format_duration_verbose(pass3_start.elapsed()),
        written
    );

    metrics.write_tsv(&args.metrics_file, &resolver.library_names).context("writing metrics file")?;

    eprintln!("done in {}", format_duration_verbose(total_start.elapsed()));
    Ok(())
}
