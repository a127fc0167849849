// Command-line argument parsing
use clap::{Parser, ValueEnum};

/// `DT` tag emission policy (spec §6 `TAGGING_POLICY`).
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[clap(rename_all = "kebab-case")]
pub enum TaggingPolicy {
    #[default]
    DontTag,
    OpticalOnly,
    All,
}

#[derive(Parser, Debug)]
#[command(name = "markdup-engine", about = "Duplicate-read marking engine for coordinate- or query-name-ordered BAM")]
pub struct Args {
    #[arg(short, long)]
    pub input: String,
    #[arg(short, long)]
    pub output: String,
    #[arg(long, default_value = "metrics.txt")]
    pub metrics_file: std::path::PathBuf,

    #[arg(short = 'r', long)]
    pub remove_duplicates: bool,
    #[arg(long)]
    pub remove_sequencing_duplicates: bool,

    #[arg(long, value_enum, default_value_t = TaggingPolicy::DontTag)]
    pub tagging_policy: TaggingPolicy,
    #[arg(long)]
    pub tag_representative_read: bool,

    #[arg(long)]
    pub barcode_tag: Option<String>,
    #[arg(long)]
    pub read_one_barcode_tag: Option<String>,
    #[arg(long)]
    pub read_two_barcode_tag: Option<String>,

    #[arg(long)]
    pub read_name_regex: Option<String>,
    #[arg(long, default_value_t = crate::optical::DEFAULT_PIXEL_DISTANCE)]
    pub optical_duplicate_pixel_distance: i32,

    #[arg(long, default_value_t = 8000)]
    pub max_file_handles_for_read_ends_map: usize,

    #[arg(short = 't', long, default_value_t = num_cpus())]
    pub threads: usize,
    #[arg(long, default_value_t = 2_000_000)]
    pub batch_size: usize,
    #[arg(long)]
    pub tmp_dir: Option<std::path::PathBuf>,
    /// Force single-threaded mode (useful for Windows or I/O-bound workloads)
    #[arg(long)]
    pub single_threaded: bool,
}

impl Args {
    pub fn barcodes_in_use(&self) -> bool {
        self.barcode_tag.is_some() || self.read_one_barcode_tag.is_some() || self.read_two_barcode_tag.is_some()
    }

    pub fn optical_clustering_enabled(&self) -> bool {
        self.read_name_regex.is_some()
    }
}

pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Get effective thread count based on args and platform
#[inline]
pub fn effective_threads(args: &Args) -> usize {
    if args.single_threaded {
        1
    } else {
        args.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            input: "test.bam".to_string(),
            output: "out.bam".to_string(),
            metrics_file: "metrics.txt".into(),
            remove_duplicates: false,
            remove_sequencing_duplicates: false,
            tagging_policy: TaggingPolicy::DontTag,
            tag_representative_read: false,
            barcode_tag: None,
            read_one_barcode_tag: None,
            read_two_barcode_tag: None,
            read_name_regex: None,
            optical_duplicate_pixel_distance: 100,
            max_file_handles_for_read_ends_map: 8000,
            threads: 4,
            batch_size: 2_000_000,
            tmp_dir: None,
            single_threaded: false,
        }
    }

    #[test]
    fn test_args_default_threads() {
        let args = base_args();
        assert_eq!(args.input, "test.bam");
        assert_eq!(effective_threads(&args), 4);
    }

    #[test]
    fn test_single_threaded_flag() {
        let mut args = base_args();
        args.threads = 8;
        args.single_threaded = true;
        assert_eq!(effective_threads(&args), 1);
    }

    #[test]
    fn barcodes_in_use_requires_at_least_one_tag() {
        let mut args = base_args();
        assert!(!args.barcodes_in_use());
        args.barcode_tag = Some("BX".to_string());
        assert!(args.barcodes_in_use());
    }

    #[test]
    fn optical_clustering_requires_regex() {
        let mut args = base_args();
        assert!(!args.optical_clustering_enabled());
        args.read_name_regex = Some(r"(?:.*:)?([0-9]+):([0-9]+):([0-9]+)$".to_string());
        assert!(args.optical_clustering_enabled());
    }
}
