//! Pass 3: drives the [`crate::merger::IndexMerger`] cursors against a third
//! independent read of the input and emits the final, duplicate-flagged
//! alignment stream (spec §4.5, SPEC_FULL §4.6).
//!
//! Two code paths, chosen once per run rather than per record:
//! - **Fast path** (no `DT`/`RR`/`DS` tags requested): the record's raw BAM
//!   bytes are copied through with the duplicate flag bit patched in place.
//! - **Slow path** (any tagging requested): the record is rebuilt through
//!   `noodles`' owned [`noodles::sam::alignment::RecordBuf`] so tags can be
//!   inserted, then re-serialized.
//!
//! Every record - including secondary/supplementary alignments - is run
//! through the same cursor decision. Under coordinate-ordered input this
//! naturally never matches a secondary/supplementary record's file position
//! (signatures are never built for them), and under query-name-ordered
//! input the cursors' "sticky" semantics naturally inherit the primary's
//! decision (spec testable property 7, scenario S4).

use crate::args::{Args, TaggingPolicy};
use crate::detector::RepresentativeInfo;
use crate::header::{LibraryResolver, SortOrder};
use crate::merger::IndexMerger;
use crate::metrics::MetricsAccumulator;
use anyhow::{Context, Result};
use noodles::bam;
use noodles::bgzf::io::Writer as BgzfWriter;
use noodles::sam::alignment::io::Write as SamWrite;
use noodles::sam::alignment::record::data::field::{Tag, Value};
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::RecordBuf;
use noodles::sam::header::Header as SamHeader;
use bstr::ByteSlice;
use std::io::{Read, Write};

/// `DT` tag values (spec §6).
const DT_LIBRARY: &str = "LB";
const DT_SEQUENCING: &str = "SQ";

pub const DT_TAG: Tag = Tag::Other([b'D', b'T']);
pub const RR_TAG: Tag = Tag::Other([b'R', b'R']);
pub const DS_TAG: Tag = Tag::Other([b'D', b'S']);

pub struct WriterConfig {
    pub tagging_policy: TaggingPolicy,
    pub tag_representative_read: bool,
    pub remove_duplicates: bool,
    pub remove_sequencing_duplicates: bool,
    pub sort_order: SortOrder,
}

impl WriterConfig {
    pub fn from_args(args: &Args, sort_order: SortOrder) -> Self {
        Self {
            tagging_policy: args.tagging_policy,
            tag_representative_read: args.tag_representative_read,
            remove_duplicates: args.remove_duplicates,
            remove_sequencing_duplicates: args.remove_sequencing_duplicates,
            sort_order,
        }
    }

    /// Whether any record may need the slow, tag-inserting rebuild path.
    fn needs_tagging(&self) -> bool {
        self.tagging_policy != TaggingPolicy::DontTag || self.tag_representative_read
    }
}

/// Runs Pass 3 to completion: reads every record from `reader` in order,
/// consults `merger` for each one, and writes the kept/flagged records to
/// `writer`. Returns the number of records written (post removal).
///
/// Also tallies `UNMAPPED_READS` and `SECONDARY_OR_SUPPLEMENTARY_RDS` into
/// `metrics`: pass 1 breaks out of its loop at the first unmapped record
/// under coordinate-ordered input (spec §4.3), so it cannot completely
/// account for the trailing unmapped block (spec scenario S6). Pass 3
/// re-reads every record unconditionally and is the only pass guaranteed to
/// see all of them.
pub fn run_pass3<R, D, O, Rep>(
    reader: &mut bam::io::Reader<R>,
    header: &SamHeader,
    writer: &mut BgzfWriter<std::fs::File>,
    merger: &mut IndexMerger<D, O, Rep>,
    cfg: &WriterConfig,
    resolver: &LibraryResolver,
    metrics: &mut MetricsAccumulator,
) -> Result<u64>
where
    R: Read,
    D: Iterator<Item = Result<u64>>,
    O: Iterator<Item = Result<u64>>,
    Rep: Iterator<Item = Result<RepresentativeInfo>>,
{
    let needs_tagging = cfg.needs_tagging();
    let mut written: u64 = 0;

    for (index, result) in reader.records().enumerate() {
        let index = index as u64;
        let record = result.context("reading alignment record in pass 3")?;
        let name = record.name().map(|n| n.as_ref().to_vec()).unwrap_or_default();
        let flags = record.flags();

        if flags.is_unmapped() {
            let (library_id, _) = resolver.resolve(&record);
            metrics.entry(library_id).unmapped_reads += 1;
        } else if flags.is_secondary() || flags.is_supplementary() {
            let (library_id, _) = resolver.resolve(&record);
            metrics.entry(library_id).secondary_or_supplementary += 1;
        }

        let decision = merger.decide(index, &name)?;

        if (cfg.remove_duplicates && decision.is_duplicate)
            || (cfg.remove_sequencing_duplicates && decision.is_optical_duplicate)
        {
            continue;
        }

        if !needs_tagging {
            let mut data = record_to_bytes(header, &record)?;
            toggle_duplicate_flag(&mut data, decision.is_duplicate);
            writer.write_all(&data)?;
            written += 1;
            continue;
        }

        let representative = if cfg.tag_representative_read {
            merger.representative_for(index, &name)?
        } else {
            None
        };

        let mut buf = RecordBuf::try_from_alignment_record(header, &record)
            .context("rebuilding record for tag insertion")?;

        let mut flags = record.flags();
        flags.set(Flags::DUPLICATE, decision.is_duplicate);
        *buf.flags_mut() = flags;

        if decision.is_duplicate {
            let dt = match cfg.tagging_policy {
                TaggingPolicy::DontTag => None,
                TaggingPolicy::OpticalOnly => decision.is_optical_duplicate.then_some(DT_SEQUENCING),
                TaggingPolicy::All => Some(if decision.is_optical_duplicate { DT_SEQUENCING } else { DT_LIBRARY }),
            };
            if let Some(dt) = dt {
                buf.data_mut().insert(DT_TAG, Value::from(dt));
            }
        }

        if let Some((rep_name, set_size)) = representative {
            let name_str = rep_name.as_bytes().to_str_lossy().into_owned();
            buf.data_mut().insert(RR_TAG, Value::from(name_str));
            buf.data_mut().insert(DS_TAG, Value::from(set_size as i32));
        }

        let mut data = Vec::new();
        {
            let mut inner = bam::io::Writer::from(&mut data);
            inner.write_alignment_record(header, &buf)?;
        }
        writer.write_all(&data)?;
        written += 1;
    }

    Ok(written)
}

/// Offset of the flag field in a BAM record's binary format: after
/// `ref_id` (4 bytes), `pos` (4 bytes), and `bin_mq_nl` (4 bytes).
pub const FLAG_OFFSET: usize = 12;

/// The `DUPLICATE` flag bit in BAM's on-disk flag encoding.
pub const DUPLICATE_FLAG: u16 = 0x400;

/// Patches the `DUPLICATE` flag bit directly in a record's serialized BAM
/// bytes, leaving every other bit untouched. Returns `None` if `data` is too
/// short to contain a flag field (caller error, never expected in practice).
#[inline]
pub fn toggle_duplicate_flag(data: &mut [u8], is_duplicate: bool) -> Option<u16> {
    if data.len() < FLAG_OFFSET + 2 {
        return None;
    }
    let flag = u16::from_le_bytes([data[FLAG_OFFSET], data[FLAG_OFFSET + 1]]);
    let new_flag = if is_duplicate { flag | DUPLICATE_FLAG } else { flag & !DUPLICATE_FLAG };
    data[FLAG_OFFSET] = new_flag as u8;
    data[FLAG_OFFSET + 1] = (new_flag >> 8) as u8;
    Some(new_flag)
}

pub fn record_to_bytes(header: &SamHeader, record: &bam::Record) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    {
        let mut writer = bam::io::Writer::from(&mut data);
        writer.write_alignment_record(header, record)?;
    }
    Ok(data)
}

pub fn write_header(writer: &mut BgzfWriter<std::fs::File>, header: &SamHeader) -> Result<()> {
    let mut header_buf = Vec::new();
    {
        let mut writer = bam::io::Writer::from(&mut header_buf);
        writer.write_header(header)?;
    }
    writer.write_all(&header_buf)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_duplicate_flag_sets_bit() {
        let mut data = [0u8; 20];
        let result = toggle_duplicate_flag(&mut data, true);
        assert_eq!(result, Some(DUPLICATE_FLAG));
        assert_eq!(u16::from_le_bytes([data[FLAG_OFFSET], data[FLAG_OFFSET + 1]]), DUPLICATE_FLAG);
    }

    #[test]
    fn toggle_duplicate_flag_clears_bit_preserving_others() {
        let mut data = [0u8; 20];
        data[FLAG_OFFSET] = 0x02; // PAIRED
        data[FLAG_OFFSET + 1] = 0x04; // DUPLICATE high byte
        let result = toggle_duplicate_flag(&mut data, false);
        assert_eq!(result, Some(0x0002));
        assert_eq!(data[FLAG_OFFSET], 0x02);
    }

    #[test]
    fn toggle_duplicate_flag_rejects_short_buffer() {
        let mut data = [0u8; 4];
        assert!(toggle_duplicate_flag(&mut data, true).is_none());
    }
}
