//! Unclipped 5'-end coordinate computation (spec §3, §4.3).

use anyhow::Result;
use noodles::bam;
use noodles::sam::alignment::record::cigar::op::Kind;

/// Unclipped 5' coordinate: alignment start minus leading soft/hard clips
/// on the forward strand, alignment end plus trailing soft/hard clips on
/// the reverse strand. Returns `-1` for an unmapped read.
pub fn unclipped_5p_position(record: &bam::Record) -> Result<i32> {
    let start = record
        .alignment_start()
        .transpose()?
        .map(|p| p.get() as i32 - 1)
        .unwrap_or(-1);
    if start < 0 {
        return Ok(-1);
    }
    let cigar = record.cigar();

    if !record.flags().is_reverse_complemented() {
        let mut clipped = 0;
        for op in cigar.iter() {
            let op = op?;
            match op.kind() {
                Kind::SoftClip | Kind::HardClip => clipped += op.len() as i32,
                _ => break,
            }
        }
        Ok(start - clipped)
    } else {
        let mut ref_span = 0;
        for op in cigar.iter() {
            let op = op?;
            if op.kind().consumes_reference() {
                ref_span += op.len() as i32;
            }
        }
        let ops: Vec<_> = cigar.iter().collect::<Result<_, _>>()?;
        let mut clipped_end = 0;
        for op in ops.iter().rev() {
            match op.kind() {
                Kind::SoftClip | Kind::HardClip => clipped_end += op.len() as i32,
                _ => break,
            }
        }
        Ok(start + ref_span + clipped_end)
    }
}
