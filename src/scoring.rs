//! `DUPLICATE_SCORING_STRATEGY`: computes the per-read score used to pick a
//! duplicate group's representative (spec §3, §6).

use noodles::bam;

/// Quality scores below this value don't count toward a read's score -
/// matches the historical default used by comparable duplicate markers.
const MIN_QUALITY: u8 = 15;

/// A pluggable scoring function; the only strategy this crate ships is the
/// default "sum of base qualities >= threshold", but it's factored out as a
/// named function (rather than inlined in the builder) so an alternative
/// strategy can be swapped in without touching Pass 1's control flow.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, record: &bam::Record) -> u32;
}

/// Sum of base qualities at or above [`MIN_QUALITY`]; the default strategy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SumOfBaseQualities;

impl ScoringStrategy for SumOfBaseQualities {
    fn score(&self, record: &bam::Record) -> u32 {
        record
            .quality_scores()
            .as_ref()
            .iter()
            .map(|&q| u8::from(q))
            .filter(|&q| q >= MIN_QUALITY)
            .map(|q| q as u32)
            .sum()
    }
}
