use crate::blue::params::HealingParams;
use crate::blue::read_props::ReadProps;
use crate::blue::sequence::Sequence;
use crate::blue::Tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimOutcome {
    Untouched,
    Trimmed,
    /// Nothing but adapter remained.
    TooShort,
}

/// Remove contiguous leading/trailing runs of high-depth-unbalanced
/// k-mers — empirically adapter or contaminant sequence — and re-measure
/// the read. A run of r windows spans r+k−1 bases.
pub fn trim_hdub_ends(
    seq: &mut Sequence,
    props: &mut ReadProps,
    tables: &Tables,
    params: &HealingParams,
) -> TrimOutcome {
    if !props.deep_unbalanced_present {
        return TrimOutcome::Untouched;
    }
    let k = tables.mer_size();
    let is_hdub = |packed: &Option<u64>| packed.map_or(false, |p| tables.kmers.hdub_contains(p));

    let mut lead = 0;
    while lead < props.mer_count && is_hdub(&props.mers[lead]) {
        lead += 1;
    }
    let mut trail = 0;
    while trail < props.mer_count - lead && is_hdub(&props.mers[props.mer_count - 1 - trail]) {
        trail += 1;
    }
    if lead == 0 && trail == 0 {
        return TrimOutcome::Untouched;
    }

    let lead_bases = if lead > 0 { lead + k - 1 } else { 0 };
    let trail_bases = if trail > 0 { trail + k - 1 } else { 0 };
    if lead_bases + trail_bases + k > seq.len() {
        return TrimOutcome::TooShort;
    }
    seq.truncate(seq.len() - trail_bases);
    seq.trim_start(lead_bases);
    props.measure(seq, tables, params);
    TrimOutcome::Trimmed
}
