use blue::blue::corrector::{CorrectionOutcome, CorrectionResult};
use blue::blue::healer::Healer;
use blue::blue::kmer_table::KmerTable;
use blue::blue::mer;
use blue::blue::params::{HealingParams, LengthPolicy};
use blue::blue::read_props::AbandonReason;
use blue::blue::sequence::Sequence;
use blue::blue::Tables;
use std::collections::BTreeMap;

const K: usize = 9;

/// A 100-base reference whose 9-mers are all canonically distinct, so a
/// depth table built from it behaves like clean single-copy coverage.
const REF: &[u8] = b"GTAAACCTGACATACGTGAACGAAAGCGCCTGAAGACCCCTGACTAGATGTTAATCCCTCCCTAGAAGTAACTAATTGACTCGAGAATATTATTAGCTTA";
/// Nine bases sharing nothing with the reference, used to wreck read heads.
const GARB: &[u8] = b"CCTCGAAAC";
/// Adapter-like sequence, disjoint from the reference.
const ADAPTER: &[u8] = b"CCCCGCGGCATCCGCGGACC";

fn consensus_cells(seqs: &[(&[u8], (u32, u32))]) -> Vec<(u64, u32, u32)> {
    let mut cells = BTreeMap::new();
    for (seq, cell) in seqs {
        for i in 0..=seq.len() - K {
            let packed = mer::pack(&seq[i..i + K]).unwrap();
            let (canon, _) = mer::canonical(packed, K);
            cells.insert(canon, *cell);
        }
    }
    cells.into_iter().map(|(k, (f, r))| (k, f, r)).collect()
}

fn tables_for(seqs: &[(&[u8], (u32, u32))]) -> Tables {
    let records = consensus_cells(seqs);
    let kmers = KmerTable::from_records(K, records.len() as u64, 20, 2, 10, records).unwrap();
    Tables { kmers, pairs: None }
}

fn ref_tables() -> Tables {
    tables_for(&[(REF, (10, 10))])
}

fn base_params() -> HealingParams {
    HealingParams {
        min_reps: 2,
        ..HealingParams::default()
    }
}

fn correct(tables: &Tables, params: &HealingParams, bases: &[u8]) -> (Sequence, CorrectionResult) {
    let mut healer = Healer::new(tables, params);
    let mut seq = Sequence::from_bases(bases);
    let result = healer.correct_read(&mut seq);
    (seq, result)
}

/* --------------------------------------------------------------------- */
/*  clean reads pass through                                             */
/* --------------------------------------------------------------------- */

#[test]
fn clean_read_is_written_unchanged() {
    let tables = ref_tables();
    let (seq, result) = correct(&tables, &base_params(), REF);
    assert_eq!(result.outcome, CorrectionOutcome::Ok);
    assert_eq!(seq.bases(), REF);
    assert_eq!(result.total_fixes(), 0);
}

/* --------------------------------------------------------------------- */
/*  single substitution                                                  */
/* --------------------------------------------------------------------- */

#[test]
fn single_substitution_is_restored() {
    let tables = ref_tables();
    let mut bases = REF.to_vec();
    bases[40] = b'A'; // REF[40] is T
    let (seq, result) = correct(&tables, &base_params(), &bases);

    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.bases(), REF);
    assert_eq!(result.fixes_sub, 1);
    assert_eq!(result.fixes_del + result.fixes_ins + result.fixes_n, 0);
    assert!(result.healed_first_pass);
    assert!(!result.healed_rc_pass);
}

#[test]
fn correction_is_idempotent() {
    let tables = ref_tables();
    let mut bases = REF.to_vec();
    bases[40] = b'A';
    let (first, _) = correct(&tables, &base_params(), &bases);
    let (second, result) = correct(&tables, &base_params(), first.bases());
    assert_eq!(result.outcome, CorrectionOutcome::Ok);
    assert_eq!(second.bases(), first.bases());
    assert_eq!(result.total_fixes(), 0);
}

/* --------------------------------------------------------------------- */
/*  single-base deletion                                                 */
/* --------------------------------------------------------------------- */

#[test]
fn dropped_base_is_reinserted() {
    let tables = ref_tables();
    let mut bases = REF.to_vec();
    bases.remove(30);
    let (seq, result) = correct(&tables, &base_params(), &bases);

    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.len(), REF.len()); // input + 1
    assert_eq!(seq.bases(), REF);
    assert_eq!(result.fixes_del, 1);
    assert_eq!(result.fixes_sub, 0);
}

#[test]
fn fixed_length_policy_clips_the_reinserted_base() {
    let tables = ref_tables();
    let mut params = base_params();
    params.length_policy = LengthPolicy::Fixed;
    let mut bases = REF.to_vec();
    bases.remove(30);
    let original_len = bases.len();
    let (seq, result) = correct(&tables, &params, &bases);

    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.len(), original_len);
    assert_eq!(seq.bases(), &REF[..original_len]);
}

/* --------------------------------------------------------------------- */
/*  bad head healed through the reverse-complement pass                  */
/* --------------------------------------------------------------------- */

#[test]
fn garbage_head_is_healed_on_the_rc_pass() {
    let tables = ref_tables();
    let mut bases = GARB.to_vec();
    bases.extend_from_slice(&REF[GARB.len()..]);
    let (seq, result) = correct(&tables, &base_params(), &bases);

    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.bases(), REF);
    assert!(result.healed_rc_pass);
    assert_eq!(result.fixes_sub, GARB.len() as u32);
}

/* --------------------------------------------------------------------- */
/*  rewrite budget                                                       */
/* --------------------------------------------------------------------- */

#[test]
fn dense_errors_trip_the_rewrite_budget() {
    let tables = ref_tables();
    let mut params = base_params();
    params.good_pct = 30; // keep the salvaged prefix
    let mut bases = REF.to_vec();
    for b in bases[50..62].iter_mut() {
        *b = match *b {
            b'A' => b'C',
            b'C' => b'A',
            b'G' => b'T',
            _ => b'G',
        };
    }
    let (seq, result) = correct(&tables, &params, &bases);

    assert_eq!(result.abandon_reason, AbandonReason::Rewriting);
    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    // the clean prefix before the error burst survives
    assert_eq!(seq.bases(), &REF[..50]);
}

#[test]
fn dense_errors_with_strict_length_are_rejected() {
    let tables = ref_tables();
    let params = base_params(); // good_pct 70
    let mut bases = REF.to_vec();
    for b in bases[50..62].iter_mut() {
        *b = match *b {
            b'A' => b'C',
            b'C' => b'A',
            b'G' => b'T',
            _ => b'G',
        };
    }
    let (_, result) = correct(&tables, &params, &bases);
    assert_eq!(result.abandon_reason, AbandonReason::Rewriting);
    assert_eq!(result.outcome, CorrectionOutcome::NotLongEnough);
}

/* --------------------------------------------------------------------- */
/*  N handling                                                           */
/* --------------------------------------------------------------------- */

#[test]
fn lone_n_is_resolved_from_depth() {
    let tables = ref_tables();
    let mut bases = REF.to_vec();
    bases[50] = b'N';
    let (seq, result) = correct(&tables, &base_params(), &bases);
    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.bases(), REF);
    assert_eq!(result.fixes_n, 1);
}

#[test]
fn all_n_read_is_abandoned() {
    let tables = ref_tables();
    let bases = vec![b'N'; 100];
    let (seq, result) = correct(&tables, &base_params(), &bases);
    assert_eq!(result.abandon_reason, AbandonReason::TooManyNs);
    assert_eq!(result.outcome, CorrectionOutcome::NotLongEnough);
    assert!(seq.is_empty());
    assert_eq!(result.total_fixes(), 0);
}

/* --------------------------------------------------------------------- */
/*  adapter trimming                                                     */
/* --------------------------------------------------------------------- */

#[test]
fn hdub_run_is_trimmed_from_the_head() {
    // adapter k-mers are very deep and strand-skewed
    let tables = tables_for(&[(REF, (10, 10)), (ADAPTER, (3000, 2))]);
    let mut bases = ADAPTER.to_vec();
    bases.extend_from_slice(&REF[..60]);
    let (seq, result) = correct(&tables, &base_params(), &bases);

    assert!(result.trimmed_hdub);
    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.bases(), &REF[..60]);
}

/* --------------------------------------------------------------------- */
/*  extension                                                            */
/* --------------------------------------------------------------------- */

#[test]
fn unambiguous_reads_extend_to_the_requested_length() {
    let tables = ref_tables();
    let mut params = base_params();
    params.extend = 5;
    let (seq, result) = correct(&tables, &params, &REF[..60]);

    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(result.extended_bases, 5);
    assert_eq!(seq.bases(), &REF[..65]);
}

#[test]
fn padded_policy_restores_the_original_length_with_ns() {
    // unfixable junk past the end of the covered sequence: the tail is
    // trimmed, nothing can extend past the reference end, padding fills in
    let tables = ref_tables();
    let mut params = base_params();
    params.good_pct = 30;
    params.length_policy = LengthPolicy::FixedPadded;
    let mut bases = REF[70..].to_vec();
    bases.extend_from_slice(b"TTCCCCCAGT");
    let (seq, result) = correct(&tables, &params, &bases);

    assert_eq!(result.abandon_reason, AbandonReason::NoNextMer);
    assert_eq!(result.outcome, CorrectionOutcome::Corrected);
    assert_eq!(seq.len(), 40);
    assert_eq!(&seq.bases()[..30], &REF[70..]);
    assert!(seq.bases()[30..].iter().all(|&b| b == b'N'));
}

/* --------------------------------------------------------------------- */
/*  accounting                                                           */
/* --------------------------------------------------------------------- */

#[test]
fn too_short_inputs_are_reported() {
    let tables = ref_tables();
    let (_, result) = correct(&tables, &base_params(), b"ACGT");
    assert_eq!(result.outcome, CorrectionOutcome::NotLongEnough);
}
