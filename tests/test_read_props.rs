use blue::blue::kmer_table::KmerTable;
use blue::blue::mer;
use blue::blue::params::HealingParams;
use blue::blue::read_props::{harmonic_mean, ReadProps, ReadState};
use blue::blue::sequence::Sequence;
use blue::blue::Tables;
use std::collections::BTreeMap;

const K: usize = 9;
const REF: &[u8] = b"GTAAACCTGACATACGTGAACGAAAGCGCCTGAAGACCCCTGACTAGATGTTAATCCCTCCCTAGAAGTAACTAATTGACTCGAGAATATTATTAGCTTA";

/// One depth cell per canonical reference k-mer, with optional per-window
/// overrides (window index -> cell).
fn ref_tables_with_base(base: (u32, u32), overrides: &[(usize, (u32, u32))]) -> Tables {
    let mut cells = BTreeMap::new();
    for i in 0..=REF.len() - K {
        let packed = mer::pack(&REF[i..i + K]).unwrap();
        let (canon, _) = mer::canonical(packed, K);
        cells.insert(canon, base);
    }
    for &(win, cell) in overrides {
        let packed = mer::pack(&REF[win..win + K]).unwrap();
        let (canon, _) = mer::canonical(packed, K);
        cells.insert(canon, cell);
    }
    let records: Vec<(u64, u32, u32)> = cells.into_iter().map(|(k, (f, r))| (k, f, r)).collect();
    let kmers = KmerTable::from_records(K, records.len() as u64, 20, 2, 10, records).unwrap();
    Tables { kmers, pairs: None }
}

fn ref_tables(overrides: &[(usize, (u32, u32))]) -> Tables {
    ref_tables_with_base((10, 10), overrides)
}

fn params() -> HealingParams {
    HealingParams {
        min_reps: 2,
        ..HealingParams::default()
    }
}

/* --------------------------------------------------------------------- */
/*  harmonic mean                                                        */
/* --------------------------------------------------------------------- */

#[test]
fn harmonic_mean_basics() {
    assert_eq!(harmonic_mean([20u32, 20, 20].into_iter()), 20.0);
    assert_eq!(harmonic_mean([10u32, 30].into_iter()), 15.0);
    assert_eq!(harmonic_mean(std::iter::empty()), 0.0);
    // zeros are excluded, not averaged in
    assert_eq!(harmonic_mean([0u32, 20, 20].into_iter()), 20.0);
}

/* --------------------------------------------------------------------- */
/*  thresholds and diagnosis                                             */
/* --------------------------------------------------------------------- */

#[test]
fn uniform_read_derives_expected_thresholds() {
    let tables = ref_tables(&[]);
    let p = params();
    let seq = Sequence::from_bases(REF);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);

    assert_eq!(props.mer_count, REF.len() - K + 1);
    assert!(props.depths.iter().all(|&d| d == 20));
    assert!(props.balanced.iter().all(|&b| b));
    assert!(!props.unbalanced_read);
    // harmonic mean 20 -> OK 20/3 -> min OK/2
    assert_eq!(props.thresholds.ok_depth, 6);
    assert_eq!(props.thresholds.min_depth, 3);
    assert_eq!(props.thresholds.initial_ok_depth, 6);
    assert_eq!(props.state, ReadState::Ok);
}

#[test]
fn requested_min_reps_floors_the_min_depth() {
    // shallow but clean coverage: the derived OK/2 floor (2) sits well
    // below -m, and -m must win
    let tables = ref_tables_with_base((6, 6), &[]);
    let mut p = params();
    p.min_reps = 5;
    let seq = Sequence::from_bases(REF);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);

    assert!(props.depths.iter().all(|&d| d == 12));
    assert_eq!(props.thresholds.ok_depth, 4); // harmonic mean 12 / 3
    assert_eq!(props.thresholds.min_depth, 5); // floored at -m, not OK/2
    assert_eq!(props.state, ReadState::Ok);
}

#[test]
fn zero_depth_window_breaks_the_read() {
    let tables = ref_tables(&[]);
    let p = params();
    let mut bases = REF.to_vec();
    bases[40] = b'A'; // REF[40] is T; the covering windows drop to depth 0
    let seq = Sequence::from_bases(&bases);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);

    assert_eq!(props.state, ReadState::Broken);
    assert_eq!(props.depths[32], 0);
    assert_eq!(props.depths[31], 20);
}

#[test]
fn zero_strand_window_only_needs_checking() {
    let tables = ref_tables(&[(40, (20, 0))]);
    let p = params();
    let seq = Sequence::from_bases(REF);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);

    assert!(props.zero_strand[40]);
    assert_eq!(props.state, ReadState::NeedsChecking);
}

#[test]
fn deep_reads_are_left_alone() {
    let tables = ref_tables(&[]);
    let mut p = params();
    p.max_depth = 4; // OK depth (6) exceeds this
    let seq = Sequence::from_bases(REF);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);
    assert_eq!(props.state, ReadState::TooDeep);
}

#[test]
fn noisy_tail_starts_at_the_first_low_qual_run() {
    let tables = ref_tables(&[]);
    let mut p = params();
    p.min_qual = 10;
    let mut quals = vec![30u8; REF.len()];
    for q in quals[90..].iter_mut() {
        *q = 2;
    }
    let seq = Sequence::with_quals(REF, &quals);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);
    // the run starts at base 90; the first window reaching it is 82
    assert_eq!(props.start_of_noisy_tail, 82);
}

#[test]
fn no_quals_means_no_noisy_tail() {
    let tables = ref_tables(&[]);
    let mut p = params();
    p.min_qual = 10;
    let seq = Sequence::from_bases(REF);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);
    assert_eq!(props.start_of_noisy_tail, props.mer_count);
}

#[test]
fn n_windows_tile_as_invalid_and_break_the_read() {
    let tables = ref_tables(&[]);
    let p = params();
    let mut bases = REF.to_vec();
    bases[50] = b'N';
    let seq = Sequence::from_bases(&bases);
    let mut props = ReadProps::new();
    props.measure(&seq, &tables, &p);
    for m in 42..=50 {
        assert!(props.mers[m].is_none(), "window {m} should be invalid");
        assert_eq!(props.depths[m], 0);
    }
    assert!(props.mers[41].is_some());
    assert_eq!(props.state, ReadState::Broken);
}
