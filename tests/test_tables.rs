use blue::blue::kmer_table::KmerTable;
use blue::blue::mer;
use blue::blue::pair_table::{canonical_pair, PairTable, FRAGMENT_LENGTH};
use std::io::Write;

/* --------------------------------------------------------------------- */
/*  depth table: records in, depths out                                  */
/* --------------------------------------------------------------------- */

fn canon(bases: &[u8]) -> u64 {
    let packed = mer::pack(bases).unwrap();
    mer::canonical(packed, bases.len()).0
}

fn sorted_records(mut recs: Vec<(u64, u32, u32)>) -> Vec<(u64, u32, u32)> {
    recs.sort_by_key(|r| r.0);
    recs
}

#[test]
fn depth_is_oriented_to_the_query_strand() {
    let k = 9;
    let fwd = b"ACCGTTAGA";
    let packed = mer::pack(fwd).unwrap();
    let (canonical_key, canon_is_rc) = mer::canonical(packed, k);
    let records = vec![(canonical_key, 7, 3)];
    let table = KmerTable::from_records(k, 1, 5, 1, 10, records).unwrap();

    let cell = table.depth(packed);
    if canon_is_rc {
        assert_eq!((cell.fwd, cell.rev), (3, 7));
    } else {
        assert_eq!((cell.fwd, cell.rev), (7, 3));
    }
    // and the opposite strand sees the counts swapped
    let cell_rc = table.depth(mer::rev_comp(packed, k));
    assert_eq!((cell_rc.fwd, cell_rc.rev), (cell.rev, cell.fwd));
}

#[test]
fn missing_keys_have_zero_depth() {
    let table = KmerTable::from_records(9, 1, 5, 1, 10, vec![(canon(b"ACCGTTAGA"), 5, 5)]).unwrap();
    let absent = mer::pack(b"TTTTTTTTT").unwrap();
    assert_eq!(table.depth(absent).sum(), 0);
    assert_eq!(table.depth_sum(absent, 3).sum, 0);
}

#[test]
fn depth_sum_flags_strand_imbalance() {
    let k = 9;
    let key = canon(b"ACCGTTAGA");
    let table = KmerTable::from_records(k, 1, 5, 1, 10, vec![(key, 40, 2)]).unwrap();
    let ds = table.depth_sum(mer::pack(b"ACCGTTAGA").unwrap(), 3);
    assert_eq!(ds.sum, 42);
    assert!(ds.unbalanced); // 40 > 10 * 2
    assert!(ds.tilted);

    let balanced = KmerTable::from_records(k, 1, 5, 1, 10, vec![(key, 25, 17)]).unwrap();
    let ds = balanced.depth_sum(mer::pack(b"ACCGTTAGA").unwrap(), 3);
    assert!(!ds.unbalanced);
}

#[test]
fn out_of_order_keys_are_fatal() {
    let recs = vec![(100u64, 5, 5), (50u64, 5, 5)];
    assert!(KmerTable::from_records(9, 2, 5, 1, 10, recs).is_err());
}

#[test]
fn shallow_records_are_skipped_at_load() {
    let recs = sorted_records(vec![
        (canon(b"ACCGTTAGA"), 1, 0),
        (canon(b"GGGTACCAT"), 10, 10),
    ]);
    let table = KmerTable::from_records(9, 2, 5, 3, 10, recs).unwrap();
    assert_eq!(table.distinct_loaded(), 1);
    assert_eq!(table.depth(mer::pack(b"ACCGTTAGA").unwrap()).sum(), 0);
    assert_eq!(table.depth(mer::pack(b"GGGTACCAT").unwrap()).sum(), 20);
}

#[test]
fn hdub_membership_needs_depth_and_skew() {
    let recs = sorted_records(vec![
        (canon(b"ACCGTTAGA"), 3000, 2), // deep and skewed: HDUB
        (canon(b"GGGTACCAT"), 3000, 2900), // deep but balanced
        (canon(b"TTACGGATC"), 40, 2),  // skewed but shallow
    ]);
    let table = KmerTable::from_records(9, 3, 20, 1, 10, recs).unwrap();
    assert!(table.hdub_contains(mer::pack(b"ACCGTTAGA").unwrap()));
    assert!(!table.hdub_contains(mer::pack(b"GGGTACCAT").unwrap()));
    assert!(!table.hdub_contains(mer::pack(b"TTACGGATC").unwrap()));
}

/* --------------------------------------------------------------------- */
/*  depth table: binary file loading                                     */
/* --------------------------------------------------------------------- */

fn write_depth_table_file(
    path: &std::path::Path,
    mer_size: u32,
    records: &[(u64, u32, u32)],
    avg: u32,
) {
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(&mer_size.to_le_bytes()).unwrap();
    f.write_all(&(records.len() as u64).to_le_bytes()).unwrap();
    let total: u64 = records.iter().map(|r| (r.1 + r.2) as u64).sum();
    f.write_all(&total.to_le_bytes()).unwrap();
    f.write_all(&avg.to_le_bytes()).unwrap();
    for (key, fwd, rev) in records {
        f.write_all(&key.to_le_bytes()).unwrap();
        f.write_all(&fwd.to_le_bytes()).unwrap();
        f.write_all(&rev.to_le_bytes()).unwrap();
    }
}

#[test]
fn load_roundtrips_header_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads_9.cbt");
    let records = sorted_records(vec![
        (canon(b"ACCGTTAGA"), 12, 8),
        (canon(b"GGGTACCAT"), 6, 6),
        (canon(b"TTACGGATC"), 1, 0),
    ]);
    write_depth_table_file(&path, 9, &records, 11);

    let table = KmerTable::load(&path, 2, 10).unwrap();
    assert_eq!(table.mer_size(), 9);
    assert_eq!(table.avg_depth_loaded(), 11);
    assert_eq!(table.distinct_loaded(), 2); // the (1,0) record is under min
    assert_eq!(table.depth(mer::pack(b"ACCGTTAGA").unwrap()).sum(), 20);
}

#[test]
fn truncated_record_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("truncated.cbt");
    write_depth_table_file(&path, 9, &[(canon(b"ACCGTTAGA"), 5, 5)], 5);
    // chop the last record in half
    let len = std::fs::metadata(&path).unwrap().len();
    let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    f.set_len(len - 6).unwrap();
    assert!(KmerTable::load(&path, 1, 10).is_err());
}

#[test]
fn impossible_mer_size_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.cbt");
    write_depth_table_file(&path, 99, &[], 1);
    assert!(KmerTable::load(&path, 1, 10).is_err());
}

/* --------------------------------------------------------------------- */
/*  pair table                                                           */
/* --------------------------------------------------------------------- */

#[test]
fn backward_pair_is_strand_stable() {
    let gap = 9;
    let table = PairTable::from_records(gap, 5, vec![]).unwrap();
    let full = table.full_length();
    assert_eq!(full, 2 * FRAGMENT_LENGTH + gap);

    // 41 bases of context, pair ending at the last base
    let region = b"GTAAACCTGACATACGTGAACGAAAGCGCCTGAAGACCCCT";
    assert_eq!(region.len(), full);
    let fwd_pair = table.backward_pair(region, full - 9, 9).unwrap();

    let mut rc_region = region.to_vec();
    rc_region.reverse();
    for b in &mut rc_region {
        *b = mer::complement_base(*b);
    }
    let rc_pair = table.backward_pair(&rc_region, full - 9, 9).unwrap();
    assert_eq!(canonical_pair(fwd_pair), canonical_pair(rc_pair));
}

#[test]
fn backward_pair_needs_room_and_clean_bases() {
    let table = PairTable::from_records(9, 5, vec![]).unwrap();
    let short = b"ACGTACGTACGT";
    assert!(table.backward_pair(short, 3, 9).is_none());
    let mut region = b"GTAAACCTGACATACGTGAACGAAAGCGCCTGAAGACCCCT".to_vec();
    region[5] = b'N';
    assert!(table.backward_pair(&region, region.len() - 9, 9).is_none());
}

#[test]
fn pair_depth_looks_up_canonical_pairs() {
    let gap = 9;
    let region = b"GTAAACCTGACATACGTGAACGAAAGCGCCTGAAGACCCCT";
    let probe = PairTable::from_records(gap, 5, vec![]).unwrap();
    let pair = probe.backward_pair(region, region.len() - 9, 9).unwrap();
    let key = canonical_pair(pair);

    let table = PairTable::from_records(gap, 5, vec![(key, 17)]).unwrap();
    assert_eq!(table.pair_depth(pair), 17);
    // the reverse-complement context resolves to the same depth
    let mut rc_region = region.to_vec();
    rc_region.reverse();
    for b in &mut rc_region {
        *b = mer::complement_base(*b);
    }
    let rc_pair = table.backward_pair(&rc_region, region.len() - 9, 9).unwrap();
    assert_eq!(table.pair_depth(rc_pair), 17);
    // absent pairs are zero
    assert_eq!(table.pair_depth(0), 0);
}

#[test]
fn pair_table_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reads_9.prs");
    let gap = 9u32;
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&(FRAGMENT_LENGTH as u32).to_le_bytes()).unwrap();
    f.write_all(&gap.to_le_bytes()).unwrap();
    f.write_all(&(2 * FRAGMENT_LENGTH as u32 + gap).to_le_bytes()).unwrap();
    f.write_all(&4u32.to_le_bytes()).unwrap();
    for (key, depth) in [(10u64, 9u32), (20u64, 13u32)] {
        f.write_all(&key.to_le_bytes()).unwrap();
        f.write_all(&depth.to_le_bytes()).unwrap();
    }
    drop(f);

    let table = PairTable::load(&path).unwrap();
    assert_eq!(table.gap(), 9);
    assert_eq!(table.avg_depth_loaded(), 4);
}

#[test]
fn sibling_path_swaps_the_extension() {
    let p = PairTable::sibling_path(std::path::Path::new("/data/reads_25.cbt"));
    assert_eq!(p, std::path::PathBuf::from("/data/reads_25.prs"));
}
