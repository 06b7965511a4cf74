use blue::blue::mer;
use blue::blue::sequence::{Sequence, REPLACEMENT_QUAL};

/* --------------------------------------------------------------------- */
/*  tiling                                                               */
/* --------------------------------------------------------------------- */

#[test]
fn tiling_matches_direct_packing() {
    let s = Sequence::from_bases(b"GCTAAAGACAATTACATAACATAC");
    let k = 9;
    let mut tiled = Vec::new();
    s.tile(k, &mut tiled);
    assert_eq!(tiled.len(), s.len() - k + 1);
    for (i, got) in tiled.iter().enumerate() {
        assert_eq!(*got, mer::pack(&s.bases()[i..i + k]), "window {i}");
    }
}

#[test]
fn tiling_flags_exactly_the_n_windows() {
    let s = Sequence::from_bases(b"ACGTACGTNACGTACGTACG");
    let k = 5;
    let mut tiled = Vec::new();
    s.tile(k, &mut tiled);
    for (i, got) in tiled.iter().enumerate() {
        let has_n = s.bases()[i..i + k].contains(&b'N');
        assert_eq!(got.is_none(), has_n, "window {i}");
    }
}

#[test]
fn next_mer_advances_the_window() {
    let s = Sequence::from_bases(b"ACGTACGT");
    let first = s.mer_at(0, 4).unwrap();
    let second = s.next_mer(first, 1, 4).unwrap();
    assert_eq!(second, s.mer_at(1, 4).unwrap());
}

/* --------------------------------------------------------------------- */
/*  reverse complement                                                   */
/* --------------------------------------------------------------------- */

#[test]
fn rev_comp_in_place_is_an_involution() {
    let mut s = Sequence::with_quals(b"GATTACA", &[1, 2, 3, 4, 5, 6, 7]);
    let original = s.clone();
    s.rev_comp_in_place();
    assert_eq!(s.bases(), b"TGTAATC");
    assert_eq!(s.quals(), &[7, 6, 5, 4, 3, 2, 1]);
    s.rev_comp_in_place();
    assert_eq!(s, original);
}

/* --------------------------------------------------------------------- */
/*  variant application                                                  */
/* --------------------------------------------------------------------- */

#[test]
fn sub_variant_touches_only_changed_columns() {
    let mut s = Sequence::with_quals(b"AACCGGTT", &[10, 11, 12, 13, 14, 15, 16, 17]);
    // window at 2 (CCGG): change base 4 G->T
    let v = mer::pack(b"CCTG").unwrap();
    s.apply_variant(2, v, 4, 0);
    assert_eq!(s.bases(), b"AACCTGTT");
    assert_eq!(s.quals(), &[10, 11, 12, 13, REPLACEMENT_QUAL, 15, 16, 17]);
}

#[test]
fn del_fix_variant_lengthens_the_read() {
    let mut s = Sequence::with_quals(b"AACCGGTT", &[10, 11, 12, 13, 14, 15, 16, 17]);
    // insert T inside the window at 2: CCG (old 3 bases) -> CCTG (4 bases)
    let v = mer::pack(b"CCTG").unwrap();
    s.apply_variant(2, v, 4, 1);
    assert_eq!(s.bases(), b"AACCTGGTT");
    assert_eq!(s.len(), 9);
    assert_eq!(s.quals().len(), 9);
    // untouched prefix and suffix qualities survive
    assert_eq!(&s.quals()[..4], &[10, 11, 12, 13]);
    assert_eq!(&s.quals()[5..], &[14, 15, 16, 17]);
}

#[test]
fn ins_fix_variant_shortens_the_read() {
    let mut s = Sequence::with_quals(b"AACCXGGTT", &[10, 11, 12, 13, 14, 15, 16, 17, 18]);
    // the window at 2 spans CCXGG (5 bases) and compresses to CCGG
    let v = mer::pack(b"CCGG").unwrap();
    s.apply_variant(2, v, 4, -1);
    assert_eq!(s.bases(), b"AACCGGTT");
    assert_eq!(s.quals().len(), 8);
    assert_eq!(&s.quals()[..4], &[10, 11, 12, 13]);
    assert_eq!(&s.quals()[6..], &[17, 18]);
}

/* --------------------------------------------------------------------- */
/*  shaping                                                              */
/* --------------------------------------------------------------------- */

#[test]
fn pad_to_fills_with_n_at_qual_one() {
    let mut s = Sequence::with_quals(b"ACGT", &[30, 30, 30, 30]);
    s.pad_to(6);
    assert_eq!(s.bases(), b"ACGTNN");
    assert_eq!(s.quals(), &[30, 30, 30, 30, 1, 1]);
}

#[test]
fn trim_start_and_truncate_keep_tracks_parallel() {
    let mut s = Sequence::with_quals(b"ACGTACGT", &[1, 2, 3, 4, 5, 6, 7, 8]);
    s.trim_start(2);
    s.truncate(4);
    assert_eq!(s.bases(), b"GTAC");
    assert_eq!(s.quals(), &[3, 4, 5, 6]);
}
