use crate::blue::mer;

/// Quality written to bases the corrector changed or inserted (canonical
/// 0–40 scale).
pub const REPLACEMENT_QUAL: u8 = 30;

/// A mutable read: bases plus an optional parallel quality track.
///
/// Qualities are kept on the canonical 0–40 scale (the IO layer strips the
/// FASTQ offset on read and restores it on write). `quals` is empty when
/// the input carried none; otherwise it is exactly as long as `bases`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    bases: Vec<u8>,
    quals: Vec<u8>,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence::default()
    }

    pub fn from_bases(bases: &[u8]) -> Self {
        Sequence {
            bases: bases.to_vec(),
            quals: Vec::new(),
        }
    }

    pub fn with_quals(bases: &[u8], quals: &[u8]) -> Self {
        debug_assert_eq!(bases.len(), quals.len());
        Sequence {
            bases: bases.to_vec(),
            quals: quals.to_vec(),
        }
    }

    /// Reload in place, keeping the allocations (one `Sequence` per worker
    /// scratch slot lives for the whole run).
    pub fn assign(&mut self, other: &Sequence) {
        self.bases.clear();
        self.bases.extend_from_slice(&other.bases);
        self.quals.clear();
        self.quals.extend_from_slice(&other.quals);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    #[inline]
    pub fn has_quals(&self) -> bool {
        !self.quals.is_empty()
    }

    #[inline]
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    #[inline]
    pub fn quals(&self) -> &[u8] {
        &self.quals
    }

    /// Append a base, extending the qual track only when one is carried.
    pub fn append_base(&mut self, base: u8, qual: u8) {
        self.bases.push(base);
        if !self.quals.is_empty() {
            self.quals.push(qual);
        }
    }

    pub fn insert_at(&mut self, i: usize, base: u8, qual: u8) {
        self.bases.insert(i, base);
        if !self.quals.is_empty() {
            self.quals.insert(i, qual);
        }
    }

    pub fn delete_at(&mut self, i: usize) {
        self.bases.remove(i);
        if !self.quals.is_empty() {
            self.quals.remove(i);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.bases.truncate(len);
        if !self.quals.is_empty() {
            self.quals.truncate(len);
        }
    }

    pub fn trim_start(&mut self, n: usize) {
        self.bases.drain(..n.min(self.bases.len()));
        if !self.quals.is_empty() {
            self.quals.drain(..n.min(self.quals.len()));
        }
    }

    /// Replace the window at `m` with a repair variant.
    ///
    /// The variant's k bases replace the read region
    /// `[m, m + k − length_delta)`; the quality track keeps original values
    /// where the bases are unchanged (aligned from both ends) and takes
    /// `REPLACEMENT_QUAL` on the rewritten middle.
    pub fn apply_variant(&mut self, m: usize, variant: u64, k: usize, length_delta: i32) {
        let old_len = (k as i32 - length_delta) as usize;
        debug_assert!(m + old_len <= self.bases.len());
        let new_bases = mer::unpack(variant, k);
        let old_bases: Vec<u8> = self.bases[m..m + old_len].to_vec();

        if !self.quals.is_empty() {
            // aligned prefix and suffix keep their qualities
            let mut prefix = 0;
            while prefix < old_len.min(k) && old_bases[prefix] == new_bases[prefix] {
                prefix += 1;
            }
            let mut suffix = 0;
            while suffix < old_len.min(k) - prefix
                && old_bases[old_len - 1 - suffix] == new_bases[k - 1 - suffix]
            {
                suffix += 1;
            }
            let old_quals: Vec<u8> = self.quals[m..m + old_len].to_vec();
            let mut new_quals = Vec::with_capacity(k);
            new_quals.extend_from_slice(&old_quals[..prefix]);
            new_quals.resize(k - suffix, REPLACEMENT_QUAL);
            new_quals.extend_from_slice(&old_quals[old_len - suffix..]);
            self.quals.splice(m..m + old_len, new_quals);
        }
        self.bases.splice(m..m + old_len, new_bases);
    }

    /// Overwrite exactly one base, marking its quality as replaced.
    pub fn set_base(&mut self, i: usize, base: u8) {
        self.bases[i] = base;
        if !self.quals.is_empty() {
            self.quals[i] = REPLACEMENT_QUAL;
        }
    }

    /// Reverse-complement the read in place; the quality track reverses.
    pub fn rev_comp_in_place(&mut self) {
        self.bases.reverse();
        for b in &mut self.bases {
            *b = mer::complement_base(*b);
        }
        self.quals.reverse();
    }

    /// Pad to `len` with N bases at quality 1.
    pub fn pad_to(&mut self, len: usize) {
        while self.bases.len() < len {
            self.bases.push(b'N');
            if !self.quals.is_empty() {
                self.quals.push(1);
            }
        }
    }

    /// Number of k-mer windows tiled across the read.
    #[inline]
    pub fn mer_count(&self, k: usize) -> usize {
        self.bases.len().saturating_sub(k - 1)
    }

    /// The packed k-mer at window `i`; `None` when the window holds a
    /// non-ACGT base.
    pub fn mer_at(&self, i: usize, k: usize) -> Option<u64> {
        if i + k > self.bases.len() {
            return None;
        }
        mer::pack(&self.bases[i..i + k])
    }

    /// Advance a valid k-mer one window to the right. `None` when the
    /// arriving base is not ACGT (callers fall back to `mer_at`).
    #[inline]
    pub fn next_mer(&self, prev: u64, i: usize, k: usize) -> Option<u64> {
        let arriving = *self.bases.get(i + k - 1)?;
        Some(mer::shift_in(prev, mer::encode_base(arriving)?, k))
    }

    /// Tile the whole read: one entry per window, `None` where the window
    /// contains a non-ACGT base. Rolls the window with a valid-run counter
    /// so each base is encoded once.
    pub fn tile(&self, k: usize, out: &mut Vec<Option<u64>>) {
        out.clear();
        let n = self.bases.len();
        if n < k {
            return;
        }
        let mut window = 0u64;
        let mut valid_run = 0usize;
        for i in 0..n {
            match mer::encode_base(self.bases[i]) {
                Some(code) => {
                    window = mer::shift_in(window, code, k);
                    valid_run += 1;
                }
                None => valid_run = 0,
            }
            if i + 1 >= k {
                out.push(if valid_run >= k { Some(window) } else { None });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_marks_n_windows() {
        let s = Sequence::from_bases(b"ACGNACGT");
        let mut mers = Vec::new();
        s.tile(4, &mut mers);
        assert_eq!(mers.len(), 5);
        assert!(mers[0].is_none()); // ACGN
        assert!(mers[3].is_none()); // NACG
        assert_eq!(mers[4], mer::pack(b"ACGT"));
    }

    #[test]
    fn apply_variant_keeps_untouched_quals() {
        let mut s = Sequence::with_quals(b"AACCGG", &[10, 11, 12, 13, 14, 15]);
        // sub at window 1 (CCG -> CTG substitution at base 3)
        let v = mer::pack(b"ACTG").unwrap();
        s.apply_variant(1, v, 4, 0);
        assert_eq!(s.bases(), b"AACTGG");
        assert_eq!(s.quals(), &[10, 11, 12, REPLACEMENT_QUAL, 14, 15]);
    }
}
