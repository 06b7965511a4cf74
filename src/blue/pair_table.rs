use crate::blue::kmer_table::{
    partition_bases_for, partition_index, read_u32, read_u64_or_eof, FlatPartition,
};
use crate::blue::mer;
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Depth table over k-mer *pairs*: two 16-base fragments separated by a
/// fixed gap, giving a longer-range depth signal than single k-mers.
///
/// A pair packs the first fragment into the high 32 bits and the second
/// into the low 32 bits, each right-justified 2-bit bases. The canonical
/// form covers the pair as a whole: the reverse-complement pair swaps and
/// rev-comps the fragments.

/// Bases per fragment; fixed by the table format.
pub const FRAGMENT_LENGTH: usize = 16;

#[derive(Debug)]
pub struct PairTable {
    gap: usize,
    full_length: usize,
    partitions: Vec<FlatPartition<u32>>,
    partition_bases: usize,
    avg_depth_loaded: u32,
}

impl PairTable {
    /// Build from (canonical pair, depth) records sorted by key.
    pub fn from_records<I>(gap: usize, avg_depth_loaded: u32, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u32)>,
    {
        let records: Vec<(u64, u32)> = records.into_iter().collect();
        let partition_bases = partition_bases_for(records.len() as u64);
        let n_partitions = 1usize << (2 * partition_bases);
        let per_partition = records.len().div_ceil(n_partitions);
        let mut partitions: Vec<FlatPartition<u32>> = (0..n_partitions)
            .map(|_| FlatPartition::with_capacity(per_partition, 0))
            .collect();

        let mut previous_key: Option<u64> = None;
        for (key, depth) in records {
            if let Some(prev) = previous_key {
                if key <= prev {
                    bail!("pair table keys out of order at 0x{key:016x}");
                }
            }
            previous_key = Some(key);
            partitions[partition_index(key, partition_bases)].insert(key, depth);
        }

        Ok(PairTable {
            gap,
            full_length: 2 * FRAGMENT_LENGTH + gap,
            partitions,
            partition_bases,
            avg_depth_loaded,
        })
    }

    /// Load a pair table file.
    ///
    /// Layout (little-endian): `u32 fragment_length`, `u32 gap`,
    /// `u32 full_length`, `u32 avg_depth`, then `(u64 pair, u32 depth)`
    /// records sorted ascending.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).context(format!("opening pair table {:?}", path))?;
        let mut reader = BufReader::new(file);

        let frag = read_u32(&mut reader).context("pair table header: fragment length")? as usize;
        let gap = read_u32(&mut reader).context("pair table header: gap")? as usize;
        let full = read_u32(&mut reader).context("pair table header: full length")? as usize;
        let avg = read_u32(&mut reader).context("pair table header: average depth")?;
        if frag != FRAGMENT_LENGTH {
            bail!("pair table {:?} has fragment length {frag}, expected {FRAGMENT_LENGTH}", path);
        }
        if full != 2 * FRAGMENT_LENGTH + gap {
            bail!("pair table {:?} header is inconsistent (gap {gap}, full {full})", path);
        }

        let mut records = Vec::new();
        loop {
            let key = match read_u64_or_eof(&mut reader)? {
                Some(k) => k,
                None => break,
            };
            let depth = read_u32(&mut reader).context("truncated pair table record")?;
            records.push((key, depth));
        }

        Self::from_records(gap, avg, records).context(format!("loading pair table {:?}", path))
    }

    /// The pair file written next to a depth table: same stem, `.prs`.
    pub fn sibling_path(kmer_table_path: &Path) -> PathBuf {
        kmer_table_path.with_extension("prs")
    }

    /// Depth of a pair (canonicalized internally); missing ⇒ 0.
    pub fn pair_depth(&self, pair: u64) -> u32 {
        let canon = canonical_pair(pair);
        self.partitions[partition_index(canon, self.partition_bases)]
            .get(canon)
            .copied()
            .unwrap_or(0)
    }

    /// Build the backward pair whose second fragment ends where the k-mer at
    /// position `m` ends. `None` when the read is too short or the spanned
    /// bases include a non-ACGT.
    pub fn backward_pair(&self, bases: &[u8], m: usize, k: usize) -> Option<u64> {
        let end = m + k;
        if end > bases.len() || end < self.full_length {
            return None;
        }
        let start = end - self.full_length;
        let first = pack_fragment(&bases[start..start + FRAGMENT_LENGTH])?;
        let second = pack_fragment(&bases[end - FRAGMENT_LENGTH..end])?;
        Some((first << 32) | second)
    }

    pub fn gap(&self) -> usize {
        self.gap
    }

    pub fn full_length(&self) -> usize {
        self.full_length
    }

    pub fn avg_depth_loaded(&self) -> u32 {
        self.avg_depth_loaded
    }
}

/// Right-justified 2-bit packing of exactly one fragment.
fn pack_fragment(bases: &[u8]) -> Option<u64> {
    debug_assert_eq!(bases.len(), FRAGMENT_LENGTH);
    Some(mer::pack(bases)? >> 32)
}

/// Reverse complement of a right-justified fragment.
#[inline]
fn rc_fragment(frag: u64) -> u64 {
    mer::rev_comp(frag << 32, FRAGMENT_LENGTH) >> 32
}

/// Canonical form of a pair: the smaller of the pair and its whole-pair
/// reverse complement (fragments swapped and rev-comped).
#[inline]
pub fn canonical_pair(pair: u64) -> u64 {
    let first = pair >> 32;
    let second = pair & 0xFFFF_FFFF;
    let rc = (rc_fragment(second) << 32) | rc_fragment(first);
    pair.min(rc)
}
