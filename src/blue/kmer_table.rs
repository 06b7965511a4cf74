use crate::blue::mer;
use anyhow::{bail, Context, Result};
use fxhash::FxHashSet;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

/// Partitioned, read-only depth table over canonical k-mers.
///
/// Keys are canonical (min of k-mer and its reverse complement); the cell
/// keeps the counts seen on each strand. The table is hash-partitioned by
/// the leading bases of the key so loading and lookup stay O(1) for very
/// large k-mer sets, and is immutable once loaded — workers share it by
/// plain reference.

/// Entries per partition before the key space is split further.
pub const MAX_TABLE: usize = 50_000_000;

/// A k-mer this many times deeper than the load average, with skewed
/// strands, is treated as adapter/contaminant (HDUB).
pub const HDUB_DEPTH_FACTOR: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepthCell {
    /// Occurrences matching the queried strand.
    pub fwd: u32,
    /// Occurrences on the opposite strand.
    pub rev: u32,
}

impl DepthCell {
    #[inline]
    pub fn sum(&self) -> u32 {
        self.fwd.saturating_add(self.rev)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DepthSum {
    pub sum: u32,
    /// Strand ratio beyond the balance factor.
    pub unbalanced: bool,
    /// Strand ratio beyond half the balance factor; tolerated next to
    /// homopolymer runs where coverage is naturally skewed.
    pub tilted: bool,
}

/* ------------------------------------------------------------------------- */
/*  Flat chained partition                                                   */
/* ------------------------------------------------------------------------- */

#[derive(Debug)]
struct Entry<V> {
    next: i32,
    key: u64,
    value: V,
}

/// One fixed partition: a flat entry array chained from a power-of-two
/// bucket table. Insertion happens only during the single-threaded load
/// phase; afterwards the partition is never written again.
#[derive(Debug)]
pub(crate) struct FlatPartition<V> {
    buckets: Vec<i32>,
    entries: Vec<Entry<V>>,
    /// Right-justification shift applied to keys before hashing.
    key_shift: u32,
}

impl<V> FlatPartition<V> {
    pub(crate) fn with_capacity(expected: usize, key_shift: u32) -> Self {
        let n_buckets = expected.max(16).next_power_of_two();
        FlatPartition {
            buckets: vec![-1; n_buckets],
            entries: Vec::with_capacity(expected),
            key_shift,
        }
    }

    #[inline]
    fn bucket_of(&self, key: u64) -> usize {
        let rj = key >> self.key_shift;
        let folded = ((rj >> 32) ^ rj) as u32;
        (folded as usize) & (self.buckets.len() - 1)
    }

    pub(crate) fn insert(&mut self, key: u64, value: V) {
        let b = self.bucket_of(key);
        let idx = self.entries.len() as i32;
        self.entries.push(Entry {
            next: self.buckets[b],
            key,
            value,
        });
        self.buckets[b] = idx;
    }

    pub(crate) fn get(&self, key: u64) -> Option<&V> {
        let mut idx = self.buckets[self.bucket_of(key)];
        while idx >= 0 {
            let e = &self.entries[idx as usize];
            if e.key == key {
                return Some(&e.value);
            }
            idx = e.next;
        }
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Number of leading bases used as the partition index for an expected
/// distinct-key count.
pub(crate) fn partition_bases_for(expected_distinct: u64) -> usize {
    let needed = (expected_distinct as usize).div_ceil(MAX_TABLE);
    let mut bases = 0;
    while 1usize << (2 * bases) < needed {
        bases += 1;
    }
    bases
}

/* ------------------------------------------------------------------------- */
/*  Depth table                                                              */
/* ------------------------------------------------------------------------- */

#[derive(Debug)]
pub struct KmerTable {
    mer_size: usize,
    partition_bases: usize,
    partitions: Vec<FlatPartition<(u32, u32)>>,
    avg_depth_loaded: u32,
    balance_factor: u32,
    /// Canonical k-mers that are both unusually deep and strand-skewed.
    hdub: FxHashSet<u64>,
}

impl KmerTable {
    /// Build a table from (canonical k-mer, fwd, rev) records sorted by key.
    ///
    /// * records shallower than `min_load_depth` are skipped
    /// * out-of-order keys are a hard error (the file is corrupt)
    pub fn from_records<I>(
        mer_size: usize,
        expected_distinct: u64,
        avg_depth_loaded: u32,
        min_load_depth: u32,
        balance_factor: u32,
        records: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, u32, u32)>,
    {
        if mer_size < 1 || mer_size > 32 {
            bail!("k-mer size {mer_size} out of range (1..=32)");
        }
        let partition_bases = partition_bases_for(expected_distinct);
        let n_partitions = 1usize << (2 * partition_bases);
        let per_partition = (expected_distinct as usize).div_ceil(n_partitions);
        let key_shift = (64 - 2 * mer_size) as u32;

        let mut partitions: Vec<FlatPartition<(u32, u32)>> = (0..n_partitions)
            .map(|_| FlatPartition::with_capacity(per_partition, key_shift))
            .collect();
        let mut hdub = FxHashSet::default();
        let hdub_floor = avg_depth_loaded.saturating_mul(HDUB_DEPTH_FACTOR).max(1);

        let mut previous_key: Option<u64> = None;
        for (key, fwd, rev) in records {
            if let Some(prev) = previous_key {
                if key <= prev {
                    bail!("depth table keys out of order at 0x{key:016x}");
                }
            }
            previous_key = Some(key);

            let sum = fwd.saturating_add(rev);
            if sum < min_load_depth {
                continue;
            }
            if sum >= hdub_floor && ratio_exceeds(fwd, rev, balance_factor) {
                hdub.insert(key);
            }
            let p = partition_index(key, partition_bases);
            partitions[p].insert(key, (fwd, rev));
        }

        Ok(KmerTable {
            mer_size,
            partition_bases,
            partitions,
            avg_depth_loaded,
            balance_factor,
            hdub,
        })
    }

    /// Load a depth table file.
    ///
    /// Layout (little-endian): `u32 mer_size`, `u64 distinct_mers`,
    /// `u64 total_mers`, `u32 avg_depth`, then `(u64 key, u32 fwd, u32 rev)`
    /// records sorted ascending by key. EOF terminates loading.
    pub fn load(path: &Path, min_load_depth: u32, balance_factor: u32) -> Result<Self> {
        let file =
            File::open(path).context(format!("opening k-mer depth table {:?}", path))?;
        let mut reader = BufReader::new(file);

        let mer_size = read_u32(&mut reader).context("depth table header: mer size")? as usize;
        let distinct = read_u64(&mut reader).context("depth table header: distinct mers")?;
        let _total = read_u64(&mut reader).context("depth table header: total mers")?;
        let avg = read_u32(&mut reader).context("depth table header: average depth")?;
        if mer_size < 1 || mer_size > 32 {
            bail!("depth table {:?} has impossible k-mer size {mer_size}", path);
        }

        let mut records = Vec::new();
        loop {
            let key = match read_u64_or_eof(&mut reader)? {
                Some(k) => k,
                None => break,
            };
            let fwd = read_u32(&mut reader).context("truncated depth table record")?;
            let rev = read_u32(&mut reader).context("truncated depth table record")?;
            records.push((key, fwd, rev));
        }

        Self::from_records(mer_size, distinct, avg, min_load_depth, balance_factor, records)
            .context(format!("loading depth table {:?}", path))
    }

    /// Depth cell for a k-mer, oriented to the strand of the query:
    /// `fwd` counts occurrences as packed, `rev` the reverse complement.
    /// Missing keys yield (0, 0).
    pub fn depth(&self, packed: u64) -> DepthCell {
        let (canon, rc) = mer::canonical(packed, self.mer_size);
        match self.partitions[partition_index(canon, self.partition_bases)].get(canon) {
            Some(&(fwd, rev)) => {
                if rc {
                    DepthCell { fwd: rev, rev: fwd }
                } else {
                    DepthCell { fwd, rev }
                }
            }
            None => DepthCell::default(),
        }
    }

    /// Summed depth plus the strand-balance verdicts.
    pub fn depth_sum(&self, packed: u64, min_depth: u32) -> DepthSum {
        let cell = self.depth(packed);
        let sum = cell.sum();
        let deep_enough = sum >= min_depth;
        DepthSum {
            sum,
            unbalanced: deep_enough && ratio_exceeds(cell.fwd, cell.rev, self.balance_factor),
            tilted: deep_enough
                && ratio_exceeds(cell.fwd, cell.rev, (self.balance_factor / 2).max(2)),
        }
    }

    pub fn hdub_contains(&self, packed: u64) -> bool {
        let (canon, _) = mer::canonical(packed, self.mer_size);
        self.hdub.contains(&canon)
    }

    pub fn avg_depth_loaded(&self) -> u32 {
        self.avg_depth_loaded
    }

    pub fn mer_size(&self) -> usize {
        self.mer_size
    }

    pub fn balance_factor(&self) -> u32 {
        self.balance_factor
    }

    pub fn distinct_loaded(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }
}

#[inline]
pub(crate) fn partition_index(key: u64, partition_bases: usize) -> usize {
    if partition_bases == 0 {
        0
    } else {
        (key >> (64 - 2 * partition_bases)) as usize
    }
}

/// True when the larger strand count exceeds `factor` times the smaller
/// (a zero side counts as one, so shallow singletons don't trip this).
#[inline]
pub(crate) fn ratio_exceeds(fwd: u32, rev: u32, factor: u32) -> bool {
    let hi = fwd.max(rev) as u64;
    let lo = fwd.min(rev).max(1) as u64;
    hi > factor as u64 * lo
}

/* ------------------------------------------------------------------------- */
/*  Little-endian primitives                                                 */
/* ------------------------------------------------------------------------- */

pub(crate) fn read_u32(r: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(r: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// A clean EOF at a record boundary ends the file; a partial key is an error.
pub(crate) fn read_u64_or_eof(r: &mut impl Read) -> Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => bail!("truncated record key"),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(u64::from_le_bytes(buf)))
}
