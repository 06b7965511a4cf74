pub mod corrector;
pub mod healer;
pub mod kmer_table;
pub mod mer;
pub mod pair_table;
pub mod params;
pub mod pools;
pub mod read_props;
pub mod sequence;
pub mod trimmer;

use crate::blue::kmer_table::KmerTable;
use crate::blue::pair_table::PairTable;

/// The shared read-only consensus: the k-mer depth table and, when the
/// counting run produced one, the pair table.
#[derive(Debug)]
pub struct Tables {
    pub kmers: KmerTable,
    pub pairs: Option<PairTable>,
}

impl Tables {
    pub fn mer_size(&self) -> usize {
        self.kmers.mer_size()
    }
}
