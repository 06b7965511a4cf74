use crate::blue::kmer_table::ratio_exceeds;
use crate::blue::mer;
use crate::blue::params::{HealingParams, NOISY_TAIL_RUN};
use crate::blue::sequence::Sequence;
use crate::blue::Tables;

/// Overall verdict on a read, before and after correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadState {
    #[default]
    Unknown,
    Ok,
    /// Soft signals only: worth scanning, probably fine.
    NeedsChecking,
    /// At least one k-mer or pair below its minimum depth.
    Broken,
    /// Deep repeats; correction would do more harm than good.
    TooDeep,
}

/// Why the corrector gave up on a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbandonReason {
    #[default]
    NotAbandoned,
    TooManyNs,
    Rewriting,
    TreeSize,
    NoNextMer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Thresholds {
    pub min_depth: u32,
    pub ok_depth: u32,
    pub min_pair_depth: u32,
    pub ok_pair_depth: u32,
    /// OK depth from the first derivation, before any mid-correction
    /// recalculation.
    pub initial_ok_depth: u32,
}

/// Per-read working state. One instance lives per worker and is re-measured
/// for every read, so all the vectors keep their allocations.
#[derive(Debug, Default)]
pub struct ReadProps {
    pub mer_size: usize,
    pub mer_count: usize,
    /// Packed k-mer per window; `None` where the window holds an N.
    pub mers: Vec<Option<u64>>,
    pub depths: Vec<u32>,
    /// Backward-pair depth per window; −1 where no pair can be formed.
    pub pair_depths: Vec<i64>,
    pub pair_count: usize,
    /// Accumulated edit cost per window (0 = untouched).
    pub change_cost: Vec<u32>,
    pub zero_strand: Vec<bool>,
    pub balanced: Vec<bool>,

    pub unbalanced_read: bool,
    pub hm_zero_present: bool,
    pub deep_unbalanced_present: bool,
    pub depths_recalculated: bool,
    pub healing_abandoned: bool,

    pub thresholds: Thresholds,
    pub first_good_mer: Option<usize>,
    /// First window whose bases reach into the low-quality tail.
    pub start_of_noisy_tail: usize,
    pub abandoned_at_m: Option<usize>,
    pub abandon_reason: AbandonReason,
    pub remaining_bad_mers: usize,
    pub changed_mers: usize,
    pub state: ReadState,
}

impl ReadProps {
    pub fn new() -> Self {
        ReadProps::default()
    }

    /// Full measurement of a fresh read: depth tracks, thresholds, noisy
    /// tail, diagnosis. Resets all edit bookkeeping.
    pub fn measure(&mut self, seq: &Sequence, tables: &Tables, params: &HealingParams) {
        self.changed_mers = 0;
        self.remaining_bad_mers = 0;
        self.first_good_mer = None;
        self.abandoned_at_m = None;
        self.abandon_reason = AbandonReason::NotAbandoned;
        self.healing_abandoned = false;
        self.depths_recalculated = false;
        self.fill_depth_tracks(seq, tables, params);
        self.change_cost.clear();
        self.change_cost.resize(self.mer_count, 0);
        self.compute_thresholds(params, true);
        self.find_noisy_tail(seq, params, tables.mer_size());
        self.state = self.diagnose(params);
    }

    /// Refresh depth tracks and verdict after correction, keeping the edit
    /// bookkeeping (`changed_mers`, abandonment) intact.
    pub fn rediagnose(&mut self, seq: &Sequence, tables: &Tables, params: &HealingParams) {
        self.fill_depth_tracks(seq, tables, params);
        self.change_cost.resize(self.mer_count, 0);
        self.compute_thresholds(params, false);
        self.state = self.diagnose(params);
    }

    /// Re-tile and re-score windows from `m` on after an applied edit; the
    /// windows before `m` have already been scanned and keep their entries.
    pub fn retile_from(&mut self, seq: &Sequence, tables: &Tables, params: &HealingParams, m: usize) {
        let k = tables.mer_size();
        let new_count = seq.mer_count(k);
        self.truncate_tracks(m);
        for i in m..new_count {
            self.push_window(seq, tables, params, i, k);
        }
        self.mer_count = new_count;
        self.change_cost.resize(new_count, 0);
    }

    fn truncate_tracks(&mut self, m: usize) {
        self.mers.truncate(m);
        self.depths.truncate(m);
        self.pair_depths.truncate(m);
        self.zero_strand.truncate(m);
        self.balanced.truncate(m);
        self.change_cost.truncate(m);
    }

    fn fill_depth_tracks(&mut self, seq: &Sequence, tables: &Tables, params: &HealingParams) {
        let k = tables.mer_size();
        self.mer_size = k;
        self.mers.clear();
        self.depths.clear();
        self.pair_depths.clear();
        self.zero_strand.clear();
        self.balanced.clear();
        self.deep_unbalanced_present = false;
        self.hm_zero_present = false;

        seq.tile(k, &mut self.mers);
        self.mer_count = self.mers.len();
        for i in 0..self.mer_count {
            self.score_window(tables, params, seq, i);
        }
        self.pair_count = self.pair_depths.iter().filter(|&&d| d >= 0).count();
    }

    fn push_window(&mut self, seq: &Sequence, tables: &Tables, params: &HealingParams, i: usize, k: usize) {
        self.mers.push(seq.mer_at(i, k));
        self.score_window(tables, params, seq, i);
    }

    /// Fill the depth/strand/pair tracks for window `i` (mers[i] is set).
    fn score_window(&mut self, tables: &Tables, params: &HealingParams, seq: &Sequence, i: usize) {
        let (depth, zero, balanced) = match self.mers[i] {
            Some(packed) => {
                let cell = tables.kmers.depth(packed);
                let sum = cell.sum();
                if tables.kmers.hdub_contains(packed) {
                    self.deep_unbalanced_present = true;
                }
                if sum == 0 && mer::is_homopolymer_end(packed, tables.mer_size()) {
                    self.hm_zero_present = true;
                }
                (
                    sum,
                    sum > 0 && (cell.fwd == 0 || cell.rev == 0),
                    sum >= params.min_reps
                        && !ratio_exceeds(cell.fwd, cell.rev, params.balance_factor),
                )
            }
            None => (0, false, false),
        };
        self.depths.push(depth);
        self.zero_strand.push(zero);
        self.balanced.push(balanced);

        let pair = match &tables.pairs {
            Some(pt) => pt
                .backward_pair(seq.bases(), i, tables.mer_size())
                .map(|p| pt.pair_depth(p) as i64)
                .unwrap_or(-1),
            None => -1,
        };
        self.pair_depths.push(pair);
    }

    /* --------------------------------------------------------------------- */
    /*  Thresholds                                                           */
    /* --------------------------------------------------------------------- */

    /// Derive the per-read depth thresholds.
    ///
    /// 1. harmonic mean of balanced depths (all depths when none balance)
    ///    → average depth
    /// 2. cap depths at the average, harmonic mean of those ≥ average/6
    ///    → robust lower-band mean
    /// 3. OK = mean/3, min = OK/2, clamped below the lowest balanced depth
    /// 4. same procedure over pair depths, clamped to ≤ min depth
    pub fn compute_thresholds(&mut self, params: &HealingParams, initial: bool) {
        let balanced_mean = harmonic_mean(
            self.depths
                .iter()
                .zip(&self.balanced)
                .filter(|(_, &b)| b)
                .map(|(&d, _)| d),
        );
        self.unbalanced_read = balanced_mean == 0.0;
        let average = if self.unbalanced_read {
            harmonic_mean(self.depths.iter().copied())
        } else {
            balanced_mean
        };

        let mut ok_depth = if average > 0.0 {
            let floor = average / 6.0;
            let ok_mer_mean = harmonic_mean(
                self.depths
                    .iter()
                    .map(|&d| (d as f64).min(average) as u32)
                    .filter(|&d| d as f64 >= floor),
            );
            (ok_mer_mean / 3.0) as u32
        } else {
            0
        };
        if ok_depth == 0 {
            // nothing usable in the read itself; fall back to the load floor
            ok_depth = 2 * params.min_reps;
        }
        let mut min_depth = (ok_depth / 2).max(params.min_reps);
        if let Some(lowest) = self
            .depths
            .iter()
            .zip(&self.balanced)
            .filter(|(_, &b)| b)
            .map(|(&d, _)| d)
            .min()
        {
            // never below the load floor: anything shallower than -m was
            // not even loaded into the table
            min_depth = min_depth.min(lowest.saturating_sub(1)).max(params.min_reps);
        }

        let (ok_pair, min_pair) = if self.pair_count > 0 {
            let pair_mean = harmonic_mean(
                self.pair_depths
                    .iter()
                    .filter(|&&d| d > 0)
                    .map(|&d| d as u32),
            );
            let ok = if pair_mean > 0.0 {
                let floor = pair_mean / 6.0;
                let capped = harmonic_mean(
                    self.pair_depths
                        .iter()
                        .filter(|&&d| d > 0)
                        .map(|&d| (d as f64).min(pair_mean) as u32)
                        .filter(|&d| d as f64 >= floor),
                );
                (capped / 3.0) as u32
            } else {
                0
            };
            let ok = ok.min(ok_depth);
            (ok, (ok / 2).min(min_depth))
        } else {
            (0, 0)
        };

        self.thresholds.ok_depth = ok_depth;
        self.thresholds.min_depth = min_depth;
        self.thresholds.ok_pair_depth = ok_pair;
        self.thresholds.min_pair_depth = min_pair;
        if initial {
            self.thresholds.initial_ok_depth = ok_depth;
        }
    }

    fn find_noisy_tail(&mut self, seq: &Sequence, params: &HealingParams, k: usize) {
        self.start_of_noisy_tail = self.mer_count;
        if params.min_qual == 0 || !seq.has_quals() {
            return;
        }
        let quals = seq.quals();
        let mut run = 0usize;
        for (i, &q) in quals.iter().enumerate() {
            if q < params.min_qual {
                run += 1;
                if run == NOISY_TAIL_RUN {
                    let run_start = i + 1 - NOISY_TAIL_RUN;
                    self.start_of_noisy_tail = run_start.saturating_sub(k - 1);
                    return;
                }
            } else {
                run = 0;
            }
        }
    }

    /* --------------------------------------------------------------------- */
    /*  Diagnosis                                                            */
    /* --------------------------------------------------------------------- */

    pub fn diagnose(&self, params: &HealingParams) -> ReadState {
        if self.mer_count == 0 {
            return ReadState::Broken;
        }
        if params.max_depth > 0 && self.thresholds.ok_depth > params.max_depth {
            return ReadState::TooDeep;
        }
        let t = &self.thresholds;
        let any_bad_mer = self.depths.iter().any(|&d| d < t.min_depth);
        let any_bad_pair = self
            .pair_depths
            .iter()
            .any(|&d| d >= 0 && (d as u32) < t.min_pair_depth);
        if any_bad_mer || any_bad_pair {
            return ReadState::Broken;
        }
        let any_low_pair = self
            .pair_depths
            .iter()
            .any(|&d| d >= 0 && (d as u32) < t.ok_pair_depth);
        let hp_end_drop = self.hm_zero_present || self.homopolymer_end_drop();
        if self.zero_strand.iter().any(|&z| z) || hp_end_drop || any_low_pair {
            return ReadState::NeedsChecking;
        }
        ReadState::Ok
    }

    /// A ≥ half depth drop arriving on a homopolymer-end window — the
    /// signature of an uncorrected indel next to a run.
    fn homopolymer_end_drop(&self) -> bool {
        for i in 1..self.mer_count {
            if let Some(packed) = self.mers[i] {
                if mer::is_homopolymer_end(packed, self.mer_size)
                    && self.depths[i] * 2 < self.depths[i - 1]
                {
                    return true;
                }
            }
        }
        false
    }

    /// Whether the repair at `m` warrants re-deriving thresholds: the new
    /// depth dwarfs what the read statistics were built on.
    pub fn repair_warrants_recalc(&self, new_depth: u32) -> bool {
        new_depth >= 2 * self.thresholds.ok_depth.max(1)
    }
}

/// Harmonic mean of the non-zero depths; 0.0 when none qualify.
pub fn harmonic_mean(depths: impl Iterator<Item = u32>) -> f64 {
    let mut n = 0u64;
    let mut reciprocal_sum = 0f64;
    for d in depths {
        if d > 0 {
            n += 1;
            reciprocal_sum += 1.0 / d as f64;
        }
    }
    if n == 0 {
        0.0
    } else {
        n as f64 / reciprocal_sum
    }
}
