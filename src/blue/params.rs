/// Tuning constants and per-run options for the correction engine.

/// Window (in k-mer positions) over which edit density is budgeted.
pub const REWRITE_REGION: usize = 20;
/// Amplicon data tolerates denser edits before the budget trips.
pub const REWRITE_REGION_AMPLICONS: usize = 30;
/// Clean k-mers between changes that reset the adjacency penalty.
pub const GOOD_RUN: usize = 4;
/// Recursion budget for follower repairs from a healthy region.
pub const MAX_FOLLOWER_REPAIRS: u32 = 5;
/// Recursion budget inside the noisy tail.
pub const NOISY_TAIL_REPAIRS: u32 = 2;
/// Hard cap on repair-search calls per read; past this the read is abandoned.
pub const MAX_HEAL_CALLS: u32 = 1000;
/// Ns tolerated in a single k-mer window before the read is abandoned.
pub const MAX_NS_PER_MER: usize = 3;
/// A variant this many times deeper than the read average forces sub-only
/// repairs (deep repeats make indel look-ahead unreliable).
pub const HIGH_DEPTH_FACTOR: u32 = 10;
/// Low-qual bases in a row that mark the start of the noisy tail.
pub const NOISY_TAIL_RUN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LengthPolicy {
    #[default]
    Variable,
    /// Output length must equal input length.
    Fixed,
    /// As `Fixed`, padding shortfalls with N at quality 1.
    FixedPadded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Default)]
pub enum TraceLevel {
    #[default]
    Off,
    /// Per-read outcomes.
    Reads,
    /// Every applied change.
    Changes,
    /// Every variant considered and the choice rationale.
    Choices,
}

/// Per-run correction options, resolved once from the CLI and shared by all
/// workers.
#[derive(Debug, Clone)]
pub struct HealingParams {
    /// `-m`: depth below which table entries were not loaded; also the
    /// floor for per-read min depths.
    pub min_reps: u32,
    /// `-max`: reads whose OK depth exceeds this are left alone (0 = off).
    pub max_depth: u32,
    /// `-b`: strand balance factor.
    pub balance_factor: u32,
    /// `-mq`: qualities below this mark the noisy tail (0 = no tail).
    pub min_qual: u8,
    /// `-hp`: indel-common error model (454/IonTorrent style data).
    pub hp_model: bool,
    /// `-subsonly`: never try indel repairs.
    pub subs_only: bool,
    /// `-amplicons`: deep amplicon data; widens the rewrite window.
    pub amplicons: bool,
    pub length_policy: LengthPolicy,
    /// `-extend`: grow accepted reads by up to this many bases.
    pub extend: usize,
    /// `-good`: min accepted length as a percentage of the original.
    pub good_pct: u32,
    /// `-problems`: save failed reads instead of dropping them.
    pub save_problems: bool,
    pub trace: TraceLevel,
}

impl Default for HealingParams {
    fn default() -> Self {
        HealingParams {
            min_reps: 2,
            max_depth: 0,
            balance_factor: 10,
            min_qual: 0,
            hp_model: false,
            subs_only: false,
            amplicons: false,
            length_policy: LengthPolicy::Variable,
            extend: 0,
            good_pct: 70,
            save_problems: false,
            trace: TraceLevel::Off,
        }
    }
}

impl HealingParams {
    pub fn rewrite_region(&self) -> usize {
        if self.amplicons {
            REWRITE_REGION_AMPLICONS
        } else {
            REWRITE_REGION
        }
    }
}
