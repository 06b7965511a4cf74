use crate::blue::params::{HealingParams, LengthPolicy, TraceLevel};
use clap::{value_parser, ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

/// Command-line options for the read corrector
#[derive(Debug, Parser)]
#[command(
    name = "blue",
    about = "Correct sequencing reads against a k-mer consensus table",
    long_about = "Correct sequencing reads against a k-mer consensus table.


EXAMPLES:
    // FASTQ reads, table built at 25-mers, keep reads with >= 2 reps
    $ blue -m 2 -t 8 -r corrected reads_25.cbt reads_R1.fastq reads_R2.fastq
    ",
    version = "0.1.0"
)]
#[clap(group = ArgGroup::new("length").args(&["fixed", "variable", "fixed_padded"]).multiple(false))]
#[clap(group = ArgGroup::new("pairing").args(&["paired", "unpaired"]).multiple(false))]
#[clap(group = ArgGroup::new("tracing").args(&["trace", "tracechanges", "tracechoices"]).multiple(false))]
pub struct Cli {
    /// k-mer depth table produced by the counting run [path]
    #[clap(value_parser, required = true, help_heading = "Core")]
    pub kmer_table: PathBuf,

    /// Read files or glob patterns (FASTA or FASTQ) [path...]
    #[clap(value_parser, required = true, num_args = 1.., help_heading = "Core")]
    pub reads: Vec<String>,

    /// Minimum repetitions for a k-mer to count as real [integer]
    #[clap(short = 'm', long = "min", required = true, value_parser = value_parser!(u32).range(1..), help_heading = "Core")]
    pub min_reps: u32,

    /// Tag inserted into output file names [string]
    #[clap(short = 'r', long = "run", default_value = "corrected", help_heading = "Core")]
    pub run_name: String,

    /// Input format; auto-detected from the first file when omitted
    #[clap(short = 'f', long, value_enum, help_heading = "Core")]
    pub format: Option<FormatArg>,

    /// Number of threads to use [integer]
    #[clap(short = 't', long, default_value = "1", help_heading = "Core")]
    pub n_threads: usize,

    /// Trim every read to this length before correction (0 = off) [integer]
    #[clap(short = 'l', long = "trim", default_value = "0", help_heading = "Core")]
    pub trim_len: usize,

    /// Output reads must keep the input length [flag]
    #[clap(long, help_heading = "Length policy (select max. one)")]
    pub fixed: bool,

    /// Output reads may change length (default) [flag]
    #[clap(long, help_heading = "Length policy (select max. one)")]
    pub variable: bool,

    /// As --fixed, padding shortfalls with N [flag]
    #[clap(long = "fixedPadded", alias = "fixed-padded", help_heading = "Length policy (select max. one)")]
    pub fixed_padded: bool,

    /// Min accepted length as % of the original read [integer]
    #[clap(long, default_value = "70", value_parser = value_parser!(u32).range(0..=100), help_heading = "Filtering")]
    pub good: u32,

    /// Extend accepted reads by up to this many bases [integer]
    #[clap(long, default_value = "0", help_heading = "Core")]
    pub extend: usize,

    /// Treat read files as pairs (R1/R2 pulled in lockstep) [flag]
    #[clap(long, help_heading = "Pairing (select max. one)")]
    pub paired: bool,

    /// Treat every file independently [flag]
    #[clap(long, help_heading = "Pairing (select max. one)")]
    pub unpaired: bool,

    /// Indel-common error model (454/IonTorrent style homopolymer errors) [flag]
    #[clap(long, help_heading = "Model")]
    pub hp: bool,

    /// Only ever repair by substitution [flag]
    #[clap(long = "subsonly", alias = "subs-only", help_heading = "Model")]
    pub subs_only: bool,

    /// Deep amplicon data: widen the rewrite window [flag]
    #[clap(long, help_heading = "Model")]
    pub amplicons: bool,

    /// Leave reads alone when their OK depth exceeds this [integer]
    #[clap(long = "max", default_value = "0", help_heading = "Filtering")]
    pub max_depth: u32,

    /// Strand balance factor [integer]
    #[clap(short = 'b', long = "balance", default_value = "10", value_parser = value_parser!(u32).range(2..), help_heading = "Filtering")]
    pub balance_factor: u32,

    /// Qualities below this mark the noisy tail (0 = off) [integer]
    #[clap(long = "mq", default_value = "0", value_parser = value_parser!(u8).range(0..=40), help_heading = "Filtering")]
    pub min_qual: u8,

    /// Save uncorrectable reads to a _problems file [flag]
    #[clap(long, help_heading = "Output")]
    pub problems: bool,

    /// Stats file path; defaults next to the corrected output [path]
    #[clap(short = 's', long = "stats", help_heading = "Output")]
    pub stats_file: Option<PathBuf>,

    /// Output directory; defaults beside the inputs [path]
    #[clap(short = 'o', long, help_heading = "Output")]
    pub output_dir: Option<PathBuf>,

    /// Trace per-read outcomes [flag]
    #[clap(long, help_heading = "Tracing (select max. one)")]
    pub trace: bool,

    /// Trace every applied change [flag]
    #[clap(long, help_heading = "Tracing (select max. one)")]
    pub tracechanges: bool,

    /// Trace every variant considered [flag]
    #[clap(long, help_heading = "Tracing (select max. one)")]
    pub tracechoices: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Fasta,
    Fastq,
}

impl Cli {
    pub fn length_policy(&self) -> LengthPolicy {
        if self.fixed {
            LengthPolicy::Fixed
        } else if self.fixed_padded {
            LengthPolicy::FixedPadded
        } else {
            LengthPolicy::Variable
        }
    }

    pub fn trace_level(&self) -> TraceLevel {
        if self.tracechoices {
            TraceLevel::Choices
        } else if self.tracechanges {
            TraceLevel::Changes
        } else if self.trace {
            TraceLevel::Reads
        } else {
            TraceLevel::Off
        }
    }

    pub fn healing_params(&self) -> HealingParams {
        HealingParams {
            min_reps: self.min_reps,
            max_depth: self.max_depth,
            balance_factor: self.balance_factor,
            min_qual: self.min_qual,
            hp_model: self.hp,
            subs_only: self.subs_only,
            amplicons: self.amplicons,
            length_policy: self.length_policy(),
            extend: self.extend,
            good_pct: self.good,
            save_problems: self.problems,
            trace: self.trace_level(),
        }
    }
}
