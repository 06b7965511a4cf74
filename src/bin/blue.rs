use anyhow::{bail, Context, Result};
use blue::blue::corrector::{CorrectionOutcome, CorrectionResult};
use blue::blue::healer::Healer;
use blue::blue::kmer_table::KmerTable;
use blue::blue::pair_table::PairTable;
use blue::blue::params::{HealingParams, TraceLevel};
use blue::blue::read_props::AbandonReason;
use blue::blue::Tables;
use blue::cli::counters::{write_stats, HealingCounters};
use blue::cli::io::{
    detect_format, expand_read_patterns, output_path, ReadFormat, ReadRecord, ReadSource,
    ReadWriter,
};
use blue::cli::opts::{Cli, FormatArg};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Reads pulled from the input per batch; pairs stay co-indexed inside one
/// batch.
const BATCH: usize = 1000;

fn main() {
    // Catch and handle errors so writers flush before exit
    if let Err(e) = run() {
        eprintln!("{:?}", e);
        std::process::exit(1);
    }
    std::process::exit(0);
}

fn run() -> Result<()> {
    let start_time = Instant::now();
    let opt = Cli::parse();
    let params = opt.healing_params();

    println!("Start: Loading k-mer depth table");
    let kmers = KmerTable::load(&opt.kmer_table, opt.min_reps, opt.balance_factor)?;
    println!(
        "       {} distinct {}-mers, average depth {}",
        kmers.distinct_loaded(),
        kmers.mer_size(),
        kmers.avg_depth_loaded()
    );

    let pairs_path = PairTable::sibling_path(&opt.kmer_table);
    let pairs = if pairs_path.exists() {
        println!("Start: Loading k-mer pair table");
        Some(PairTable::load(&pairs_path)?)
    } else {
        None
    };
    let tables = Tables { kmers, pairs };

    let files = expand_read_patterns(&opt.reads)?;
    let format = match opt.format {
        Some(FormatArg::Fasta) => ReadFormat::Fasta,
        Some(FormatArg::Fastq) => ReadFormat::Fastq,
        None => detect_format(&files[0])?,
    };
    let paired = if opt.unpaired {
        false
    } else {
        opt.paired || files.len() == 2
    };
    if paired && files.len() % 2 != 0 {
        bail!("paired mode needs an even number of read files, got {}", files.len());
    }

    if let Some(dir) = &opt.output_dir {
        create_dir_all(dir).context("Cannot create output_dir")?;
    }

    rayon::ThreadPoolBuilder::new()
        .num_threads(opt.n_threads)
        .build_global()
        .context("building Rayon thread pool")?;

    let mut trace_writer = trace_writer_for(&opt, &params, &files[0])?;
    let mut totals = HealingCounters::default();

    println!("Start: Correcting reads");
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("       {spinner} {msg}")
            .unwrap(),
    );

    if paired {
        for file_pair in files.chunks(2) {
            process_paired_files(
                &file_pair[0],
                &file_pair[1],
                &tables,
                &params,
                &opt,
                format,
                &mut totals,
                trace_writer.as_mut(),
                &pb,
            )?;
        }
    } else {
        for file in &files {
            process_file(
                file,
                &tables,
                &params,
                &opt,
                format,
                &mut totals,
                trace_writer.as_mut(),
                &pb,
            )?;
        }
    }
    pb.finish_with_message(format!("| {} reads corrected", totals.corrected_reads_written));

    if let Some(tw) = &mut trace_writer {
        tw.flush().context("flushing trace file")?;
    }

    let stats_path = opt
        .stats_file
        .clone()
        .unwrap_or_else(|| default_stats_path(&opt, &files[0]));
    write_stats(&stats_path, &totals, start_time.elapsed())?;

    println!(
        "Finished: {} reads read, {} OK, {} corrected, {} discarded ({:.2?})",
        totals.reads_read,
        totals.ok_reads_written,
        totals.corrected_reads_written,
        totals.discarded_broken,
        start_time.elapsed()
    );
    Ok(())
}

fn trace_writer_for(
    opt: &Cli,
    params: &HealingParams,
    first_input: &Path,
) -> Result<Option<BufWriter<File>>> {
    if params.trace == TraceLevel::Off {
        return Ok(None);
    }
    let name = format!("{}.trace", opt.run_name);
    let path = match &opt.output_dir {
        Some(dir) => dir.join(name),
        None => first_input.with_file_name(name),
    };
    Ok(Some(BufWriter::new(
        File::create(&path).context(format!("creating trace file {:?}", path))?,
    )))
}

fn default_stats_path(opt: &Cli, first_input: &Path) -> PathBuf {
    let name = format!("{}_stats.txt", opt.run_name);
    match &opt.output_dir {
        Some(dir) => dir.join(name),
        None => first_input.with_file_name(name),
    }
}

/* ---------- batch processing ----------------------------------------- */

type CorrectedRead = (ReadRecord, CorrectionResult, Vec<String>);

enum Pulled {
    Read(ReadRecord),
    /// A malformed record: counted and skipped, but it still occupied a
    /// slot in its file.
    Skipped,
    Eof,
}

fn pull_one(source: &mut ReadSource, trim_len: usize, counters: &mut HealingCounters) -> Pulled {
    match source.next_read() {
        None => Pulled::Eof,
        Some(Err(e)) => {
            eprintln!("skipping bad record: {e}");
            counters.reads_read += 1;
            counters.discarded_broken += 1;
            counters.broken_reads_found += 1;
            Pulled::Skipped
        }
        Some(Ok(mut rec)) => {
            if trim_len > 0 && rec.seq.len() > trim_len {
                rec.seq.truncate(trim_len);
            }
            Pulled::Read(rec)
        }
    }
}

/// Pull up to `BATCH` reads; malformed records are counted and skipped.
fn pull_batch(
    source: &mut ReadSource,
    trim_len: usize,
    counters: &mut HealingCounters,
) -> Vec<ReadRecord> {
    let mut batch = Vec::with_capacity(BATCH);
    while batch.len() < BATCH {
        match pull_one(source, trim_len, counters) {
            Pulled::Read(rec) => batch.push(rec),
            Pulled::Skipped => continue,
            Pulled::Eof => break,
        }
    }
    batch
}

/// Pull up to `BATCH` read pairs, the n-th record of each file together.
/// A malformed record (or one file running out early) leaves an explicit
/// hole on its side, so the mate never shifts index.
fn pull_paired_batch(
    source_a: &mut ReadSource,
    source_b: &mut ReadSource,
    trim_len: usize,
    counters: &mut HealingCounters,
) -> Vec<(Option<ReadRecord>, Option<ReadRecord>)> {
    let mut batch = Vec::with_capacity(BATCH);
    while batch.len() < BATCH {
        let a = pull_one(source_a, trim_len, counters);
        let b = pull_one(source_b, trim_len, counters);
        if matches!(a, Pulled::Eof) && matches!(b, Pulled::Eof) {
            break;
        }
        let a = match a {
            Pulled::Read(rec) => Some(rec),
            _ => None,
        };
        let b = match b {
            Pulled::Read(rec) => Some(rec),
            _ => None,
        };
        if a.is_none() && b.is_none() {
            // both slots were bad records; nothing to carry forward
            continue;
        }
        batch.push((a, b));
    }
    batch
}

/// Correct a batch across the thread pool. Each chunk gets its own worker
/// engine (pools and all); collection preserves input order.
fn correct_batch(
    mut batch: Vec<ReadRecord>,
    tables: &Tables,
    params: &HealingParams,
    n_threads: usize,
) -> Vec<CorrectedRead> {
    let chunk = batch.len().div_ceil(n_threads.max(1)).max(1);
    let per_chunk: Vec<Vec<(CorrectionResult, Vec<String>)>> = batch
        .par_chunks_mut(chunk)
        .map(|reads| {
            let mut healer = Healer::new(tables, params);
            let mut out = Vec::with_capacity(reads.len());
            for rec in reads.iter_mut() {
                healer.trace.clear();
                let result = healer.correct_read(&mut rec.seq);
                out.push((result, std::mem::take(&mut healer.trace)));
            }
            out
        })
        .collect();
    batch
        .into_iter()
        .zip(per_chunk.into_iter().flatten())
        .map(|(rec, (result, trace))| (rec, result, trace))
        .collect()
}

fn record_result(counters: &mut HealingCounters, result: &CorrectionResult) {
    counters.sub_fixes += result.fixes_sub as u64;
    counters.del_fixes += result.fixes_del as u64;
    counters.ins_fixes += result.fixes_ins as u64;
    counters.n_fixes += result.fixes_n as u64;
    counters.extended_bases += result.extended_bases as u64;
    if result.healed_first_pass {
        counters.healed_first_pass += 1;
    }
    if result.healed_rc_pass {
        counters.healed_rc_pass += 1;
    }
    if result.trimmed_hdub {
        counters.hdub_trimmed += 1;
    }
    match result.abandon_reason {
        AbandonReason::NotAbandoned => {}
        AbandonReason::TooManyNs => counters.abandoned_ns += 1,
        AbandonReason::Rewriting => counters.abandoned_rewriting += 1,
        AbandonReason::TreeSize => counters.abandoned_tree_size += 1,
        AbandonReason::NoNextMer => counters.abandoned_no_next_mer += 1,
    }
}

/// Route one corrected read. `good` receives survivors; when `to_singles`
/// is set the survivor goes to the singles stream instead (its mate died).
fn route_read(
    rec: &ReadRecord,
    result: &CorrectionResult,
    good: &mut ReadWriter,
    singles: Option<&mut ReadWriter>,
    problems: Option<&mut ReadWriter>,
    counters: &mut HealingCounters,
    to_singles: bool,
) {
    counters.reads_read += 1;
    record_result(counters, result);
    match result.outcome {
        CorrectionOutcome::Ok | CorrectionOutcome::TooDeep | CorrectionOutcome::Corrected => {
            if result.outcome == CorrectionOutcome::TooDeep {
                counters.too_deep_found += 1;
            }
            if result.outcome == CorrectionOutcome::Corrected {
                counters.corrected_reads_written += 1;
            } else {
                counters.ok_reads_written += 1;
            }
            if to_singles {
                if let Some(s) = singles {
                    s.write_read(rec);
                    counters.singles_written += 1;
                }
            } else {
                good.write_read(rec);
            }
        }
        CorrectionOutcome::NotLongEnough => {
            counters.short_reads_found += 1;
            if let Some(p) = problems {
                p.write_read(rec);
                counters.problems_written += 1;
            }
        }
        CorrectionOutcome::Broken => {
            counters.discarded_broken += 1;
            counters.broken_reads_found += 1;
            if let Some(p) = problems {
                p.write_read(rec);
                counters.problems_written += 1;
            }
        }
    }
}

fn survived(outcome: CorrectionOutcome) -> bool {
    matches!(
        outcome,
        CorrectionOutcome::Ok | CorrectionOutcome::TooDeep | CorrectionOutcome::Corrected
    )
}

/* ---------- single-file flow ------------------------------------------ */

#[allow(clippy::too_many_arguments)]
fn process_file(
    path: &Path,
    tables: &Tables,
    params: &HealingParams,
    opt: &Cli,
    format: ReadFormat,
    totals: &mut HealingCounters,
    mut trace_writer: Option<&mut BufWriter<File>>,
    pb: &ProgressBar,
) -> Result<()> {
    let mut source = ReadSource::open(path, format)?;
    let out_dir = opt.output_dir.as_deref();
    let qual_offset = source.qual_offset();
    let with_quals = source.has_qual_companion();

    let mut good = ReadWriter::create(
        &output_path(path, &opt.run_name, "", format, out_dir),
        format,
        qual_offset,
        with_quals,
    )?;
    let mut problems = if params.save_problems {
        Some(ReadWriter::create(
            &output_path(path, &opt.run_name, "_problems", format, out_dir),
            format,
            qual_offset,
            with_quals,
        )?)
    } else {
        None
    };

    loop {
        let batch = pull_batch(&mut source, opt.trim_len, totals);
        if batch.is_empty() {
            break;
        }
        for (rec, result, trace) in correct_batch(batch, tables, params, opt.n_threads) {
            route_read(&rec, &result, &mut good, None, problems.as_mut(), totals, false);
            if let Some(tw) = trace_writer.as_deref_mut() {
                for line in &trace {
                    writeln!(tw, "{}\t{line}", rec.id)?;
                }
            }
        }
        pb.set_message(format!("{} reads", totals.reads_read));
        pb.tick();
    }

    good.finish()?;
    if let Some(p) = &mut problems {
        p.finish()?;
    }
    Ok(())
}

/* ---------- paired-file flow ------------------------------------------ */

#[allow(clippy::too_many_arguments)]
fn process_paired_files(
    path_a: &Path,
    path_b: &Path,
    tables: &Tables,
    params: &HealingParams,
    opt: &Cli,
    format: ReadFormat,
    totals: &mut HealingCounters,
    mut trace_writer: Option<&mut BufWriter<File>>,
    pb: &ProgressBar,
) -> Result<()> {
    let mut source_a = ReadSource::open(path_a, format)?;
    let mut source_b = ReadSource::open(path_b, format)?;
    let out_dir = opt.output_dir.as_deref();

    let mut writers = Vec::with_capacity(2);
    let mut singles = Vec::with_capacity(2);
    let mut problems = Vec::with_capacity(2);
    for (path, source) in [(path_a, &source_a), (path_b, &source_b)] {
        let qual_offset = source.qual_offset();
        let with_quals = source.has_qual_companion();
        writers.push(ReadWriter::create(
            &output_path(path, &opt.run_name, "", format, out_dir),
            format,
            qual_offset,
            with_quals,
        )?);
        singles.push(ReadWriter::create(
            &output_path(path, &opt.run_name, "_singles", format, out_dir),
            format,
            qual_offset,
            with_quals,
        )?);
        problems.push(if params.save_problems {
            Some(ReadWriter::create(
                &output_path(path, &opt.run_name, "_problems", format, out_dir),
                format,
                qual_offset,
                with_quals,
            )?)
        } else {
            None
        });
    }

    loop {
        // the n-th read of each file is pulled together so the pair stays
        // co-indexed through the batch and the writers
        let batch = pull_paired_batch(&mut source_a, &mut source_b, opt.trim_len, totals);
        if batch.is_empty() {
            break;
        }

        // flatten the occupied slots for correction, remembering the layout
        let mut reads = Vec::with_capacity(batch.len() * 2);
        let mut layout = Vec::with_capacity(batch.len());
        for (a, b) in batch {
            layout.push((a.is_some(), b.is_some()));
            if let Some(rec) = a {
                reads.push(rec);
            }
            if let Some(rec) = b {
                reads.push(rec);
            }
        }
        let mut corrected = correct_batch(reads, tables, params, opt.n_threads).into_iter();

        for (has_a, has_b) in layout {
            let a = if has_a { corrected.next() } else { None };
            let b = if has_b { corrected.next() } else { None };
            let a_ok = a.as_ref().map_or(false, |(_, r, _)| survived(r.outcome));
            let b_ok = b.as_ref().map_or(false, |(_, r, _)| survived(r.outcome));
            let both = a_ok && b_ok;
            for (side, item) in [(0usize, a), (1usize, b)] {
                let Some((rec, result, trace)) = item else { continue };
                let (w, s, p) = writer_set(&mut writers, &mut singles, &mut problems, side);
                route_read(&rec, &result, w, Some(s), p.as_mut(), totals, !both && survived(result.outcome));
                if let Some(tw) = trace_writer.as_deref_mut() {
                    for line in &trace {
                        writeln!(tw, "{}\t{line}", rec.id)?;
                    }
                }
            }
        }
        pb.set_message(format!("{} reads", totals.reads_read));
        pb.tick();
    }

    for w in writers.iter_mut().chain(singles.iter_mut()) {
        w.finish()?;
    }
    for p in problems.iter_mut().flatten() {
        p.finish()?;
    }
    Ok(())
}

fn writer_set<'w>(
    writers: &'w mut [ReadWriter],
    singles: &'w mut [ReadWriter],
    problems: &'w mut [Option<ReadWriter>],
    side: usize,
) -> (&'w mut ReadWriter, &'w mut ReadWriter, &'w mut Option<ReadWriter>) {
    (
        &mut writers[side],
        &mut singles[side],
        &mut problems[side],
    )
}
