use crate::cli::BigCount;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// Per-worker correction counters, merged into the run totals with `+=`
/// after each batch.
///
/// Conservation: `reads_read == ok_reads_written + corrected_reads_written
/// + discarded_broken + short_reads_found + discarded_ok`. The remaining
/// counters are advisory breakdowns.
#[derive(Debug, Default, Clone)]
pub struct HealingCounters {
    pub reads_read: BigCount,
    pub ok_reads_written: BigCount,
    pub corrected_reads_written: BigCount,
    pub discarded_broken: BigCount,
    pub discarded_ok: BigCount,
    pub short_reads_found: BigCount,

    pub broken_reads_found: BigCount,
    pub too_deep_found: BigCount,
    pub healed_first_pass: BigCount,
    pub healed_rc_pass: BigCount,
    pub abandoned_ns: BigCount,
    pub abandoned_rewriting: BigCount,
    pub abandoned_tree_size: BigCount,
    pub abandoned_no_next_mer: BigCount,
    pub sub_fixes: BigCount,
    pub del_fixes: BigCount,
    pub ins_fixes: BigCount,
    pub n_fixes: BigCount,
    pub extended_bases: BigCount,
    pub hdub_trimmed: BigCount,
    pub singles_written: BigCount,
    pub problems_written: BigCount,
}

impl std::ops::AddAssign for HealingCounters {
    fn add_assign(&mut self, other: Self) {
        self.reads_read += other.reads_read;
        self.ok_reads_written += other.ok_reads_written;
        self.corrected_reads_written += other.corrected_reads_written;
        self.discarded_broken += other.discarded_broken;
        self.discarded_ok += other.discarded_ok;
        self.short_reads_found += other.short_reads_found;
        self.broken_reads_found += other.broken_reads_found;
        self.too_deep_found += other.too_deep_found;
        self.healed_first_pass += other.healed_first_pass;
        self.healed_rc_pass += other.healed_rc_pass;
        self.abandoned_ns += other.abandoned_ns;
        self.abandoned_rewriting += other.abandoned_rewriting;
        self.abandoned_tree_size += other.abandoned_tree_size;
        self.abandoned_no_next_mer += other.abandoned_no_next_mer;
        self.sub_fixes += other.sub_fixes;
        self.del_fixes += other.del_fixes;
        self.ins_fixes += other.ins_fixes;
        self.n_fixes += other.n_fixes;
        self.extended_bases += other.extended_bases;
        self.hdub_trimmed += other.hdub_trimmed;
        self.singles_written += other.singles_written;
        self.problems_written += other.problems_written;
    }
}

impl HealingCounters {
    pub fn total_fixes(&self) -> BigCount {
        self.sub_fixes + self.del_fixes + self.ins_fixes + self.n_fixes
    }

    pub fn reads_accounted(&self) -> BigCount {
        self.ok_reads_written
            + self.corrected_reads_written
            + self.discarded_broken
            + self.short_reads_found
            + self.discarded_ok
    }
}

/// Write the end-of-run stats summary.
pub fn write_stats(path: &Path, counters: &HealingCounters, elapsed: Duration) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).context(format!("creating stats file {:?}", path))?,
    );
    writeln!(w, "reads read           {}", counters.reads_read)?;
    writeln!(w, "reads OK             {}", counters.ok_reads_written)?;
    writeln!(w, "reads corrected      {}", counters.corrected_reads_written)?;
    writeln!(w, "reads discarded      {}", counters.discarded_broken)?;
    writeln!(w, "reads too short      {}", counters.short_reads_found)?;
    writeln!(w, "good reads dropped   {}", counters.discarded_ok)?;
    writeln!(w)?;
    writeln!(w, "broken reads found   {}", counters.broken_reads_found)?;
    writeln!(w, "too-deep reads       {}", counters.too_deep_found)?;
    writeln!(w, "healed forward       {}", counters.healed_first_pass)?;
    writeln!(w, "healed via RC pass   {}", counters.healed_rc_pass)?;
    writeln!(w, "adapter trims        {}", counters.hdub_trimmed)?;
    writeln!(w)?;
    writeln!(w, "sub fixes            {}", counters.sub_fixes)?;
    writeln!(w, "del fixes            {}", counters.del_fixes)?;
    writeln!(w, "ins fixes            {}", counters.ins_fixes)?;
    writeln!(w, "N fixes              {}", counters.n_fixes)?;
    writeln!(w, "bases extended       {}", counters.extended_bases)?;
    writeln!(w)?;
    writeln!(w, "abandoned (Ns)       {}", counters.abandoned_ns)?;
    writeln!(w, "abandoned (rewrite)  {}", counters.abandoned_rewriting)?;
    writeln!(w, "abandoned (tree)     {}", counters.abandoned_tree_size)?;
    writeln!(w, "abandoned (no next)  {}", counters.abandoned_no_next_mer)?;
    writeln!(w)?;
    writeln!(w, "singles written      {}", counters.singles_written)?;
    writeln!(w, "problem reads saved  {}", counters.problems_written)?;
    writeln!(w)?;
    writeln!(w, "elapsed              {:.2?}", elapsed)?;
    Ok(())
}
