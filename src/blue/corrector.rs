use crate::blue::healer::{FixType, HealDecision, Healer, MerState, TreeSizeExceeded};
use crate::blue::mer;
use crate::blue::params::{
    LengthPolicy, TraceLevel, GOOD_RUN, MAX_FOLLOWER_REPAIRS, MAX_NS_PER_MER, NOISY_TAIL_REPAIRS,
};
use crate::blue::read_props::{AbandonReason, ReadState};
use crate::blue::sequence::{Sequence, REPLACEMENT_QUAL};
use crate::blue::trimmer::{trim_hdub_ends, TrimOutcome};

/// Terminal classification of a read after correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CorrectionOutcome {
    /// Consistent with the consensus as read.
    #[default]
    Ok,
    /// Edited and accepted.
    Corrected,
    /// Could not be reconciled; routed to problems or dropped.
    Broken,
    /// Survived correction but came out below the accepted length.
    NotLongEnough,
    /// Deep repeats; left alone.
    TooDeep,
}

/// What happened to one read, for the stats counters and output routing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectionResult {
    pub outcome: CorrectionOutcome,
    pub fixes_sub: u32,
    pub fixes_del: u32,
    pub fixes_ins: u32,
    pub fixes_n: u32,
    pub healed_first_pass: bool,
    pub healed_rc_pass: bool,
    pub abandon_reason: AbandonReason,
    pub trimmed_hdub: bool,
    pub extended_bases: u32,
}

impl CorrectionResult {
    pub fn total_fixes(&self) -> u32 {
        self.fixes_sub + self.fixes_del + self.fixes_ins + self.fixes_n
    }
}

enum NResolution {
    Fixed,
    TooMany,
    NoCandidate,
}

impl<'a> Healer<'a> {
    /// Correct one read in place.
    ///
    /// The read is measured, adapter-trimmed, scanned forward (and
    /// backward through the reverse complement when the head is bad),
    /// then trimmed/extended and checked against the accept rules.
    pub fn correct_read(&mut self, seq: &mut Sequence) -> CorrectionResult {
        self.calls = 0;
        let mut result = CorrectionResult::default();
        let k = self.k();
        let original_len = seq.len();

        if original_len < k {
            result.outcome = CorrectionOutcome::NotLongEnough;
            return result;
        }

        let mut original = self.pools.take_sequence();
        original.assign(seq);

        self.props.measure(seq, self.tables, self.params);

        match trim_hdub_ends(seq, &mut self.props, self.tables, self.params) {
            TrimOutcome::TooShort => {
                result.outcome = CorrectionOutcome::NotLongEnough;
                self.pools.return_sequence(original);
                return result;
            }
            TrimOutcome::Trimmed => result.trimmed_hdub = true,
            TrimOutcome::Untouched => {}
        }

        match self.props.state {
            ReadState::Ok => {
                self.maybe_extend(seq, original_len, &mut result);
                result.outcome = if result.trimmed_hdub || result.extended_bases > 0 {
                    CorrectionOutcome::Corrected
                } else {
                    CorrectionOutcome::Ok
                };
                self.clip_to_policy(seq, original_len);
                self.pad_to_policy(seq, original_len);
                self.pools.return_sequence(original);
                return result;
            }
            ReadState::TooDeep => {
                result.outcome = CorrectionOutcome::TooDeep;
                self.pools.return_sequence(original);
                return result;
            }
            _ => {}
        }

        // forward scan
        self.heal_pass(seq, false, &mut result);
        if result.total_fixes() > 0 {
            result.healed_first_pass = true;
        }

        // the head may only be reachable from the other strand; the
        // measurement reset must not lose the forward pass's bookkeeping
        if self.needs_reverse_pass() {
            let fixes_before = result.total_fixes();
            let saved_changed = self.props.changed_mers;
            let saved_reason = self.props.abandon_reason;
            let saved_at = self.props.abandoned_at_m;
            let saved_abandoned = self.props.healing_abandoned;
            seq.rev_comp_in_place();
            self.props.measure(seq, self.tables, self.params);
            self.heal_pass(seq, true, &mut result);
            seq.rev_comp_in_place();
            self.props.changed_mers += saved_changed;
            if self.props.abandon_reason == AbandonReason::NotAbandoned {
                self.props.abandon_reason = saved_reason;
                self.props.abandoned_at_m = saved_at;
                self.props.healing_abandoned = saved_abandoned;
            }
            if result.total_fixes() > fixes_before {
                result.healed_rc_pass = true;
            }
        }

        result.abandon_reason = self.props.abandon_reason;

        // a rewriting abandonment salvages the clean prefix
        if self.props.abandon_reason == AbandonReason::Rewriting {
            if let Some(e) = self.props.abandoned_at_m {
                seq.truncate((e + k).min(seq.len()));
            }
        }

        self.props.rediagnose(seq, self.tables, self.params);

        if self.props.state == ReadState::Broken || self.props.healing_abandoned {
            self.trim_broken_ends(seq);
        }

        if self.props.state != ReadState::Broken {
            self.maybe_extend(seq, original_len, &mut result);
        }

        self.clip_to_policy(seq, original_len);

        result.outcome = self.accept(seq, original_len, &result);
        match result.outcome {
            CorrectionOutcome::Ok | CorrectionOutcome::Corrected => {
                self.pad_to_policy(seq, original_len);
            }
            CorrectionOutcome::Broken if self.params.save_problems => {
                // problems carry the read as it arrived
                seq.assign(&original);
            }
            _ => {}
        }
        if self.params.trace >= TraceLevel::Reads {
            self.trace.push(format!(
                "read len {original_len} -> {} outcome {:?} fixes s{}/d{}/i{}/n{} abandon {:?}",
                seq.len(),
                result.outcome,
                result.fixes_sub,
                result.fixes_del,
                result.fixes_ins,
                result.fixes_n,
                result.abandon_reason
            ));
        }
        self.pools.return_sequence(original);
        result
    }

    /* --------------------------------------------------------------------- */
    /*  Scanning pass                                                        */
    /* --------------------------------------------------------------------- */

    /// Left-to-right scan, repairing flagged k-mers. On the reverse pass
    /// rewrite-budget abandonment stops the scan but never marks a trim
    /// point.
    fn heal_pass(&mut self, seq: &mut Sequence, reverse_pass: bool, result: &mut CorrectionResult) {
        let mut m = 0usize;
        let mut prev_depth = 0u32;
        let mut prev_pair = -1i64;

        while m < self.props.mer_count {
            if self.props.mers[m].is_none() {
                match self.resolve_ns(seq, m) {
                    NResolution::Fixed => {
                        result.fixes_n += 1;
                        self.props.changed_mers += 1;
                        self.props.retile_from(seq, self.tables, self.params, m);
                        if m < self.props.change_cost.len() {
                            self.props.change_cost[m] += 1;
                        }
                    }
                    NResolution::TooMany | NResolution::NoCandidate => {
                        self.props.healing_abandoned = true;
                        self.props.abandon_reason = AbandonReason::TooManyNs;
                        return;
                    }
                }
            }

            let state = self.scan_state(m, prev_depth, prev_pair);
            if state != MerState::Ok {
                let in_tail = m >= self.props.start_of_noisy_tail;
                let repairs_left = if in_tail {
                    NOISY_TAIL_REPAIRS
                } else {
                    MAX_FOLLOWER_REPAIRS
                };
                let mut decision = match self.heal_mer(&*seq, m, state, repairs_left, in_tail) {
                    Ok(d) => d,
                    Err(TreeSizeExceeded) => {
                        self.props.healing_abandoned = true;
                        self.props.abandon_reason = AbandonReason::TreeSize;
                        return;
                    }
                };
                // at the scan level, a change with downstream room that no
                // follower confirmed is no repair at all
                if decision.is_change()
                    && decision.all_followers == 0
                    && decision.max_followers > 0
                {
                    decision = HealDecision {
                        fix_type: FixType::Abandon,
                        ..HealDecision::default()
                    };
                }
                if decision.fix_type == FixType::Abandon {
                    self.props.remaining_bad_mers += 1;
                    if m + 1 >= self.props.mer_count {
                        // bad final k-mer with nothing beyond it to confirm a fix
                        self.props.healing_abandoned = true;
                        self.props.abandon_reason = AbandonReason::NoNextMer;
                    }
                } else if decision.is_change() {
                    self.apply_decision(seq, m, &decision, result);
                    if !reverse_pass && self.check_rewriting(m, &decision) {
                        self.props.healing_abandoned = true;
                        self.props.abandon_reason = AbandonReason::Rewriting;
                        self.props.abandoned_at_m = self.last_clean_run_end(m);
                        return;
                    }
                }
            }

            prev_depth = self.props.depths.get(m).copied().unwrap_or(0);
            prev_pair = self.props.pair_depths.get(m).copied().unwrap_or(-1);
            if self.props.first_good_mer.is_none()
                && self.props.depths.get(m).copied().unwrap_or(0) >= self.props.thresholds.ok_depth
            {
                self.props.first_good_mer = Some(m);
            }
            m += 1;
        }
    }

    /// Apply a chosen repair and bring the tracks back in sync.
    fn apply_decision(
        &mut self,
        seq: &mut Sequence,
        m: usize,
        decision: &HealDecision,
        result: &mut CorrectionResult,
    ) {
        let k = self.k();
        seq.apply_variant(m, decision.mer, k, decision.length_delta);
        match decision.fix_type {
            FixType::Sub => result.fixes_sub += 1,
            FixType::Del => result.fixes_del += 1,
            FixType::Ins => result.fixes_ins += 1,
            _ => {}
        }
        self.props.changed_mers += 1;
        self.props.retile_from(seq, self.tables, self.params, m);
        if m < self.props.change_cost.len() {
            self.props.change_cost[m] += 1;
        }
        if self.props.repair_warrants_recalc(decision.depth) {
            self.props.compute_thresholds(self.params, false);
            self.props.depths_recalculated = true;
        }
        if self.params.trace >= TraceLevel::Changes {
            self.trace.push(format!(
                "fix @{m}: {:?} -> {} (delta {}, depth {})",
                decision.fix_type,
                mer::to_string(decision.mer, k),
                decision.length_delta,
                decision.depth
            ));
        }
    }

    /// Classify window `m` from the measured tracks, ratcheting upward.
    fn scan_state(&self, m: usize, prev_depth: u32, prev_pair: i64) -> MerState {
        let t = self.props.thresholds;
        let packed = match self.props.mers[m] {
            Some(p) => p,
            None => return MerState::Bad,
        };
        let depth = self.props.depths[m];
        let pair = self.props.pair_depths[m];

        if self.mer_is_bad(depth, pair, prev_depth, prev_pair, &t) {
            return MerState::Bad;
        }
        let mut state = MerState::Ok;
        let ds = self.tables.kmers.depth_sum(packed, t.min_depth);
        if ds.unbalanced
            && !self.props.unbalanced_read
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Check);
        }
        if depth < t.ok_depth
            && pair >= 0
            && (pair as u32) < t.ok_pair_depth
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Check);
        }
        if prev_depth >= t.ok_depth
            && depth * 3 <= prev_depth * 2
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Unsure);
        }
        if m == 0 && self.head_predicts_trouble() && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Check);
        }
        state
    }

    /// Two-window look-ahead from the very first k-mer: a bad k-mer right
    /// behind an apparently healthy head usually means the head itself is
    /// wrong on its leading bases.
    fn head_predicts_trouble(&self) -> bool {
        let t = self.props.thresholds;
        (1..=2).any(|i| {
            i < self.props.mer_count && self.props.depths[i] < t.min_depth
        })
    }

    fn needs_reverse_pass(&self) -> bool {
        if matches!(
            self.props.abandon_reason,
            AbandonReason::TooManyNs | AbandonReason::TreeSize
        ) {
            return false;
        }
        match self.props.first_good_mer {
            Some(g) if g > 0 => self.props.depths[..g]
                .iter()
                .any(|&d| d < self.props.thresholds.min_depth),
            Some(_) => false,
            // never found a good k-mer: let the other strand try
            None => true,
        }
    }

    /* --------------------------------------------------------------------- */
    /*  Rewrite budget                                                       */
    /* --------------------------------------------------------------------- */

    /// Edit density over the trailing window, with a penalty for adjacent
    /// changes and a discount for changes separated by a clean run. The
    /// budget trips when the sum passes half the window, unless the chosen
    /// variant opens a long clean run ahead.
    fn check_rewriting(&self, m: usize, decision: &HealDecision) -> bool {
        let region = self.params.rewrite_region();
        let start = (m + 1).saturating_sub(region);
        let mut cost = 0u32;
        let mut prev_changed = false;
        let mut clean_run = 0usize;
        for i in start..=m {
            let c = *self.props.change_cost.get(i).unwrap_or(&0);
            if c > 0 {
                cost += c;
                if prev_changed {
                    cost += 1;
                }
                if clean_run >= GOOD_RUN && cost > 0 {
                    cost -= 1;
                }
                prev_changed = true;
                clean_run = 0;
            } else {
                prev_changed = false;
                clean_run += 1;
            }
        }
        if (cost as usize) <= region / 2 {
            return false;
        }
        let opens_clean_run =
            decision.perfect || decision.mers_to_next_fix as usize >= region / 2;
        !opens_clean_run
    }

    /// The last window of the most recent run of ≥ GOOD_RUN clean k-mers
    /// before `m`; the read keeps everything up to it.
    fn last_clean_run_end(&self, m: usize) -> Option<usize> {
        let mut clean = 0usize;
        for i in (0..m).rev() {
            if *self.props.change_cost.get(i).unwrap_or(&0) == 0 {
                clean += 1;
                if clean >= GOOD_RUN {
                    return Some(i + GOOD_RUN - 1);
                }
            } else {
                clean = 0;
            }
        }
        None
    }

    /* --------------------------------------------------------------------- */
    /*  N resolution                                                         */
    /* --------------------------------------------------------------------- */

    /// Resolve the Ns in the window at `m` by trying every replacement and
    /// keeping the deepest.
    fn resolve_ns(&mut self, seq: &mut Sequence, m: usize) -> NResolution {
        let k = self.k();
        let window = &seq.bases()[m..m + k];
        let n_positions: Vec<usize> = window
            .iter()
            .enumerate()
            .filter(|(_, &b)| mer::encode_base(b).is_none())
            .map(|(i, _)| i)
            .collect();
        if n_positions.len() > MAX_NS_PER_MER {
            return NResolution::TooMany;
        }

        // every assignment of the N positions
        let mut template = [0u8; 32];
        template[..k].copy_from_slice(window);
        let mut best: Option<(u32, Vec<u8>)> = None;
        let combos = 1usize << (2 * n_positions.len());
        for combo in 0..combos {
            let mut bases = template;
            for (slot, &pos) in n_positions.iter().enumerate() {
                bases[pos] = mer::BASES[(combo >> (2 * slot)) & 3];
            }
            if let Some(packed) = mer::pack(&bases[..k]) {
                let sum = self
                    .tables
                    .kmers
                    .depth_sum(packed, self.props.thresholds.min_depth)
                    .sum;
                if sum > 0 && best.as_ref().map_or(true, |(b, _)| sum > *b) {
                    best = Some((sum, bases[..k].to_vec()));
                }
            }
        }

        match best {
            Some((_, bases)) => {
                for &pos in &n_positions {
                    seq.set_base(m + pos, bases[pos]);
                }
                NResolution::Fixed
            }
            None => NResolution::NoCandidate,
        }
    }

    /* --------------------------------------------------------------------- */
    /*  Post-correction shaping                                              */
    /* --------------------------------------------------------------------- */

    /// Trim bases off both ends while the boundary k-mer sits below its
    /// minimum depth or pair depth.
    fn trim_broken_ends(&mut self, seq: &mut Sequence) {
        let t = self.props.thresholds;
        let below = |depth: u32, pair: i64| {
            depth < t.min_depth || (pair >= 0 && (pair as u32) < t.min_pair_depth)
        };

        let mut lead = 0usize;
        while lead < self.props.mer_count
            && below(self.props.depths[lead], self.props.pair_depths[lead])
        {
            lead += 1;
        }
        if lead == self.props.mer_count {
            // nothing salvageable
            seq.truncate(0);
            self.props.rediagnose(seq, self.tables, self.params);
            return;
        }
        let mut trail = 0usize;
        while trail < self.props.mer_count - lead
            && below(
                self.props.depths[self.props.mer_count - 1 - trail],
                self.props.pair_depths[self.props.mer_count - 1 - trail],
            )
        {
            trail += 1;
        }
        if lead > 0 || trail > 0 {
            seq.truncate(seq.len() - trail);
            seq.trim_start(lead);
            self.props.rediagnose(seq, self.tables, self.params);
        }
    }

    /// Grow the read while there is exactly one plausible next base.
    fn maybe_extend(&mut self, seq: &mut Sequence, original_len: usize, result: &mut CorrectionResult) {
        let target = match self.params.length_policy {
            LengthPolicy::Fixed | LengthPolicy::FixedPadded => original_len.max(seq.len()),
            LengthPolicy::Variable => seq.len() + self.params.extend,
        };
        let k = self.k();
        let t = self.props.thresholds;
        while seq.len() < target {
            let last = match seq.mer_at(seq.len() - k, k) {
                Some(p) => p,
                None => break,
            };
            let mut chosen: Option<u64> = None;
            let mut viable = 0;
            for code in 0..4u64 {
                let next = mer::shift_in(last, code, k);
                if self.tables.kmers.depth_sum(next, t.min_depth).sum >= t.min_depth {
                    viable += 1;
                    chosen = Some(code);
                }
            }
            let code = match (viable, chosen) {
                (1, Some(c)) => c,
                _ => break,
            };
            seq.append_base(mer::decode_base(code), REPLACEMENT_QUAL);
            // the pair signal can veto an extension the k-mer accepted
            if let Some(pt) = &self.tables.pairs {
                let m_new = seq.len() - k;
                let pair_ok = match pt.backward_pair(seq.bases(), m_new, k) {
                    Some(p) => pt.pair_depth(p) >= t.min_pair_depth,
                    None => true,
                };
                if !pair_ok {
                    seq.truncate(seq.len() - 1);
                    break;
                }
            }
            result.extended_bases += 1;
        }
    }

    /// Fixed-length policies never emit more bases than came in.
    fn clip_to_policy(&mut self, seq: &mut Sequence, original_len: usize) {
        if !matches!(self.params.length_policy, LengthPolicy::Variable) && seq.len() > original_len
        {
            seq.truncate(original_len);
        }
    }

    /// Padding happens after acceptance: the padding Ns carry no depth and
    /// must not feed back into the final diagnosis.
    fn pad_to_policy(&mut self, seq: &mut Sequence, original_len: usize) {
        if self.params.length_policy == LengthPolicy::FixedPadded {
            seq.pad_to(original_len);
        }
    }

    /// The accept rules: long enough, and not rewritten beyond recognition.
    fn accept(
        &mut self,
        seq: &Sequence,
        original_len: usize,
        result: &CorrectionResult,
    ) -> CorrectionOutcome {
        self.props.rediagnose(seq, self.tables, self.params);
        let min_len = original_len * self.params.good_pct as usize / 100;
        if seq.len() < min_len.max(self.k()) {
            return CorrectionOutcome::NotLongEnough;
        }
        // a fixed-length read that could not be rebuilt to full length is
        // not acceptable output
        if self.params.length_policy == LengthPolicy::Fixed && seq.len() != original_len {
            return CorrectionOutcome::NotLongEnough;
        }
        if self.props.state == ReadState::Broken {
            return CorrectionOutcome::Broken;
        }
        if self.props.changed_mers > original_len.saturating_sub(min_len) {
            return CorrectionOutcome::Broken;
        }
        if result.total_fixes() > 0 || result.trimmed_hdub || result.extended_bases > 0 || seq.len() != original_len
        {
            CorrectionOutcome::Corrected
        } else {
            CorrectionOutcome::Ok
        }
    }
}
