use crate::blue::mer::{self, MerVariant, VaryMode};
use crate::blue::params::{
    HealingParams, TraceLevel, HIGH_DEPTH_FACTOR, MAX_FOLLOWER_REPAIRS, MAX_HEAL_CALLS,
};
use crate::blue::pools::WorkerPools;
use crate::blue::read_props::{ReadProps, Thresholds};
use crate::blue::sequence::Sequence;
use crate::blue::Tables;
use smallvec::SmallVec;

/// What a repair did to the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixType {
    /// The k-mer was left as read.
    #[default]
    None,
    Sub,
    Del,
    Ins,
    /// N bases resolved from depth alone.
    N,
    /// The branch was given up.
    Abandon,
}

/// Verdict on one k-mer position. States only ever ratchet upward
/// (`Ok < Unsure < Check < Bad`) within a single classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MerState {
    Ok,
    Unsure,
    Check,
    Bad,
}

/// One candidate variant under evaluation, with its follower scores.
/// Pool-allocated per search; returned to the worker free list on exit.
#[derive(Debug, Default)]
pub struct VariantNode {
    pub fix_type: FixType,
    pub next_fix_type: FixType,
    pub mer: u64,
    pub length_delta: i32,
    pub depth: u32,
    pub unbalanced: bool,
    /// −1 when no pair can be formed at this position.
    pub pair_depth: i64,
    /// Accumulated follower depth.
    pub sum: u64,
    pub good_followers: u32,
    pub all_followers: u32,
    pub max_followers: u32,
    pub mer_count: u32,
    /// Fixes in this branch, including this one when it changes the read.
    pub fixes: u32,
    pub mers_to_next_fix: u32,
    pub mers_to_first_choice: u32,
    pub perfect_fix: bool,
    pub valid_variant: bool,
    pub marked_variant: bool,
    /// The read with this variant applied; scored by the follower walk.
    pub fix_context: Option<Sequence>,
}

impl VariantNode {
    pub fn reset(&mut self) {
        let context = self.fix_context.take();
        *self = VariantNode::default();
        self.fix_context = context;
    }
}

/// The outcome handed back to the per-read scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealDecision {
    pub fix_type: FixType,
    pub mer: u64,
    pub length_delta: i32,
    pub depth: u32,
    pub fixes: u32,
    pub all_followers: u32,
    pub good_followers: u32,
    pub max_followers: u32,
    pub sum: u64,
    pub mers_to_next_fix: u32,
    pub perfect: bool,
}

impl HealDecision {
    pub fn is_change(&self) -> bool {
        !matches!(self.fix_type, FixType::None | FixType::Abandon)
    }
}

/// The search ran past its hard call budget; the whole read is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeSizeExceeded;

/// Per-worker correction engine: the tables it consults, the run options,
/// its object pools and the per-read working state.
pub struct Healer<'a> {
    pub(crate) tables: &'a Tables,
    pub(crate) params: &'a HealingParams,
    pub(crate) pools: WorkerPools,
    pub(crate) props: ReadProps,
    /// Repair-search calls made for the current read.
    pub(crate) calls: u32,
    pub trace: Vec<String>,
}

impl<'a> Healer<'a> {
    pub fn new(tables: &'a Tables, params: &'a HealingParams) -> Self {
        Healer {
            tables,
            params,
            pools: WorkerPools::new(),
            props: ReadProps::new(),
            calls: 0,
            trace: Vec::new(),
        }
    }

    pub fn props(&self) -> &ReadProps {
        &self.props
    }

    #[inline]
    pub(crate) fn k(&self) -> usize {
        self.tables.mer_size()
    }

    /* --------------------------------------------------------------------- */
    /*  Single k-mer repair search                                           */
    /* --------------------------------------------------------------------- */

    /// Find the best repair for the k-mer at window `m` of `seq`.
    ///
    /// `reason` is how the scan classified the position; `repairs_left`
    /// bounds the recursion through follower repairs. Returns the chosen
    /// variant (possibly "leave unchanged"), or `Err` when the total call
    /// budget for the read is exhausted.
    pub fn heal_mer(
        &mut self,
        seq: &Sequence,
        m: usize,
        reason: MerState,
        repairs_left: u32,
        sub_fixes_only: bool,
    ) -> Result<HealDecision, TreeSizeExceeded> {
        self.calls += 1;
        if self.calls > MAX_HEAL_CALLS {
            return Err(TreeSizeExceeded);
        }
        let k = self.k();
        let start_mer = match seq.mer_at(m, k) {
            Some(packed) => packed,
            // N windows are resolved before the search is entered
            None => return Ok(abandon_decision()),
        };

        let mut candidates = self.collect_candidates(seq, m, start_mer, reason, sub_fixes_only);
        if candidates.is_empty() {
            return Ok(abandon_decision());
        }

        // build and score a node per surviving candidate
        let mut nodes: Vec<Box<VariantNode>> = Vec::with_capacity(candidates.len());
        for cand in candidates.drain(..) {
            let mut node = self.pools.take_node();
            node.fix_type = cand.fix_type;
            node.mer = cand.variant.mer;
            node.length_delta = cand.variant.length_delta;
            node.depth = cand.depth;
            node.unbalanced = cand.unbalanced;
            node.fixes = if cand.fix_type == FixType::None { 0 } else { 1 };
            node.valid_variant = true;

            let mut context = self.pools.take_sequence();
            context.assign(seq);
            if cand.fix_type != FixType::None {
                context.apply_variant(m, cand.variant.mer, k, cand.variant.length_delta);
            }
            node.pair_depth = self.pair_depth_at(&context, m);
            node.mer_count = context.mer_count(k) as u32;
            node.fix_context = Some(context);

            match self.count_followers(&mut node, m, start_mer, repairs_left, sub_fixes_only) {
                Ok(()) => nodes.push(node),
                Err(e) => {
                    self.pools.return_node(node);
                    for n in nodes {
                        self.pools.return_node(n);
                    }
                    return Err(e);
                }
            }
        }

        let best = self.choose_best(&nodes, m);
        let decision = decision_from(&nodes[best]);
        if self.params.trace >= TraceLevel::Choices {
            self.trace_choice(m, &nodes, best);
        }
        for n in nodes {
            self.pools.return_node(n);
        }
        Ok(decision)
    }

    /* --------------------------------------------------------------------- */
    /*  Candidate collection                                                 */
    /* --------------------------------------------------------------------- */

    fn collect_candidates(
        &mut self,
        seq: &Sequence,
        m: usize,
        start_mer: u64,
        reason: MerState,
        sub_fixes_only: bool,
    ) -> SmallVec<[Candidate; 16]> {
        let k = self.k();
        let t = self.props.thresholds;
        let mut raw: SmallVec<[(MerVariant, FixType); 32]> = SmallVec::new();

        // the unchanged k-mer stays on the table unless the position is bad
        if reason != MerState::Bad {
            raw.push((
                MerVariant {
                    mer: start_mer,
                    length_delta: 0,
                },
                FixType::None,
            ));
        }

        // substitutions: mid-read the suspect base is the newly arrived
        // last one; at the very start the whole window is suspect
        let sub_mode = if m == 0 { VaryMode::VaryAnyOne } else { VaryMode::VaryLast };
        for v in mer::sub_variants(start_mer, k, sub_mode, false) {
            raw.push((v, FixType::Sub));
        }

        let indels_allowed = !sub_fixes_only && !self.params.subs_only;
        if indels_allowed {
            for v in mer::del_variants(start_mer, k) {
                raw.push((v, FixType::Del));
            }
            let next_bases = self.bases_after_window(seq, m);
            let ins_mode = if m == 0 || self.params.hp_model {
                VaryMode::VaryAnyOne
            } else {
                VaryMode::VaryLast
            };
            for v in mer::ins_variants(start_mer, k, ins_mode, &next_bases) {
                raw.push((v, FixType::Ins));
            }
            if ins_mode == VaryMode::VaryAnyOne {
                for v in mer::ins_variants(start_mer, k, VaryMode::VaryLast, &next_bases) {
                    raw.push((v, FixType::Ins));
                }
            }
        }

        // widen the substitution net when nothing else is on the table
        if m == 0 {
            let any_alternative = raw.iter().any(|(v, ft)| {
                *ft != FixType::None && self.tables.kmers.depth_sum(v.mer, t.min_depth).sum >= t.min_depth
            });
            if !any_alternative {
                for v in mer::sub_variants(start_mer, k, VaryMode::VaryAnyTwo, false) {
                    raw.push((v, FixType::Sub));
                }
            }
        }

        // score, drop the hopeless, dedupe by (mer, delta)
        let mut out: SmallVec<[Candidate; 16]> = SmallVec::new();
        let mut deepest = 0u32;
        for (variant, fix_type) in raw {
            let ds = self.tables.kmers.depth_sum(variant.mer, t.min_depth);
            if fix_type != FixType::None && ds.sum < t.min_depth {
                continue;
            }
            deepest = deepest.max(ds.sum);
            out.push(Candidate {
                variant,
                fix_type,
                depth: ds.sum,
                unbalanced: ds.unbalanced,
            });
        }

        // deep-repeat guard: follower look-ahead is meaningless inside a
        // heavy repeat, keep to substitutions there
        let high = self
            .tables
            .kmers
            .avg_depth_loaded()
            .saturating_mul(HIGH_DEPTH_FACTOR);
        if high > 0 && deepest >= high {
            out.retain(|c| c.variant.length_delta == 0);
        }

        out.sort_by_key(|c| (c.variant.mer, c.variant.length_delta, fix_rank(c.fix_type)));
        out.dedup_by_key(|c| (c.variant.mer, c.variant.length_delta));
        out
    }

    /// 2-bit codes of the read bases just after the window, up to the
    /// insert-repair gap; stops at the first non-ACGT base.
    fn bases_after_window(&self, seq: &Sequence, m: usize) -> SmallVec<[u64; 8]> {
        let k = self.k();
        let mut out = SmallVec::new();
        for &b in seq
            .bases()
            .iter()
            .skip(m + k)
            .take(crate::blue::mer::MAX_GAP)
        {
            match mer::encode_base(b) {
                Some(code) => out.push(code),
                None => break,
            }
        }
        out
    }

    fn pair_depth_at(&self, seq: &Sequence, m: usize) -> i64 {
        match &self.tables.pairs {
            Some(pt) => pt
                .backward_pair(seq.bases(), m, self.k())
                .map(|p| pt.pair_depth(p) as i64)
                .unwrap_or(-1),
            None => -1,
        }
    }

    /* --------------------------------------------------------------------- */
    /*  Follower counting                                                    */
    /* --------------------------------------------------------------------- */

    /// Walk the fixed read from `m+1`, crediting the node with every
    /// healthy k-mer. The first unhealthy position recurses into
    /// `heal_mer` while the repair budget lasts; the recursion's counts
    /// fold into this node.
    fn count_followers(
        &mut self,
        node: &mut VariantNode,
        m: usize,
        start_mer: u64,
        repairs_left: u32,
        sub_fixes_only: bool,
    ) -> Result<(), TreeSizeExceeded> {
        let context = node.fix_context.take().expect("node carries its context");
        let mer_count = context.mer_count(self.k());
        node.max_followers = mer_count.saturating_sub(m + 1) as u32;
        node.mers_to_next_fix = node.max_followers;

        let mut prev_depth = node.depth;
        let mut prev_pair = node.pair_depth;
        let mut i = m + 1;
        let outcome = loop {
            if i >= mer_count {
                break Ok(());
            }
            let state = self.classify_follower(&context, i, prev_depth, prev_pair);
            if state == MerState::Ok {
                let depth = self
                    .tables
                    .kmers
                    .depth_sum(context.mer_at(i, self.k()).unwrap_or(0), self.props.thresholds.min_depth)
                    .sum;
                node.all_followers += 1;
                node.good_followers += 1;
                node.sum += depth as u64;
                prev_depth = depth;
                prev_pair = self.pair_depth_at(&context, i);
                i += 1;
                continue;
            }
            if repairs_left == 0 {
                node.mers_to_next_fix = (i - m) as u32;
                break Ok(());
            }
            match self.heal_mer(&context, i, state, repairs_left - 1, sub_fixes_only) {
                Err(e) => break Err(e),
                Ok(sub) => {
                    if sub.fix_type == FixType::Abandon {
                        node.next_fix_type = FixType::Abandon;
                        node.mers_to_next_fix = (i - m) as u32;
                        break Ok(());
                    }
                    // a repair that reinstates the k-mer this search started
                    // from is a cycle; the branch is worthless
                    if sub.is_change() && sub.mer == start_mer {
                        node.all_followers = 0;
                        node.good_followers = 0;
                        node.next_fix_type = FixType::Abandon;
                        break Ok(());
                    }
                    node.next_fix_type = sub.fix_type;
                    node.mers_to_next_fix = (i - m) as u32;
                    node.fixes += sub.fixes;
                    node.all_followers += 1 + sub.all_followers;
                    node.good_followers += sub.good_followers;
                    node.sum += sub.sum + sub.depth as u64;
                    // the recursion walked the rest of the read; extend our
                    // horizon to what it could see
                    node.max_followers = node
                        .max_followers
                        .max((i - m) as u32 + sub.max_followers);
                    break Ok(());
                }
            }
        };
        node.perfect_fix =
            node.all_followers == node.max_followers && node.all_followers == node.good_followers;
        node.fix_context = Some(context);
        outcome
    }

    /// Classify a follower position, ratcheting upward only.
    fn classify_follower(&self, seq: &Sequence, i: usize, prev_depth: u32, prev_pair: i64) -> MerState {
        let t = self.props.thresholds;
        let packed = match seq.mer_at(i, self.k()) {
            Some(p) => p,
            None => return MerState::Bad,
        };
        let ds = self.tables.kmers.depth_sum(packed, t.min_depth);
        let pair = self.pair_depth_at(seq, i);

        let mut state = MerState::Ok;
        if self.mer_is_bad(ds.sum, pair, prev_depth, prev_pair, &t) {
            return MerState::Bad;
        }
        if ds.unbalanced
            && !self.props.unbalanced_read
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Check);
        }
        if ds.sum < t.ok_depth
            && pair >= 0
            && (pair as u32) < t.ok_pair_depth
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Check);
        }
        if prev_depth >= t.ok_depth
            && ds.sum * 3 <= prev_depth * 2
            && self.has_viable_alternative(packed, t.min_depth)
        {
            state = state.max(MerState::Unsure);
        }
        state
    }

    /// The bad-k-mer rule: too shallow, or shallow with no pair support.
    /// Redeemed when both depth and pair sit within 75% of the previous
    /// accepted k-mer (a sharp consensus step, not an error).
    pub(crate) fn mer_is_bad(
        &self,
        sum: u32,
        pair: i64,
        prev_depth: u32,
        prev_pair: i64,
        t: &Thresholds,
    ) -> bool {
        let mut bad = sum < t.min_depth
            || (sum < t.ok_depth && pair >= 0 && (pair as u32) < t.min_pair_depth);
        if bad && prev_depth > 0 {
            let depth_close = sum as u64 * 4 >= prev_depth as u64 * 3;
            let pair_close = pair < 0
                || prev_pair <= 0
                || pair as u64 * 4 >= prev_pair as u64 * 3;
            if depth_close && pair_close {
                bad = false;
            }
        }
        bad
    }

    /// Whether varying the last base can produce a plausibly deep k-mer.
    pub(crate) fn has_viable_alternative(&self, packed: u64, min_depth: u32) -> bool {
        mer::sub_variants(packed, self.k(), VaryMode::VaryLast, false)
            .iter()
            .any(|v| self.tables.kmers.depth_sum(v.mer, min_depth).sum >= min_depth)
    }

    /* --------------------------------------------------------------------- */
    /*  Variant choice                                                       */
    /* --------------------------------------------------------------------- */

    /// The preference cascade. Each rule either decides or narrows the
    /// field for the next one.
    fn choose_best(&self, nodes: &[Box<VariantNode>], _m: usize) -> usize {
        let mut live: Vec<usize> = (0..nodes.len()).collect();
        if live.len() == 1 {
            return live[0];
        }
        let t = self.props.thresholds;

        // 1. perfect fixes with every follower good; the unchanged k-mer
        //    wins outright when it qualifies
        let perfect_good: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| nodes[i].perfect_fix)
            .collect();
        if !perfect_good.is_empty() {
            if let Some(&unchanged) = perfect_good
                .iter()
                .find(|&&i| nodes[i].fix_type == FixType::None)
            {
                return unchanged;
            }
            live = perfect_good;
            // 2. fewest fixes among them
            let fewest = live.iter().map(|&i| nodes[i].fixes).min().unwrap();
            live.retain(|&i| nodes[i].fixes == fewest);
            if live.len() == 1 {
                return live[0];
            }
        }

        // 3. pair-supported variants dominate when any exists
        let paired: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| nodes[i].pair_depth >= t.min_pair_depth as i64 && nodes[i].pair_depth >= 0)
            .collect();
        if !paired.is_empty() && t.min_pair_depth > 0 {
            live = paired;
            if live.len() == 1 {
                return live[0];
            }
        }

        // 4. drop unbalanced variants when the read itself balances
        if !self.props.unbalanced_read {
            let balanced: Vec<usize> = live
                .iter()
                .copied()
                .filter(|&i| !nodes[i].unbalanced)
                .collect();
            if !balanced.is_empty() {
                live = balanced;
                if live.len() == 1 {
                    return live[0];
                }
            }
        }

        // 5. a unique perfect variant (good or not) decides
        let perfect: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| nodes[i].all_followers == nodes[i].max_followers)
            .collect();
        if perfect.len() == 1 {
            return perfect[0];
        }

        // 6. highest all-follower count, 10% margin
        let best_all = live.iter().map(|&i| nodes[i].all_followers).max().unwrap();
        let floor_all = best_all - best_all / 10;
        live.retain(|&i| nodes[i].all_followers >= floor_all);
        if live.len() == 1 {
            return live[0];
        }

        // 7. highest good-follower count, 10% margin
        let best_good = live.iter().map(|&i| nodes[i].good_followers).max().unwrap();
        let floor_good = best_good - best_good / 10;
        live.retain(|&i| nodes[i].good_followers >= floor_good);
        if live.len() == 1 {
            return live[0];
        }

        // 8. keep the read as written when that is still on the table
        if let Some(&unchanged) = live.iter().find(|&&i| nodes[i].fix_type == FixType::None) {
            return unchanged;
        }

        // 9. longest clean run ahead, fewest fixes spent
        let run_score =
            |i: usize| nodes[i].mers_to_next_fix + (MAX_FOLLOWER_REPAIRS.saturating_sub(nodes[i].fixes));
        let best_run = live.iter().map(|&i| run_score(i)).max().unwrap();
        let runners: Vec<usize> = live
            .iter()
            .copied()
            .filter(|&i| run_score(i) == best_run)
            .collect();
        if runners.len() == 1 {
            return runners[0];
        }
        live = runners;

        // 10. a variant holding ≥70% of the combined follower depth decides
        let total: u64 = live.iter().map(|&i| nodes[i].sum).sum();
        if total > 0 {
            let dominant: Vec<usize> = live
                .iter()
                .copied()
                .filter(|&i| nodes[i].sum * 10 >= total * 7)
                .collect();
            if dominant.len() == 1 {
                return dominant[0];
            }
        }

        // 11. fall back on fix-type preference, deepest first within a type
        live.sort_by_key(|&i| (fix_rank(nodes[i].fix_type), std::cmp::Reverse(nodes[i].sum)));
        live[0]
    }

    fn trace_choice(&mut self, m: usize, nodes: &[Box<VariantNode>], best: usize) {
        let k = self.k();
        let mut line = format!("choices @{m}:");
        for (idx, n) in nodes.iter().enumerate() {
            let mark = if idx == best { '*' } else { ' ' };
            line.push_str(&format!(
                " {}{:?}/{}[d={} f={}/{}/{}]",
                mark,
                n.fix_type,
                mer::to_string(n.mer, k),
                n.depth,
                n.good_followers,
                n.all_followers,
                n.max_followers
            ));
        }
        self.trace.push(line);
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    variant: MerVariant,
    fix_type: FixType,
    depth: u32,
    unbalanced: bool,
}

fn decision_from(node: &VariantNode) -> HealDecision {
    HealDecision {
        fix_type: node.fix_type,
        mer: node.mer,
        length_delta: node.length_delta,
        depth: node.depth,
        fixes: node.fixes,
        all_followers: node.all_followers,
        good_followers: node.good_followers,
        max_followers: node.max_followers,
        sum: node.sum,
        mers_to_next_fix: node.mers_to_next_fix,
        perfect: node.perfect_fix,
    }
}

fn abandon_decision() -> HealDecision {
    HealDecision {
        fix_type: FixType::Abandon,
        ..HealDecision::default()
    }
}

/// Order used for the final fix-type preference: no-change, then the fix
/// kinds from least to most invasive.
pub(crate) fn fix_rank(ft: FixType) -> u8 {
    match ft {
        FixType::None => 0,
        FixType::Sub => 1,
        FixType::Del => 2,
        FixType::Ins => 3,
        FixType::N => 4,
        FixType::Abandon => 5,
    }
}
