//! The sparse synaptic connectivity store shared by proximal and distal
//! dendrites.
//!
//! A `SynapseGraph` maps each target segment, identified by a
//! [`SegPath`], to its source-bit → permanence synapses. A synapse is
//! "connected" iff its permanence is at least the graph's connection
//! threshold; only connected synapses count towards excitation. A reverse
//! index from source bit to the segments it touches makes excitation queries
//! proportional to the active source set rather than the whole graph.
//!
//! The two dendrite classes are two instances of this one structure:
//! the proximal graph owns one "cell" per column (`ci` fixed at 0), the
//! distal graph owns `depth` cells per column. All permanence mutation goes
//! through [`SynapseGraph::bulk_learn`], which applies a batch of
//! [`SegUpdate`] records sequentially; two updates targeting the same
//! segment in one batch are a programmer error.

use super::state::SegPath;
use super::topology::Topology;
use fxhash::{FxHashMap, FxHashSet};
use tracing::trace;

/// One segment's synapses: source bit → permanence.
pub type Segment = FxHashMap<usize, f32>;

/// What a [`SegUpdate`] does to its target segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegUpdateOp {
    /// Reinforce active synapses, decay the rest, then grow and cull.
    Learn,
    /// Decay active synapses only.
    Punish,
    /// Reinforce active synapses, decay the rest; never grow or cull.
    Reinforce,
}

/// A pending adjustment to one target segment.
#[derive(Debug, Clone)]
pub struct SegUpdate {
    pub target: SegPath,
    pub op: SegUpdateOp,
    /// Sources to grow new synapses from. Must not already exist on the
    /// target segment.
    pub grow_sources: Vec<usize>,
    /// Sources whose synapses are removed. Must exist on the target segment.
    pub die_sources: Vec<usize>,
}

impl SegUpdate {
    pub fn learn(target: SegPath, grow_sources: Vec<usize>, die_sources: Vec<usize>) -> Self {
        Self {
            target,
            op: SegUpdateOp::Learn,
            grow_sources,
            die_sources,
        }
    }

    pub fn punish(target: SegPath) -> Self {
        Self {
            target,
            op: SegUpdateOp::Punish,
            grow_sources: Vec::new(),
            die_sources: Vec::new(),
        }
    }

    pub fn reinforce(target: SegPath) -> Self {
        Self {
            target,
            op: SegUpdateOp::Reinforce,
            grow_sources: Vec::new(),
            die_sources: Vec::new(),
        }
    }
}

/// Sparse per-target-segment synapse store with a source → targets reverse
/// index.
#[derive(Debug, Clone)]
pub struct SynapseGraph {
    /// Ordered segment lists, one slot per cell, indexed by
    /// `col * cells_per_col + ci`. Segment indices stay stable: a culled
    /// segment is emptied and regrown in place, never shifted.
    cells: Vec<Vec<Segment>>,

    /// Source bit → segments holding a synapse from it (connected or not).
    by_source: FxHashMap<usize, FxHashSet<SegPath>>,

    cells_per_col: usize,
    n_sources: usize,
    max_segments: usize,
    perm_connected: f32,
}

impl SynapseGraph {
    /// Creates an empty graph for `n_columns * cells_per_col` cells over a
    /// source space of `n_sources` bits.
    pub fn new(
        n_columns: usize,
        cells_per_col: usize,
        n_sources: usize,
        max_segments: usize,
        perm_connected: f32,
    ) -> Self {
        Self {
            cells: vec![Vec::new(); n_columns * cells_per_col],
            by_source: FxHashMap::default(),
            cells_per_col,
            n_sources,
            max_segments,
            perm_connected,
        }
    }

    #[inline]
    fn slot(&self, col: usize, ci: usize) -> usize {
        debug_assert!(ci < self.cells_per_col);
        col * self.cells_per_col + ci
    }

    /// The connection threshold this graph was built with.
    #[inline]
    pub fn perm_connected(&self) -> f32 {
        self.perm_connected
    }

    /// Width of the source bit space.
    #[inline]
    pub fn n_sources(&self) -> usize {
        self.n_sources
    }

    /// The ordered segment list of a cell.
    #[inline]
    pub fn segments(&self, col: usize, ci: usize) -> &[Segment] {
        &self.cells[self.slot(col, ci)]
    }

    /// Number of non-empty segments on a cell.
    #[inline]
    pub fn seg_count(&self, col: usize, ci: usize) -> usize {
        self.segments(col, ci)
            .iter()
            .filter(|seg| !seg.is_empty())
            .count()
    }

    /// The source → permanence mapping of a target segment, if present.
    #[inline]
    pub fn in_synapses(&self, target: SegPath) -> Option<&Segment> {
        self.cells[self.slot(target.col, target.ci)].get(target.si)
    }

    /// Source ids connected to the target segment (permanence at or above
    /// the connection threshold).
    pub fn sources_connected_to(&self, target: SegPath) -> impl Iterator<Item = usize> + '_ {
        self.in_synapses(target)
            .into_iter()
            .flatten()
            .filter(|(_, &p)| p >= self.perm_connected)
            .map(|(&s, _)| s)
    }

    /// Target segments holding a connected synapse from the given source.
    pub fn targets_connected_from(&self, source: usize) -> impl Iterator<Item = SegPath> + '_ {
        self.by_source
            .get(&source)
            .into_iter()
            .flatten()
            .copied()
            .filter(move |&t| {
                self.in_synapses(t)
                    .and_then(|seg| seg.get(&source))
                    .is_some_and(|&p| p >= self.perm_connected)
            })
    }

    /// Excitation per segment: the number of active sources among each
    /// segment's connected synapses. Segments below `stimulus_threshold`
    /// are omitted.
    pub fn excitations(
        &self,
        active_sources: &FxHashSet<usize>,
        stimulus_threshold: usize,
    ) -> FxHashMap<SegPath, usize> {
        let mut exc: FxHashMap<SegPath, usize> = FxHashMap::default();
        for &source in active_sources {
            let Some(targets) = self.by_source.get(&source) else {
                continue;
            };
            for &target in targets {
                let connected = self
                    .in_synapses(target)
                    .and_then(|seg| seg.get(&source))
                    .is_some_and(|&p| p >= self.perm_connected);
                if connected {
                    *exc.entry(target).or_insert(0) += 1;
                }
            }
        }
        exc.retain(|_, count| *count >= stimulus_threshold);
        exc
    }

    /// Number of a segment's synapses with permanence at least `pcon` whose
    /// source is active. `pcon = 0.0` counts every synapse.
    #[inline]
    pub fn segment_activity(seg: &Segment, active_sources: &FxHashSet<usize>, pcon: f32) -> usize {
        seg.iter()
            .filter(|(s, &p)| p >= pcon && active_sources.contains(s))
            .count()
    }

    /// The cell's segment with the most active synapses, counting synapses
    /// of any permanence, provided the count reaches `min_activity`.
    /// Ties resolve to the lowest segment index. Returns `(index, activity)`.
    pub fn best_matching_segment(
        &self,
        col: usize,
        ci: usize,
        active_sources: &FxHashSet<usize>,
        min_activity: usize,
    ) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (si, seg) in self.segments(col, ci).iter().enumerate() {
            let activity = Self::segment_activity(seg, active_sources, 0.0);
            if activity >= min_activity && best.is_none_or(|(_, b)| activity > b) {
                best = Some((si, activity));
            }
        }
        best
    }

    /// Index for a new segment on the cell: the next free slot while below
    /// `max_segments`, otherwise the slot of the segment to cull — the one
    /// with the fewest connected synapses, ties broken by fewest total
    /// synapses, then lowest index.
    pub fn new_segment_id(&self, col: usize, ci: usize) -> (usize, bool) {
        let segs = self.segments(col, ci);
        if segs.len() < self.max_segments {
            return (segs.len(), false);
        }
        let si = segs
            .iter()
            .enumerate()
            .min_by_key(|(_, seg)| {
                let connected = seg
                    .values()
                    .filter(|&&p| p >= self.perm_connected)
                    .count();
                (connected, seg.len())
            })
            .map(|(si, _)| si)
            .unwrap_or(0);
        (si, true)
    }

    /// Installs a segment wholesale, replacing whatever the slot held.
    /// `si` must be at most the current segment count and below
    /// `max_segments`. Used for initial receptive fields and tests.
    pub fn seed_segment(
        &mut self,
        col: usize,
        ci: usize,
        si: usize,
        synapses: impl IntoIterator<Item = (usize, f32)>,
    ) {
        assert!(si < self.max_segments, "segment index {} over limit", si);
        let slot = self.slot(col, ci);
        assert!(si <= self.cells[slot].len(), "segment index {} not contiguous", si);

        if si == self.cells[slot].len() {
            self.cells[slot].push(Segment::default());
        } else {
            let old = std::mem::take(&mut self.cells[slot][si]);
            let path = SegPath { col, ci, si };
            for source in old.keys() {
                self.unindex(*source, path);
            }
        }

        let path = SegPath { col, ci, si };
        for (source, perm) in synapses {
            debug_assert!(source < self.n_sources);
            let seg = &mut self.cells[slot][si];
            if seg.insert(source, perm.clamp(0.0, 1.0)).is_none() {
                self.by_source.entry(source).or_default().insert(path);
            }
        }
    }

    /// Applies a batch of segment updates sequentially.
    ///
    /// - `Learn`: existing synapses from active sources gain `pinc`, the
    ///   rest lose `pdec`; then `die_sources` are removed and `grow_sources`
    ///   inserted at `pinit`.
    /// - `Punish`: existing synapses from active sources lose `pdec`.
    /// - `Reinforce`: like `Learn` without growth or death.
    ///
    /// All permanence arithmetic clamps to [0, 1].
    pub fn bulk_learn(
        &mut self,
        updates: &[SegUpdate],
        active_sources: &FxHashSet<usize>,
        pinc: f32,
        pdec: f32,
        pinit: f32,
    ) {
        let mut seen = FxHashSet::default();
        for up in updates {
            assert!(
                seen.insert(up.target),
                "duplicate target {:?} in bulk_learn batch",
                up.target
            );
        }

        trace!(updates = updates.len(), "bulk_learn");
        for up in updates {
            match up.op {
                SegUpdateOp::Learn => {
                    self.ensure_slot(up.target);
                    self.adjust(up.target, active_sources, pinc, pdec);
                    for &source in &up.die_sources {
                        self.kill(up.target, source);
                    }
                    for &source in &up.grow_sources {
                        self.grow(up.target, source, pinit);
                    }
                }
                SegUpdateOp::Punish => {
                    let slot = self.slot(up.target.col, up.target.ci);
                    if let Some(seg) = self.cells[slot].get_mut(up.target.si) {
                        for (source, perm) in seg.iter_mut() {
                            if active_sources.contains(source) {
                                *perm = (*perm - pdec).clamp(0.0, 1.0);
                            }
                        }
                    }
                }
                SegUpdateOp::Reinforce => {
                    self.adjust(up.target, active_sources, pinc, pdec);
                }
            }
        }
    }

    /// Appends an empty segment when the target names the next free slot.
    fn ensure_slot(&mut self, target: SegPath) {
        assert!(target.si < self.max_segments, "segment index over limit");
        let slot = self.slot(target.col, target.ci);
        assert!(target.si <= self.cells[slot].len(), "segment index not contiguous");
        if target.si == self.cells[slot].len() {
            self.cells[slot].push(Segment::default());
        }
    }

    fn adjust(&mut self, target: SegPath, active_sources: &FxHashSet<usize>, pinc: f32, pdec: f32) {
        let slot = self.slot(target.col, target.ci);
        let Some(seg) = self.cells[slot].get_mut(target.si) else {
            return;
        };
        for (source, perm) in seg.iter_mut() {
            let delta = if active_sources.contains(source) {
                pinc
            } else {
                -pdec
            };
            *perm = (*perm + delta).clamp(0.0, 1.0);
        }
    }

    fn grow(&mut self, target: SegPath, source: usize, pinit: f32) {
        debug_assert!(source < self.n_sources);
        let slot = self.slot(target.col, target.ci);
        let seg = &mut self.cells[slot][target.si];
        let prev = seg.insert(source, pinit.clamp(0.0, 1.0));
        assert!(prev.is_none(), "growing existing source {} on {:?}", source, target);
        self.by_source.entry(source).or_default().insert(target);
    }

    fn kill(&mut self, target: SegPath, source: usize) {
        let slot = self.slot(target.col, target.ci);
        let removed = self.cells[slot][target.si].remove(&source);
        assert!(removed.is_some(), "killing absent source {} on {:?}", source, target);
        self.unindex(source, target);
    }

    fn unindex(&mut self, source: usize, target: SegPath) {
        if let Some(targets) = self.by_source.get_mut(&source) {
            targets.remove(&target);
            if targets.is_empty() {
                self.by_source.remove(&source);
            }
        }
    }

    /// Mean per-dimension extent, on the source topology, of the connected
    /// synapses of a column's proximal segments. 0.0 when the column has no
    /// connected synapses.
    pub fn connected_span(&self, col: usize, source_topology: &Topology) -> f32 {
        let n_dims = source_topology.dimensions().len();
        let mut lo = vec![usize::MAX; n_dims];
        let mut hi = vec![0usize; n_dims];
        let mut any = false;

        for seg in self.segments(col, 0) {
            for (&source, &perm) in seg {
                if perm < self.perm_connected {
                    continue;
                }
                any = true;
                for (d, &c) in source_topology.coord_of(source).iter().enumerate() {
                    lo[d] = lo[d].min(c);
                    hi[d] = hi[d].max(c);
                }
            }
        }

        if !any {
            return 0.0;
        }
        let total: usize = lo.iter().zip(&hi).map(|(&l, &h)| h - l + 1).sum();
        total as f32 / n_dims as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(col: usize, ci: usize, si: usize) -> SegPath {
        SegPath { col, ci, si }
    }

    fn actives(bits: &[usize]) -> FxHashSet<usize> {
        bits.iter().copied().collect()
    }

    fn graph() -> SynapseGraph {
        SynapseGraph::new(4, 2, 100, 3, 0.20)
    }

    #[test]
    fn excitations_count_connected_only() {
        let mut g = graph();
        g.seed_segment(1, 0, 0, [(5, 0.25), (6, 0.25), (7, 0.10), (8, 0.30)]);
        g.seed_segment(2, 1, 0, [(5, 0.21), (9, 0.21)]);

        let exc = g.excitations(&actives(&[5, 6, 7]), 1);
        assert_eq!(exc.get(&path(1, 0, 0)), Some(&2)); // 7 is disconnected
        assert_eq!(exc.get(&path(2, 1, 0)), Some(&1));

        // Threshold filters out weakly excited segments.
        let exc = g.excitations(&actives(&[5, 6, 7]), 2);
        assert_eq!(exc.len(), 1);
        assert!(exc.contains_key(&path(1, 0, 0)));
    }

    #[test]
    fn learn_adjusts_grows_and_kills() {
        let mut g = graph();
        g.seed_segment(0, 0, 0, [(1, 0.50), (2, 0.50)]);

        let up = SegUpdate::learn(path(0, 0, 0), vec![3], vec![2]);
        g.bulk_learn(&[up], &actives(&[1]), 0.05, 0.01, 0.16);

        let seg = g.in_synapses(path(0, 0, 0)).unwrap();
        assert_eq!(seg.len(), 2);
        assert!((seg[&1] - 0.55).abs() < 1e-6);
        assert!((seg[&3] - 0.16).abs() < 1e-6);
        assert!(!seg.contains_key(&2));

        // Reverse index follows growth and death.
        assert_eq!(g.targets_connected_from(1).count(), 1);
        assert_eq!(g.excitations(&actives(&[2]), 1).len(), 0);
    }

    #[test]
    fn punish_touches_active_sources_only() {
        let mut g = graph();
        g.seed_segment(0, 1, 0, [(1, 0.50), (2, 0.50)]);

        g.bulk_learn(
            &[SegUpdate::punish(path(0, 1, 0))],
            &actives(&[1]),
            0.05,
            0.002,
            0.16,
        );

        let seg = g.in_synapses(path(0, 1, 0)).unwrap();
        assert!((seg[&1] - 0.498).abs() < 1e-6);
        assert!((seg[&2] - 0.50).abs() < 1e-6);
    }

    #[test]
    fn reinforce_never_grows() {
        let mut g = graph();
        g.seed_segment(0, 0, 0, [(1, 0.50), (2, 0.50)]);

        g.bulk_learn(
            &[SegUpdate::reinforce(path(0, 0, 0))],
            &actives(&[1]),
            0.11,
            0.01,
            0.16,
        );

        let seg = g.in_synapses(path(0, 0, 0)).unwrap();
        assert_eq!(seg.len(), 2);
        assert!((seg[&1] - 0.61).abs() < 1e-6);
        assert!((seg[&2] - 0.49).abs() < 1e-6);
    }

    #[test]
    fn permanences_clamp_to_unit_interval() {
        let mut g = graph();
        g.seed_segment(0, 0, 0, [(1, 0.99), (2, 0.005)]);

        for _ in 0..3 {
            g.bulk_learn(
                &[SegUpdate::learn(path(0, 0, 0), vec![], vec![])],
                &actives(&[1]),
                0.05,
                0.01,
                0.16,
            );
        }

        let seg = g.in_synapses(path(0, 0, 0)).unwrap();
        assert_eq!(seg[&1], 1.0);
        assert_eq!(seg[&2], 0.0);
    }

    #[test]
    #[should_panic(expected = "duplicate target")]
    fn duplicate_targets_in_batch_panic() {
        let mut g = graph();
        g.seed_segment(0, 0, 0, [(1, 0.5)]);
        let ups = vec![
            SegUpdate::reinforce(path(0, 0, 0)),
            SegUpdate::punish(path(0, 0, 0)),
        ];
        g.bulk_learn(&ups, &actives(&[1]), 0.05, 0.01, 0.16);
    }

    #[test]
    fn best_matching_counts_disconnected_synapses() {
        let mut g = graph();
        g.seed_segment(3, 1, 0, [(1, 0.01), (2, 0.01), (3, 0.5)]);
        g.seed_segment(3, 1, 1, [(1, 0.9), (9, 0.9)]);

        let best = g.best_matching_segment(3, 1, &actives(&[1, 2, 3]), 2);
        assert_eq!(best, Some((0, 3)));
        assert_eq!(g.best_matching_segment(3, 1, &actives(&[9]), 2), None);
    }

    #[test]
    fn new_segment_id_culls_weakest_when_full() {
        let mut g = graph();
        g.seed_segment(0, 0, 0, [(1, 0.5), (2, 0.5)]);
        g.seed_segment(0, 0, 1, [(3, 0.05), (4, 0.05), (5, 0.5)]);
        g.seed_segment(0, 0, 2, [(6, 0.05)]);

        // Slots full; segment 2 has no connected synapses and loses.
        assert_eq!(g.new_segment_id(0, 0), (2, true));

        let mut g2 = graph();
        g2.seed_segment(0, 0, 0, [(1, 0.5)]);
        assert_eq!(g2.new_segment_id(0, 0), (1, false));
    }

    #[test]
    fn connected_span_measures_extent() {
        let topo = Topology::new(&[10]);
        let mut g = SynapseGraph::new(4, 1, 10, 1, 0.20);
        g.seed_segment(0, 0, 0, [(2, 0.5), (6, 0.5), (4, 0.01)]);
        assert_eq!(g.connected_span(0, &topo), 5.0);
        assert_eq!(g.connected_span(1, &topo), 0.0);
    }
}
