//! The learning engine.
//!
//! Runs after `activate`, using the active-state snapshot it produced and
//! the distal-state snapshot captured by the most recent `depolarise` (the
//! prediction that was made for this step). Produces one segment update per
//! target and applies them through the synapse graphs in a fixed order:
//! distal learning, distal punishment, proximal learning, and the proximal
//! stable-input reinforcement pass. Finally rolls the duty cycles and the
//! periodically recomputed boost factors and inhibition radius.

use super::layer::Layer;
use super::params::DendriteParams;
use super::rng::SplitRng;
use super::state::{CellId, SegPath};
use super::synapses::{SegUpdate, SynapseGraph};
use fxhash::FxHashSet;
use rand::Rng;
use tracing::debug;

impl Layer {
    /// Runs one learning step for the most recent activation.
    pub fn learn(&mut self) {
        assert!(self.timestep > 0, "learn called before the first activate");

        // Distal learning: one update per learning cell. Cells with a
        // segment that matched well at the last depolarise reinforce it
        // as-is; the rest reuse their best partial match or grow a segment.
        let distal_active = self.distal_state.on_bits.clone();
        let distal_learnable = self.distal_state.on_lc_bits.clone();

        let mut learning: Vec<CellId> = self.active_state.learning_cells.iter().copied().collect();
        learning.sort_unstable();

        let mut distal_updates: Vec<SegUpdate> = Vec::with_capacity(learning.len());
        for cell in learning {
            if let Some(&seg) = self.distal_state.well_matching_segs.get(&cell) {
                distal_updates.push(SegUpdate::learn(seg, Vec::new(), Vec::new()));
                continue;
            }
            if let Some(up) = segment_learning_update(
                &self.distal,
                &self.params.distal,
                &mut self.rng,
                cell,
                &distal_active,
                &distal_learnable,
            ) {
                distal_updates.push(up);
            }
        }

        // Punishment: cells this step's prediction named, that neither the
        // previous prediction named nor the step actually activated. Every
        // segment of theirs that fired on the prediction's source bits is
        // decremented.
        let mut punish_updates: Vec<SegUpdate> = Vec::new();
        if self.params.distal.punish {
            let mut mispredicted: Vec<CellId> = self
                .distal_state
                .exc
                .keys()
                .filter(|cell| {
                    !self.prior_distal_state.exc.contains_key(cell)
                        && !self.active_state.active_cells.contains(cell)
                })
                .copied()
                .collect();
            mispredicted.sort_unstable();

            let stim = self.params.distal.stimulus_threshold;
            let pcon = self.params.distal.perm_connected;
            for cell in mispredicted {
                for (si, seg) in self.distal.segments(cell.col, cell.ci).iter().enumerate() {
                    if SynapseGraph::segment_activity(seg, &distal_active, pcon) >= stim {
                        punish_updates.push(SegUpdate::punish(SegPath {
                            col: cell.col,
                            ci: cell.ci,
                            si,
                        }));
                    }
                }
            }
        }

        // Proximal learning: engaged layers adapt one column-level "cell"
        // per active column, against the feed-forward bits. Higher-level
        // layers grow only towards the stable subset.
        let mut proximal_updates: Vec<SegUpdate> = Vec::new();
        if self.active_state.engaged {
            let ff = self.active_state.in_ff_bits.clone();
            let learnable_ff = if self.params.first_level() {
                ff.clone()
            } else {
                self.active_state.in_stable_ff_bits.clone()
            };

            let mut cols: Vec<usize> = self.active_state.active_cols.iter().copied().collect();
            cols.sort_unstable();
            for col in cols {
                if let Some(&seg) = self.active_state.well_matching_ff_segs.get(&col) {
                    proximal_updates.push(SegUpdate::learn(seg, Vec::new(), Vec::new()));
                } else if let Some(up) = segment_learning_update(
                    &self.proximal,
                    &self.params.proximal,
                    &mut self.rng,
                    CellId { col, ci: 0 },
                    &ff,
                    &learnable_ff,
                ) {
                    proximal_updates.push(up);
                }
            }
        }

        debug!(
            timestep = self.timestep,
            distal = distal_updates.len(),
            punish = punish_updates.len(),
            proximal = proximal_updates.len(),
            "learn"
        );

        // Apply: distal-learn, distal-punish, proximal-learn, then the
        // stable-input reinforcement excess.
        let d = self.params.distal.clone();
        self.distal
            .bulk_learn(&distal_updates, &distal_active, d.perm_inc, d.perm_dec, d.perm_init);
        self.distal
            .bulk_learn(&punish_updates, &distal_active, d.perm_inc, d.perm_punish, d.perm_init);

        let p = self.params.proximal.clone();
        if !proximal_updates.is_empty() {
            let ff = self.active_state.in_ff_bits.clone();
            self.proximal
                .bulk_learn(&proximal_updates, &ff, p.perm_inc, p.perm_dec, p.perm_init);

            if p.perm_stable_inc > p.perm_inc {
                let reinforce: Vec<SegUpdate> = proximal_updates
                    .iter()
                    .map(|up| SegUpdate::reinforce(up.target))
                    .collect();
                let stable = self.active_state.in_stable_ff_bits.clone();
                self.proximal.bulk_learn(
                    &reinforce,
                    &stable,
                    p.perm_stable_inc - p.perm_inc,
                    p.perm_dec,
                    p.perm_init,
                );
            }
        }

        // Housekeeping: duty cycles every step, boosts and the inhibition
        // radius on their own periods.
        self.boosting
            .update_duty_cycles(&self.active_state.active_cols, self.timestep);
        if self.timestep % self.params.boost_active_every == 0 {
            self.boosting.update_boosts(
                &self.column_topology,
                self.inh_radius,
                self.params.global_inhibition,
            );
        }
        if self.timestep % self.params.inh_radius_every == 0 {
            self.recompute_inh_radius();
        }
    }
}

/// Chooses the segment a cell learns on and the synapses to grow and cull.
///
/// Reuses the best partially-matching segment when one reaches the learning
/// threshold, counting synapses of any permanence; otherwise claims a new
/// segment slot, culling the weakest segment when the cell is full. Growth
/// samples with replacement from the learnable sources, dropping duplicates
/// and sources already on the segment. A brand-new segment that cannot reach
/// the learning threshold is abandoned without an update.
fn segment_learning_update(
    graph: &SynapseGraph,
    dparams: &DendriteParams,
    rng: &mut SplitRng,
    cell: CellId,
    active_sources: &FxHashSet<usize>,
    learnable_sources: &FxHashSet<usize>,
) -> Option<SegUpdate> {
    let matched =
        graph.best_matching_segment(cell.col, cell.ci, active_sources, dparams.learn_threshold);

    let (si, grow_n, is_new, culled) = match matched {
        Some((si, activity)) => (
            si,
            dparams.new_synapse_count.saturating_sub(activity),
            false,
            Vec::new(),
        ),
        None => {
            let (si, replacing) = graph.new_segment_id(cell.col, cell.ci);
            let culled: Vec<usize> = if replacing {
                let mut sources: Vec<usize> = graph.segments(cell.col, cell.ci)[si]
                    .keys()
                    .copied()
                    .collect();
                sources.sort_unstable();
                sources
            } else {
                Vec::new()
            };
            (si, dparams.new_synapse_count, true, culled)
        }
    };
    let target = SegPath {
        col: cell.col,
        ci: cell.ci,
        si,
    };

    let mut grow: Vec<usize> = Vec::new();
    if grow_n > 0 && !learnable_sources.is_empty() {
        let mut candidates: Vec<usize> = learnable_sources.iter().copied().collect();
        candidates.sort_unstable();

        let mut child = rng.split();
        let mut picked: FxHashSet<usize> = FxHashSet::default();
        for _ in 0..grow_n {
            picked.insert(candidates[child.random_range(0..candidates.len())]);
        }

        let existing = graph.in_synapses(target);
        grow = picked
            .into_iter()
            .filter(|source| existing.is_none_or(|seg| !seg.contains_key(source)))
            .collect();
        grow.sort_unstable();
    }

    if is_new && grow.len() < dparams.learn_threshold {
        return None;
    }

    let mut die = culled;
    let mut surviving = 0;
    if !is_new {
        let seg = &graph.segments(cell.col, cell.ci)[si];
        let total = seg.len() + grow.len();
        if total > dparams.max_synapse_count {
            let excess = total - dparams.max_synapse_count;
            let mut by_perm: Vec<(usize, f32)> = seg.iter().map(|(&s, &p)| (s, p)).collect();
            by_perm.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
            die = by_perm.into_iter().take(excess).map(|(s, _)| s).collect();
        }
        surviving = seg.len() - die.len();
    }

    // Growth alone may exceed the segment limit; drop the overflow.
    if surviving + grow.len() > dparams.max_synapse_count {
        grow.truncate(dparams.max_synapse_count - surviving);
    }

    Some(SegUpdate::learn(target, grow, die))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::LayerParams;
    use fxhash::FxHashSet;

    fn bits(v: &[usize]) -> FxHashSet<usize> {
        v.iter().copied().collect()
    }

    /// Two columns, depth 2, low distal thresholds so tiny patterns learn.
    fn small_params() -> LayerParams {
        let mut params = LayerParams::for_input(vec![10]);
        params.column_dimensions = vec![2];
        params.depth = 2;
        params.distal.learn_threshold = 1;
        params.distal.stimulus_threshold = 1;
        params.distal.new_synapse_count = 2;
        params.proximal.learn_threshold = 2;
        params.proximal.new_synapse_count = 4;
        params
    }

    fn wired_layer() -> Layer {
        let mut layer = Layer::new(small_params()).unwrap();
        layer
            .proximal_graph_mut()
            .seed_segment(0, 0, 0, (0..5).map(|s| (s, 0.5)));
        layer
            .proximal_graph_mut()
            .seed_segment(1, 0, 0, (5..10).map(|s| (s, 0.5)));
        layer
    }

    #[test]
    #[should_panic(expected = "before the first activate")]
    fn learn_requires_an_activation() {
        let mut layer = Layer::new(small_params()).unwrap();
        layer.learn();
    }

    #[test]
    fn no_distal_growth_without_learnable_sources() {
        let mut layer = wired_layer();
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        layer.learn();

        // Nothing was depolarised before this step, so there are no
        // learnable distal bits and the new segment is abandoned.
        for ci in 0..2 {
            assert_eq!(layer.distal_graph().seg_count(0, ci), 0);
        }
    }

    #[test]
    fn winner_grows_segment_toward_previous_winners() {
        let mut layer = wired_layer();

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        layer.learn();
        layer.depolarise(&bits(&[]), &bits(&[]), &bits(&[]));
        let first_winner = layer.active_state().winners[&0];

        layer.activate(&bits(&[5, 6, 7]), &bits(&[]));
        layer.learn();

        let winner = layer.active_state().winners[&1];
        let segs = layer.distal_graph().segments(winner.col, winner.ci);
        assert_eq!(segs.len(), 1);

        // The grown synapse points at the previous winner's output bit.
        let expected_bit = first_winner.col * 2 + first_winner.ci;
        assert!(segs[0].contains_key(&expected_bit));
        assert_eq!(segs[0][&expected_bit], layer.params().distal.perm_init);
    }

    #[test]
    fn punishment_decrements_active_sources_only() {
        let mut layer = wired_layer();
        let cell = CellId { col: 1, ci: 0 };

        // A connected segment listening to bits 0 and 9.
        layer
            .distal_graph_mut()
            .seed_segment(1, 0, 0, [(0, 0.30), (9, 0.30)]);

        // The last depolarise predicted `cell` from source bit 0; the
        // prediction before it predicted nothing, and the step activated
        // column 0 only, so `cell` was mispredicted.
        layer.distal_state.exc.insert(cell, 1.0);
        layer.distal_state.on_bits = bits(&[0]);
        layer.distal_state.timestep = 0;

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        layer.learn();

        let seg = layer
            .distal_graph()
            .in_synapses(SegPath { col: 1, ci: 0, si: 0 })
            .unwrap();
        let punished = 0.30 - layer.params().distal.perm_punish;
        assert!((seg[&0] - punished).abs() < 1e-6);
        assert!((seg[&9] - 0.30).abs() < 1e-6);
    }

    #[test]
    fn punishment_spares_vindicated_cells() {
        let mut layer = wired_layer();

        // Predict a cell in column 0; column 0 then actually activates and
        // the prediction wins the column, so nothing may be punished.
        let cell = CellId { col: 0, ci: 1 };
        layer
            .distal_graph_mut()
            .seed_segment(0, 1, 0, [(3, 0.30)]);
        layer.distal_state.exc.insert(cell, 1.0);
        layer.distal_state.on_bits = bits(&[3]);

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        assert!(layer.active_state().active_cells.contains(&cell));
        layer.learn();

        // The segment was reused for learning (its source was active), so
        // the permanence rose instead of taking the punishment decrement.
        let seg = layer
            .distal_graph()
            .in_synapses(SegPath { col: 0, ci: 1, si: 0 })
            .unwrap();
        let reinforced = 0.30 + layer.params().distal.perm_inc;
        assert!((seg[&3] - reinforced).abs() < 1e-6);
    }

    #[test]
    fn proximal_learning_reinforces_active_bits() {
        let mut layer = wired_layer();
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        layer.learn();

        let seg = layer
            .proximal_graph()
            .in_synapses(SegPath { col: 0, ci: 0, si: 0 })
            .unwrap();
        let p = layer.params().proximal.clone();
        // Active synapses: +perm_inc, then -perm_dec from the stable
        // reinforcement pass running against an empty stable set.
        let active_expected = 0.5 + p.perm_inc - p.perm_dec;
        let inactive_expected = 0.5 - p.perm_dec - p.perm_dec;
        for (&source, &perm) in seg {
            let expected = if source <= 2 {
                active_expected
            } else {
                inactive_expected
            };
            assert!(
                (perm - expected).abs() < 1e-6,
                "source {} got {}",
                source,
                perm
            );
        }
    }

    #[test]
    fn unengaged_layer_skips_proximal_learning() {
        let mut params = small_params();
        params.proximal.max_segments = 3; // higher-level layer
        let mut layer = Layer::new(params).unwrap();
        layer
            .proximal_graph_mut()
            .seed_segment(0, 0, 0, (0..5).map(|s| (s, 0.5)));

        let before: Vec<(usize, f32)> = {
            let seg = layer
                .proximal_graph()
                .in_synapses(SegPath { col: 0, ci: 0, si: 0 })
                .unwrap();
            let mut v: Vec<(usize, f32)> = seg.iter().map(|(&s, &p)| (s, p)).collect();
            v.sort_by_key(|e| e.0);
            v
        };

        // Stable fraction 0/3 is below the threshold: not engaged.
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        assert!(!layer.is_engaged());
        layer.learn();

        let after: Vec<(usize, f32)> = {
            let seg = layer
                .proximal_graph()
                .in_synapses(SegPath { col: 0, ci: 0, si: 0 })
                .unwrap();
            let mut v: Vec<(usize, f32)> = seg.iter().map(|(&s, &p)| (s, p)).collect();
            v.sort_by_key(|e| e.0);
            v
        };
        assert_eq!(before, after);
    }

    #[test]
    fn segment_update_respects_synapse_cap() {
        let mut params = small_params();
        params.distal.max_synapse_count = 3;
        params.distal.new_synapse_count = 3;
        let graph = {
            let mut g = SynapseGraph::new(2, 2, 10, 5, 0.20);
            g.seed_segment(0, 0, 0, [(1, 0.9), (2, 0.05), (3, 0.5)]);
            g
        };
        let mut rng = SplitRng::seed_from(1);

        let up = segment_learning_update(
            &graph,
            &params.distal,
            &mut rng,
            CellId { col: 0, ci: 0 },
            &bits(&[1, 2]), // matches segment 0 with activity 2
            &bits(&[7, 8]),
        )
        .unwrap();

        assert_eq!(up.target, SegPath { col: 0, ci: 0, si: 0 });
        // Growth of one source pushes the segment to four synapses; the
        // weakest existing synapse dies to fit the cap of three.
        assert_eq!(up.grow_sources.len(), 1);
        assert_eq!(up.die_sources, vec![2]);
    }
}
