//! The activation engine: one feed-forward step.
//!
//! `activate` turns a sparse feed-forward bit set into the step's active
//! columns and cells. The pipeline: proximal excitation is reduced to
//! per-column overlap, temporal-pooling excitation is decayed and merged in,
//! boosted column excitation goes through inhibition, and each active column
//! elects its cells from distal context — predicted cells take the column,
//! contextless columns burst.

use super::inhibition;
use super::layer::Layer;
use super::state::{ActiveState, CellId, SegPath};
use super::synapses::SynapseGraph;
use fxhash::{FxHashMap, FxHashSet};
use rand::Rng;
use std::collections::hash_map::Entry;
use tracing::debug;

impl Layer {
    /// Runs one activation step on the feed-forward input.
    ///
    /// `stable_ff_bits` is the predicted-stable subset of `ff_bits`; for a
    /// first-level layer it may simply be empty. Increments the timestep,
    /// replaces the active-state snapshot, and leaves the distal state
    /// untouched (it still holds the prediction made for this step).
    pub fn activate(&mut self, ff_bits: &FxHashSet<usize>, stable_ff_bits: &FxHashSet<usize>) {
        let n_inputs = self.input_topology.size();
        for &bit in ff_bits {
            assert!(bit < n_inputs, "ff bit {} outside input space of {}", bit, n_inputs);
        }
        for &bit in stable_ff_bits {
            assert!(ff_bits.contains(&bit), "stable ff bit {} not among ff bits", bit);
        }

        self.timestep += 1;
        let depth = self.params.depth;
        let n_cols = self.params.n_columns();
        let first_level = self.params.first_level();
        let prev = std::mem::take(&mut self.active_state);

        // Proximal excitation, reduced to per-column overlap. Track the best
        // matching segment per column, and those matching well enough to
        // learn without growing.
        let seg_exc = self
            .proximal
            .excitations(ff_bits, self.params.proximal.stimulus_threshold);
        let mut col_exc: FxHashMap<usize, f32> = FxHashMap::default();
        let mut matching_ff_segs: FxHashMap<usize, (SegPath, usize)> = FxHashMap::default();
        for (&path, &count) in &seg_exc {
            let entry = col_exc.entry(path.col).or_insert(0.0);
            *entry = entry.max(count as f32);
            match matching_ff_segs.entry(path.col) {
                Entry::Occupied(mut o) => {
                    let (best_path, best_count) = *o.get();
                    if count > best_count || (count == best_count && path.si < best_path.si) {
                        o.insert((path, count));
                    }
                }
                Entry::Vacant(v) => {
                    v.insert((path, count));
                }
            }
        }
        let well_matching_ff_segs: FxHashMap<usize, SegPath> = matching_ff_segs
            .iter()
            .filter(|(_, &(_, count))| count >= self.params.proximal.new_synapse_count)
            .map(|(&col, &(path, _))| (col, path))
            .collect();

        // Engagement gate: first-level layers are always engaged; a
        // higher-level layer engages when enough of its input is stable.
        let engaged = first_level
            || (stable_ff_bits.len() as f32)
                > self.params.stable_inbit_frac_threshold * (ff_bits.len() as f32);
        let newly_engaged = first_level || (engaged && !prev.engaged);

        // Temporal-pooling excitation: restart on engagement, else decay.
        let mut tp_exc: FxHashMap<CellId, f32> = if newly_engaged {
            FxHashMap::default()
        } else {
            prev.tp_exc.clone()
        };
        let fall = self.params.temporal_pooling_fall;
        tp_exc.retain(|_, v| {
            *v -= fall;
            *v > 0.0
        });

        // While not engaged, only columns with a well-matching segment may
        // compete. Boost multiplies overlap before inhibition.
        if !engaged {
            col_exc.retain(|col, _| well_matching_ff_segs.contains_key(col));
        }
        for (col, e) in col_exc.iter_mut() {
            *e *= self.boosting.boost(*col);
        }

        // Absolute cell excitation: column overlap expanded over the depth,
        // plus temporal pooling, plus optionally weighted distal context.
        let w = self.params.distal_vs_proximal_weight;
        let mut cell_exc: FxHashMap<CellId, f32> =
            FxHashMap::with_capacity_and_hasher(col_exc.len() * depth, Default::default());
        for (&col, &e) in &col_exc {
            for ci in 0..depth {
                let cell = CellId { col, ci };
                let mut x = e + tp_exc.get(&cell).copied().unwrap_or(0.0);
                if w > 0.0 {
                    x += w * self.distal_state.exc.get(&cell).copied().unwrap_or(0.0);
                }
                cell_exc.insert(cell, x);
            }
        }
        if self.params.spontaneous_activation {
            for (&cell, &d) in &self.distal_state.exc {
                cell_exc
                    .entry(cell)
                    .or_insert_with(|| w * d + tp_exc.get(&cell).copied().unwrap_or(0.0));
            }
        }

        // Inhibition over the per-column maxima. Under continued engagement
        // the admitted fraction grows towards the pooling cap.
        let mut col_best: FxHashMap<usize, f32> = FxHashMap::default();
        for (&cell, &x) in &cell_exc {
            let entry = col_best.entry(cell.col).or_insert(f32::NEG_INFINITY);
            *entry = entry.max(x);
        }
        let base = self.params.activation_level;
        let level = if newly_engaged || !engaged {
            base
        } else {
            let prev_frac = prev.active_cols.len() as f32 / n_cols as f32;
            (prev_frac + 0.5 * base).min(self.params.activation_level_max)
        };
        let active_cols = inhibition::select_active_columns(
            &col_best,
            &self.column_topology,
            level,
            self.params.global_inhibition,
            self.inh_radius,
            self.params.inhibition_base_distance,
        );

        // Within-column cell scores and selection. Columns are visited in
        // ascending order so random winner elections split sub-streams
        // deterministically.
        let bonus = (self.params.distal.learn_threshold / 2) as f32;
        let d_stim = self.params.distal.stimulus_threshold as f32;
        let margin = self.params.dominance_margin;

        let mut sorted_cols: Vec<usize> = active_cols.iter().copied().collect();
        sorted_cols.sort_unstable();

        let mut active_cells: FxHashSet<CellId> = FxHashSet::default();
        let mut winners: FxHashMap<usize, CellId> = FxHashMap::default();
        let mut bursting_cols: FxHashSet<usize> = FxHashSet::default();
        let mut learning_cells: FxHashSet<CellId> = FxHashSet::default();

        for &col in &sorted_cols {
            let mut scores: Vec<f32> = Vec::with_capacity(depth);
            for ci in 0..depth {
                let cell = CellId { col, ci };
                let context = if let Some(&d) = self.distal_state.exc.get(&cell) {
                    d
                } else if prev.winners.get(&col) == Some(&cell) {
                    bonus
                } else {
                    let segs = self.distal.segments(col, ci);
                    let n_segs = segs.iter().filter(|s| !s.is_empty()).count();
                    if n_segs == 0 {
                        0.0
                    } else if segs.iter().any(|seg| {
                        SynapseGraph::segment_activity(seg, &self.distal_state.on_bits, 0.0)
                            >= self.params.distal.learn_threshold
                    }) {
                        bonus
                    } else {
                        -(bonus * n_segs as f32)
                    }
                };
                scores.push(context + tp_exc.get(&cell).copied().unwrap_or(0.0));
            }

            let max = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let best: Vec<usize> = (0..depth).filter(|&ci| scores[ci] == max).collect();
            let second = scores
                .iter()
                .filter(|&&s| s < max)
                .fold(None, |acc: Option<f32>, &s| Some(acc.map_or(s, |a| a.max(s))));

            let prev_winner = prev.winners.get(&col).copied();
            let winner_ci = match prev_winner {
                Some(pw) if best.contains(&pw.ci) => pw.ci,
                _ if best.len() == 1 => best[0],
                _ => {
                    let mut child = self.rng.split();
                    best[child.random_range(0..best.len())]
                }
            };
            let winner = CellId { col, ci: winner_ci };

            let active_cis: Vec<usize> = if max < d_stim {
                (0..depth).collect()
            } else if second.is_none_or(|s| max - s >= margin) {
                best
            } else {
                (0..depth).filter(|&ci| scores[ci] >= d_stim).collect()
            };

            let continuing_tp = !newly_engaged && prev_winner == Some(winner);
            let bursting = if continuing_tp {
                active_cis.len() == depth
            } else {
                !self.distal_state.exc.contains_key(&winner) && !tp_exc.contains_key(&winner)
            };

            for &ci in &active_cis {
                active_cells.insert(CellId { col, ci });
            }
            winners.insert(col, winner);
            if bursting {
                bursting_cols.insert(col);
            }
            if newly_engaged || prev_winner != Some(winner) {
                learning_cells.insert(winner);
            }
        }

        let stable_active_cells: FxHashSet<CellId> = active_cells
            .iter()
            .filter(|cell| !bursting_cols.contains(&cell.col))
            .copied()
            .collect();

        // Temporal pooling carries newly active cells at full excitation.
        if !first_level {
            for &cell in &active_cells {
                if newly_engaged || !prev.active_cells.contains(&cell) {
                    let e = tp_exc.entry(cell).or_insert(0.0);
                    *e = e.max(self.params.temporal_pooling_max_exc);
                }
            }
        }

        debug!(
            timestep = self.timestep,
            active_cols = active_cols.len(),
            bursting = bursting_cols.len(),
            engaged,
            "activate"
        );

        self.active_state = ActiveState {
            in_ff_bits: ff_bits.clone(),
            in_stable_ff_bits: stable_ff_bits.clone(),
            active_cols,
            bursting_cols,
            active_cells,
            stable_active_cells,
            winners,
            learning_cells,
            tp_exc,
            engaged,
            newly_engaged,
            matching_ff_segs,
            well_matching_ff_segs,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::LayerParams;

    fn bits(v: &[usize]) -> FxHashSet<usize> {
        v.iter().copied().collect()
    }

    /// One column, depth 3, proximal field wired straight onto bits 0..4.
    fn tiny_layer() -> Layer {
        let mut params = LayerParams::for_input(vec![8]);
        params.column_dimensions = vec![1];
        params.depth = 3;
        let mut layer = Layer::new(params).unwrap();
        layer
            .proximal_graph_mut()
            .seed_segment(0, 0, 0, (0..4).map(|s| (s, 0.5)));
        layer
    }

    #[test]
    fn unpredicted_column_bursts() {
        let mut layer = tiny_layer();
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));

        let state = layer.active_state();
        assert_eq!(layer.timestep(), 1);
        assert!(state.active_cols.contains(&0));
        assert_eq!(state.active_cells.len(), 3);
        assert_eq!(state.bursting_cols.len(), 1);
        assert_eq!(state.winners.len(), 1);
        assert!(state.stable_active_cells.is_empty());
        // The winner is among the active cells even while bursting.
        assert!(state.active_cells.contains(&state.winners[&0]));
    }

    #[test]
    fn predicted_cell_takes_the_column() {
        let mut layer = tiny_layer();
        let predicted = CellId { col: 0, ci: 1 };
        layer.distal_state.exc.insert(predicted, 10.0);

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));

        let state = layer.active_state();
        assert_eq!(state.active_cells.len(), 1);
        assert!(state.active_cells.contains(&predicted));
        assert_eq!(state.winners[&0], predicted);
        assert!(state.bursting_cols.is_empty());
        assert_eq!(
            state.stable_active_cells.len(),
            state.active_cells.len()
        );
    }

    #[test]
    fn dominance_margin_gates_runner_up_cells() {
        // Two cells predicted, scores 10 and 9.5 with margin 4: both stay
        // active because neither dominates.
        let mut layer = tiny_layer();
        layer.distal_state.exc.insert(CellId { col: 0, ci: 0 }, 10.0);
        layer.distal_state.exc.insert(CellId { col: 0, ci: 2 }, 9.5);

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        assert_eq!(layer.active_state().active_cells.len(), 2);

        // Scores 10 and 1: the dominant cell suppresses the rest.
        let mut layer = tiny_layer();
        layer.distal_state.exc.insert(CellId { col: 0, ci: 0 }, 10.0);
        layer.distal_state.exc.insert(CellId { col: 0, ci: 2 }, 1.0);

        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        let state = layer.active_state();
        assert_eq!(state.active_cells.len(), 1);
        assert!(state.active_cells.contains(&CellId { col: 0, ci: 0 }));
    }

    #[test]
    fn empty_input_activates_nothing() {
        let mut layer = tiny_layer();
        layer.activate(&bits(&[]), &bits(&[]));

        let state = layer.active_state();
        assert!(state.active_cols.is_empty());
        assert!(state.active_cells.is_empty());
        assert!(state.winners.is_empty());
        assert_eq!(layer.timestep(), 1);
    }

    #[test]
    fn spontaneous_activation_admits_distal_only_columns() {
        let mut params = LayerParams::for_input(vec![8]);
        params.column_dimensions = vec![2];
        params.depth = 2;
        params.spontaneous_activation = true;
        let mut layer = Layer::new(params).unwrap();
        layer.distal_state.exc.insert(CellId { col: 1, ci: 0 }, 12.0);

        layer.activate(&bits(&[]), &bits(&[]));

        let state = layer.active_state();
        assert!(state.active_cols.contains(&1));
        assert!(state.active_cells.contains(&CellId { col: 1, ci: 0 }));
        assert!(state.bursting_cols.is_empty());
    }

    #[test]
    fn winner_sticks_while_it_stays_best() {
        let mut layer = tiny_layer();
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        let first = layer.active_state().winners[&0];

        // Same burst conditions: the previous winner must be re-elected.
        layer.activate(&bits(&[0, 1, 2]), &bits(&[]));
        assert_eq!(layer.active_state().winners[&0], first);
    }

    #[test]
    fn depth_one_always_elects_cell_zero() {
        let mut params = LayerParams::for_input(vec![8]);
        params.column_dimensions = vec![2];
        params.depth = 1;
        let mut layer = Layer::new(params).unwrap();
        layer
            .proximal_graph_mut()
            .seed_segment(0, 0, 0, (0..4).map(|s| (s, 0.5)));

        layer.activate(&bits(&[0, 1, 2, 3]), &bits(&[]));
        for winner in layer.active_state().winners.values() {
            assert_eq!(winner.ci, 0);
        }
    }

    #[test]
    #[should_panic(expected = "outside input space")]
    fn out_of_range_ff_bit_panics() {
        let mut layer = tiny_layer();
        layer.activate(&bits(&[99]), &bits(&[]));
    }

    #[test]
    #[should_panic(expected = "not among ff bits")]
    fn stable_bits_must_be_subset() {
        let mut layer = tiny_layer();
        layer.activate(&bits(&[1]), &bits(&[2]));
    }
}
