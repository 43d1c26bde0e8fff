//! The depolarisation engine: predicting the next step.
//!
//! `depolarise` assembles the aligned distal source vector — the layer's own
//! activity on the lateral sub-range, then the motor copy, then top-down
//! feedback — and queries the distal graph for segments excited by it. Cells
//! owning such a segment are depolarised: they are expected to activate on
//! the next feed-forward step. The snapshot it replaces is preserved so the
//! next `learn` can compare prediction against outcome.

use super::layer::Layer;
use super::state::{cell_bit, CellId, DistalState, SegPath};
use fxhash::{FxHashMap, FxHashSet};
use tracing::debug;

impl Layer {
    /// Computes the depolarisation (prediction) from this step's activity.
    ///
    /// `distal_ff_bits` indexes the motor sub-range, `apical_fb_bits` and
    /// `apical_fb_wc_bits` the top-down feedback sub-range (active and
    /// winner-cell feedback respectively); feedback is ignored unless the
    /// layer was configured with `use_feedback`.
    pub fn depolarise(
        &mut self,
        distal_ff_bits: &FxHashSet<usize>,
        apical_fb_bits: &FxHashSet<usize>,
        apical_fb_wc_bits: &FxHashSet<usize>,
    ) {
        assert!(self.timestep > 0, "depolarise called before the first activate");

        let depth = self.params.depth;
        let lateral_w = self.params.lateral_width();
        let motor_w = self.params.motor_width();
        let topdown_w = self.params.topdown_width();

        let mut on_bits: FxHashSet<usize> = FxHashSet::default();
        let mut on_lc_bits: FxHashSet<usize> = FxHashSet::default();

        if lateral_w > 0 {
            for &cell in &self.active_state.active_cells {
                on_bits.insert(cell_bit(cell, depth));
            }
            for &winner in self.active_state.winners.values() {
                on_lc_bits.insert(cell_bit(winner, depth));
            }
        }
        for &bit in distal_ff_bits {
            assert!(bit < motor_w, "distal ff bit {} outside motor range of {}", bit, motor_w);
            on_bits.insert(lateral_w + bit);
            on_lc_bits.insert(lateral_w + bit);
        }
        if self.params.use_feedback {
            for &bit in apical_fb_bits {
                assert!(
                    bit < topdown_w,
                    "apical bit {} outside feedback range of {}",
                    bit,
                    topdown_w
                );
                on_bits.insert(lateral_w + motor_w + bit);
            }
            for &bit in apical_fb_wc_bits {
                assert!(
                    bit < topdown_w,
                    "apical bit {} outside feedback range of {}",
                    bit,
                    topdown_w
                );
                on_lc_bits.insert(lateral_w + motor_w + bit);
            }
        }

        // Per-segment excitation at the distal stimulus threshold, reduced
        // to the best segment per cell.
        let seg_exc = self
            .distal
            .excitations(&on_bits, self.params.distal.stimulus_threshold);

        let mut exc: FxHashMap<CellId, f32> = FxHashMap::default();
        let mut matching_segs: FxHashMap<CellId, (SegPath, usize)> = FxHashMap::default();
        for (&path, &count) in &seg_exc {
            let cell = path.cell();
            let entry = exc.entry(cell).or_insert(0.0);
            *entry = entry.max(count as f32);

            match matching_segs.get(&cell) {
                Some(&(best_path, best_count))
                    if count < best_count || (count == best_count && path.si >= best_path.si) => {}
                _ => {
                    matching_segs.insert(cell, (path, count));
                }
            }
        }
        let well_matching_segs: FxHashMap<CellId, SegPath> = matching_segs
            .iter()
            .filter(|(_, &(_, count))| count >= self.params.distal.new_synapse_count)
            .map(|(&cell, &(path, _))| (cell, path))
            .collect();

        debug!(
            timestep = self.timestep,
            predicted = exc.len(),
            sources = on_bits.len(),
            "depolarise"
        );

        self.prior_distal_state = std::mem::replace(
            &mut self.distal_state,
            DistalState {
                timestep: self.timestep,
                on_bits,
                on_lc_bits,
                exc,
                matching_segs,
                well_matching_segs,
            },
        );
    }

    /// Single-input convenience form: lateral context plus the given motor
    /// bits, with no feedback.
    pub fn depolarise_distal(&mut self, distal_ff_bits: &FxHashSet<usize>) {
        let empty = FxHashSet::default();
        self.depolarise(distal_ff_bits, &empty, &empty);
    }
}
