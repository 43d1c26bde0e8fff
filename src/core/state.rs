//! Cell and segment identifiers plus the per-step state records.
//!
//! The layer replaces these records as whole snapshots on every transition:
//! `activate` produces a fresh [`ActiveState`], `depolarise` produces a fresh
//! [`DistalState`] and preserves the one it replaces, so learning can compare
//! the previous prediction against the current actuals.

use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Identifies a cell by its column and cell indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellId {
    /// Column index.
    pub col: usize,
    /// Cell index within the column, below the layer depth.
    pub ci: usize,
}

/// Identifies a dendritic segment by column, cell, and segment indices.
/// Proximal segments always use `ci = 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegPath {
    pub col: usize,
    pub ci: usize,
    pub si: usize,
}

impl SegPath {
    /// The cell owning this segment.
    #[inline]
    pub fn cell(&self) -> CellId {
        CellId {
            col: self.col,
            ci: self.ci,
        }
    }
}

/// Maps a cell to its global output bit id.
#[inline]
pub fn cell_bit(cell: CellId, depth: usize) -> usize {
    cell.col * depth + cell.ci
}

/// Inverse of [`cell_bit`].
#[inline]
pub fn source_of_bit(bit: usize, depth: usize) -> CellId {
    CellId {
        col: bit / depth,
        ci: bit % depth,
    }
}

/// Everything captured by one `activate` call.
#[derive(Debug, Clone, Default)]
pub struct ActiveState {
    /// The feed-forward bits this step was driven by.
    pub in_ff_bits: FxHashSet<usize>,

    /// The predicted-stable subset of the feed-forward bits.
    pub in_stable_ff_bits: FxHashSet<usize>,

    /// Columns that won inhibition.
    pub active_cols: FxHashSet<usize>,

    /// Active columns whose winner had no predictive context.
    pub bursting_cols: FxHashSet<usize>,

    /// All active cells.
    pub active_cells: FxHashSet<CellId>,

    /// Active cells excluding those of bursting columns.
    pub stable_active_cells: FxHashSet<CellId>,

    /// The elected winner cell per active column.
    pub winners: FxHashMap<usize, CellId>,

    /// Winners that take part in distal learning this step.
    pub learning_cells: FxHashSet<CellId>,

    /// Temporal-pooling excitation per cell; values are strictly positive.
    pub tp_exc: FxHashMap<CellId, f32>,

    /// Whether the engagement gate was open this step.
    pub engaged: bool,

    /// Whether the gate opened on this very step.
    pub newly_engaged: bool,

    /// Best matching proximal segment per column, with its excitation.
    pub matching_ff_segs: FxHashMap<usize, (SegPath, usize)>,

    /// Proximal segments matching well enough to learn without growth.
    pub well_matching_ff_segs: FxHashMap<usize, SegPath>,
}

/// Everything captured by one `depolarise` call.
#[derive(Debug, Clone, Default)]
pub struct DistalState {
    /// The timestep whose activity this prediction was computed from.
    pub timestep: u64,

    /// Active bits of the aligned distal source space.
    pub on_bits: FxHashSet<usize>,

    /// Learnable bits of the aligned distal source space (winner cells plus
    /// motor and feedback winner bits); growth samples from these.
    pub on_lc_bits: FxHashSet<usize>,

    /// Best distal segment excitation per depolarised cell.
    pub exc: FxHashMap<CellId, f32>,

    /// Best matching distal segment per cell, with its excitation.
    pub matching_segs: FxHashMap<CellId, (SegPath, usize)>,

    /// Distal segments matching well enough to learn without growth.
    pub well_matching_segs: FxHashMap<CellId, SegPath>,
}

impl DistalState {
    /// Whether a cell is depolarised (predicted to activate next step).
    #[inline]
    pub fn is_predicted(&self, cell: &CellId) -> bool {
        self.exc.contains_key(cell)
    }
}

/// A read-only projection of the layer for observation and tests.
#[derive(Debug, Clone)]
pub struct LayerView {
    pub timestep: u64,
    pub active_columns: Vec<usize>,
    pub bursting_columns: Vec<usize>,
    pub active_cells: Vec<CellId>,
    pub winner_cells: Vec<CellId>,
    /// `None` until the first depolarise of the current step.
    pub predictive_cells: Option<Vec<CellId>>,
    pub prior_predictive_cells: Vec<CellId>,
    pub in_ff_bits: Vec<usize>,
    pub in_stable_ff_bits: Vec<usize>,
    pub out_ff_bits: Vec<usize>,
    pub out_stable_ff_bits: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_encoding_roundtrip() {
        let depth = 4;
        for col in 0..7 {
            for ci in 0..depth {
                let cell = CellId { col, ci };
                assert_eq!(source_of_bit(cell_bit(cell, depth), depth), cell);
            }
        }
    }

    #[test]
    fn bit_encoding_is_injective() {
        let depth = 3;
        let mut seen = FxHashSet::default();
        for col in 0..10 {
            for ci in 0..depth {
                assert!(seen.insert(cell_bit(CellId { col, ci }, depth)));
            }
        }
    }
}
