//! The layer facade.
//!
//! A `Layer` owns the proximal and distal synapse graphs, the per-column
//! duty-cycle and boost vectors, and the state snapshots produced by the
//! three per-timestep transitions:
//!
//! 1. [`Layer::activate`] — feed-forward drive, inhibition, cell selection
//! 2. [`Layer::learn`] — segment updates from the step just activated
//! 3. [`Layer::depolarise`] — prediction for the next step
//!
//! Each transition consumes the whole previous snapshot and produces a new
//! one; callers sequence them explicitly. The layer is deterministic for a
//! given seed: all stochastic sites split sub-streams off one master stream.

use super::boosting::Boosting;
use super::inhibition;
use super::params::{ConfigError, LayerParams};
use super::rng::SplitRng;
use super::state::{cell_bit, ActiveState, CellId, DistalState, LayerView};
use super::synapses::SynapseGraph;
use super::topology::Topology;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Targets for [`Layer::interrupt`], clearing one kind of carried state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Forget all predictions: clears both distal-state snapshots, so no
    /// cells are predicted and no distal learning happens until the next
    /// depolarise.
    TemporalMemory,
    /// Clear the temporal-pooling excitation accumulator.
    TemporalPooling,
    /// Clear the prior winner cells, allowing fresh winner elections.
    Winners,
}

/// One cortical layer of columnar cells.
pub struct Layer {
    pub(crate) params: LayerParams,
    pub(crate) input_topology: Topology,
    pub(crate) column_topology: Topology,
    pub(crate) proximal: SynapseGraph,
    pub(crate) distal: SynapseGraph,
    pub(crate) boosting: Boosting,
    pub(crate) inh_radius: usize,
    pub(crate) timestep: u64,
    pub(crate) rng: SplitRng,
    pub(crate) active_state: ActiveState,
    pub(crate) distal_state: DistalState,
    pub(crate) prior_distal_state: DistalState,
}

impl Layer {
    /// Builds a layer, validating the configuration and seeding every
    /// column's initial proximal receptive field.
    pub fn new(params: LayerParams) -> Result<Self, ConfigError> {
        params.validate()?;

        let input_topology = Topology::new(&params.input_dimensions);
        let column_topology = Topology::new(&params.column_dimensions);
        let n_cols = params.n_columns();
        let n_inputs = params.n_inputs();

        let mut rng = SplitRng::seed_from(params.random_seed);
        let mut proximal = SynapseGraph::new(
            n_cols,
            1,
            n_inputs,
            params.proximal.max_segments,
            params.proximal.perm_connected,
        );
        let distal = SynapseGraph::new(
            n_cols,
            params.depth,
            params.distal_source_width(),
            params.distal.max_segments,
            params.distal.perm_connected,
        );

        let longest = *params.input_dimensions.iter().max().unwrap();
        let radius = (params.proximal.ff_potential_radius * longest as f32).round() as usize;

        for col in 0..n_cols {
            let centre = map_column(col, &column_topology, &input_topology);
            let mut candidates: Vec<usize> = if radius >= longest {
                (0..n_inputs).collect()
            } else {
                let centre_coord = input_topology.coord_of(centre);
                let mut near: Vec<usize> = input_topology
                    .neighbours(&centre_coord, radius, 0)
                    .collect();
                near.push(centre);
                near.sort_unstable();
                near
            };

            let take = ((candidates.len() as f32) * params.proximal.ff_init_frac).round() as usize;
            let mut child = rng.split();
            candidates.shuffle(&mut child);
            candidates.truncate(take);

            let lo = params.proximal.ff_perm_init_lo;
            let hi = params.proximal.ff_perm_init_hi;
            let synapses: Vec<(usize, f32)> = candidates
                .into_iter()
                .map(|source| (source, lo + (hi - lo) * child.random::<f32>()))
                .collect();
            proximal.seed_segment(col, 0, 0, synapses);
        }

        let boosting = Boosting::new(
            n_cols,
            params.duty_cycle_period,
            params.boost_active_duty_ratio,
            params.max_boost,
        );

        let mut layer = Self {
            inh_radius: 1,
            params,
            input_topology,
            column_topology,
            proximal,
            distal,
            boosting,
            timestep: 0,
            rng,
            active_state: ActiveState::default(),
            distal_state: DistalState::default(),
            prior_distal_state: DistalState::default(),
        };
        layer.recompute_inh_radius();
        debug!(
            columns = n_cols,
            inputs = n_inputs,
            inh_radius = layer.inh_radius,
            "layer constructed"
        );
        Ok(layer)
    }

    /// Derives the inhibition radius from the current proximal receptive
    /// fields.
    pub(crate) fn recompute_inh_radius(&mut self) {
        let n_cols = self.params.n_columns();
        let mean_span = (0..n_cols)
            .map(|col| self.proximal.connected_span(col, &self.input_topology))
            .sum::<f32>()
            / n_cols as f32;
        self.inh_radius =
            inhibition::inhibition_radius(mean_span, &self.column_topology, &self.input_topology);
    }

    /// Clears one kind of carried state.
    pub fn interrupt(&mut self, target: Interrupt) {
        match target {
            Interrupt::TemporalMemory => {
                self.distal_state = DistalState::default();
                self.prior_distal_state = DistalState::default();
            }
            Interrupt::TemporalPooling => {
                self.active_state.tp_exc.clear();
            }
            Interrupt::Winners => {
                self.active_state.winners.clear();
            }
        }
    }

    /// The current timestep; increments by one per `activate`.
    #[inline]
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    /// The layer parameters.
    #[inline]
    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    /// Whether the engagement gate was open on the last `activate`.
    #[inline]
    pub fn is_engaged(&self) -> bool {
        self.active_state.engaged
    }

    /// The current inhibition radius (column grid units).
    #[inline]
    pub fn inh_radius(&self) -> usize {
        self.inh_radius
    }

    /// The state captured by the most recent `activate`.
    #[inline]
    pub fn active_state(&self) -> &ActiveState {
        &self.active_state
    }

    /// The state captured by the most recent `depolarise`.
    #[inline]
    pub fn distal_state(&self) -> &DistalState {
        &self.distal_state
    }

    /// The distal state replaced by the most recent `depolarise`.
    #[inline]
    pub fn prior_distal_state(&self) -> &DistalState {
        &self.prior_distal_state
    }

    /// The per-column duty cycles and boost factors.
    #[inline]
    pub fn boosting(&self) -> &Boosting {
        &self.boosting
    }

    /// The proximal (feed-forward) synapse graph.
    #[inline]
    pub fn proximal_graph(&self) -> &SynapseGraph {
        &self.proximal
    }

    /// The distal (context) synapse graph.
    #[inline]
    pub fn distal_graph(&self) -> &SynapseGraph {
        &self.distal
    }

    /// Mutable access to the distal graph, for hosts that pre-wire context
    /// connectivity.
    #[inline]
    pub fn distal_graph_mut(&mut self) -> &mut SynapseGraph {
        &mut self.distal
    }

    /// Mutable access to the proximal graph, for hosts that pre-wire
    /// receptive fields.
    #[inline]
    pub fn proximal_graph_mut(&mut self) -> &mut SynapseGraph {
        &mut self.proximal
    }

    /// A read-only projection of the observable layer state.
    pub fn view(&self) -> LayerView {
        let s = &self.active_state;
        let depth = self.params.depth;

        let (predictive_cells, prior_predictive_cells) =
            if self.timestep > 0 && self.distal_state.timestep == self.timestep {
                (
                    Some(sorted_cells(self.distal_state.exc.keys())),
                    sorted_cells(self.prior_distal_state.exc.keys()),
                )
            } else {
                (None, sorted_cells(self.distal_state.exc.keys()))
            };

        let active_cells = sorted_cells(s.active_cells.iter());
        let out_ff_bits: Vec<usize> = active_cells.iter().map(|&c| cell_bit(c, depth)).collect();
        let out_stable_ff_bits: Vec<usize> = sorted_cells(s.stable_active_cells.iter())
            .iter()
            .map(|&c| cell_bit(c, depth))
            .collect();

        LayerView {
            timestep: self.timestep,
            active_columns: sorted_usize(s.active_cols.iter()),
            bursting_columns: sorted_usize(s.bursting_cols.iter()),
            active_cells,
            winner_cells: sorted_cells(s.winners.values()),
            predictive_cells,
            prior_predictive_cells,
            in_ff_bits: sorted_usize(s.in_ff_bits.iter()),
            in_stable_ff_bits: sorted_usize(s.in_stable_ff_bits.iter()),
            out_ff_bits,
            out_stable_ff_bits,
        }
    }
}

/// Maps a column index to its centre position in the input space, by
/// proportional coordinate mapping offset by half a receptive cell.
pub(crate) fn map_column(
    col: usize,
    column_topology: &Topology,
    input_topology: &Topology,
) -> usize {
    if column_topology.dimensions().len() == input_topology.dimensions().len() {
        let coords: Vec<usize> = column_topology
            .coord_of(col)
            .into_iter()
            .zip(column_topology.dimensions())
            .zip(input_topology.dimensions())
            .map(|((idx, &col_dim), &in_dim)| {
                let pos = ((idx as f32 / col_dim as f32) * in_dim as f32
                    + (in_dim as f32 / col_dim as f32) * 0.5) as usize;
                pos.min(in_dim - 1)
            })
            .collect();
        input_topology.index_of(&coords)
    } else {
        // Mismatched ranks: map proportionally on flat indices.
        let n_cols = column_topology.size() as f32;
        let n_in = input_topology.size() as f32;
        let pos = ((col as f32 / n_cols) * n_in + (n_in / n_cols) * 0.5) as usize;
        pos.min(input_topology.size() - 1)
    }
}

fn sorted_cells<'a>(cells: impl Iterator<Item = &'a CellId>) -> Vec<CellId> {
    let mut v: Vec<CellId> = cells.copied().collect();
    v.sort_unstable();
    v
}

fn sorted_usize<'a>(items: impl Iterator<Item = &'a usize>) -> Vec<usize> {
    let mut v: Vec<usize> = items.copied().collect();
    v.sort_unstable();
    v
}
