//! Column duty cycles and overlap boosting.
//!
//! Each column carries a rolling estimate of how often it wins inhibition
//! (its active duty cycle) and a boost factor in `[1, max_boost]` that
//! multiplies its proximal overlap before inhibition. Columns whose duty
//! cycle falls far below their neighbourhood's best get boosted so they stay
//! competitive instead of going permanently silent.

use super::topology::Topology;
use fxhash::FxHashSet;
use tracing::debug;

/// Dense per-column duty cycles and boost factors.
#[derive(Debug, Clone)]
pub struct Boosting {
    duty_cycles: Vec<f32>,
    boosts: Vec<f32>,
    duty_cycle_period: u64,
    boost_active_duty_ratio: f32,
    max_boost: f32,
}

impl Boosting {
    pub fn new(
        n_columns: usize,
        duty_cycle_period: u64,
        boost_active_duty_ratio: f32,
        max_boost: f32,
    ) -> Self {
        Self {
            duty_cycles: vec![0.0; n_columns],
            boosts: vec![1.0; n_columns],
            duty_cycle_period,
            boost_active_duty_ratio,
            max_boost,
        }
    }

    /// The boost factor for one column.
    #[inline]
    pub fn boost(&self, col: usize) -> f32 {
        self.boosts[col]
    }

    /// The active duty cycle for one column.
    #[inline]
    pub fn duty_cycle(&self, col: usize) -> f32 {
        self.duty_cycles[col]
    }

    /// Updates the rolling duty cycles after a step. The effective window
    /// grows with the timestep until it reaches `duty_cycle_period`, so
    /// early estimates are not diluted by the full window.
    pub fn update_duty_cycles(&mut self, active_cols: &FxHashSet<usize>, timestep: u64) {
        let period = timestep.min(self.duty_cycle_period).max(1) as f32;
        for (col, duty) in self.duty_cycles.iter_mut().enumerate() {
            let on = if active_cols.contains(&col) { 1.0 } else { 0.0 };
            *duty = (*duty * (period - 1.0) + on) / period;
        }
    }

    /// Recomputes every boost factor against the best duty cycle in the
    /// column's neighbourhood (the whole grid under global inhibition).
    ///
    /// A column below `boost_active_duty_ratio` times that maximum is boosted
    /// linearly up to `max_boost`; otherwise its boost factor returns to 1.
    pub fn update_boosts(&mut self, topology: &Topology, inh_radius: usize, global: bool) {
        let global_max = self
            .duty_cycles
            .iter()
            .fold(0.0f32, |acc, &x| acc.max(x));

        for col in 0..self.boosts.len() {
            let neighbour_max = if global {
                global_max
            } else {
                let centre = topology.coord_of(col);
                topology
                    .neighbours(&centre, inh_radius, 0)
                    .map(|n| self.duty_cycles[n])
                    .fold(self.duty_cycles[col], f32::max)
            };

            let floor = (self.boost_active_duty_ratio * neighbour_max).max(f32::EPSILON);
            let duty = self.duty_cycles[col];
            self.boosts[col] = if duty >= floor {
                1.0
            } else {
                ((1.0 - self.max_boost) / floor) * duty + self.max_boost
            };
        }

        debug!(
            max_boost = self
                .boosts
                .iter()
                .fold(1.0f32, |acc, &b| acc.max(b)),
            "boosts recomputed"
        );
    }
}
