//! Layer parameters.
//!
//! All knobs recognised by the layer, grouped into the structural settings,
//! one [`DendriteParams`] block each for the proximal and distal dendrites,
//! and the inhibition / boosting / context-blending settings. Defaults follow
//! the values the algorithm is normally run with; `validate` rejects
//! configurations the engine cannot operate on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration the layer cannot be built from.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input_dimensions must be set and non-empty")]
    MissingInputDimensions,

    #[error("{name} contains a non-positive dimension: {dims:?}")]
    NonPositiveDimension { name: &'static str, dims: Vec<usize> },

    #[error("depth must be at least 1")]
    ZeroDepth,

    #[error("{name} must lie in [0, 1], got {value}")]
    PermanenceOutOfRange { name: &'static str, value: f32 },

    #[error("{name} must be finite and non-negative, got {value}")]
    NegativeParameter { name: &'static str, value: f32 },

    #[error("activation_level ({level}) must lie in (0, 1] and not exceed activation_level_max ({max})")]
    BadActivationLevel { level: f32, max: f32 },

    #[error("max_boost must be at least 1.0, got {0}")]
    BadMaxBoost(f32),
}

/// Parameters governing one class of dendritic segments (proximal or distal).
///
/// The `ff_*` fields describe the initial feed-forward receptive fields and
/// are only consulted for the proximal dendrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DendriteParams {
    /// Maximum number of segments per owning cell.
    pub max_segments: usize,

    /// Maximum number of synapses on one segment.
    pub max_synapse_count: usize,

    /// Number of synapses a learning step aims to have on a segment.
    pub new_synapse_count: usize,

    /// Minimum count of active connected synapses for a segment to excite
    /// its cell.
    pub stimulus_threshold: usize,

    /// Minimum count of active synapses (connected or not) for a segment to
    /// be considered a match for learning.
    pub learn_threshold: usize,

    /// Permanence increment for active synapses on learning.
    pub perm_inc: f32,

    /// Permanence increment applied in total to synapses from stable input
    /// bits; the excess over `perm_inc` is applied in a second pass.
    pub perm_stable_inc: f32,

    /// Permanence decrement for inactive synapses on learning.
    pub perm_dec: f32,

    /// Permanence decrement applied to mis-predicting segments.
    pub perm_punish: f32,

    /// A synapse is connected iff its permanence is at least this.
    pub perm_connected: f32,

    /// Permanence assigned to newly grown synapses.
    pub perm_init: f32,

    /// Whether mis-predicting segments are punished at all.
    pub punish: bool,

    /// Radius of the initial receptive field, as a fraction of the longest
    /// input dimension. 1.0 means the whole input space.
    pub ff_potential_radius: f32,

    /// Fraction of the candidate input bits each column initially connects to.
    pub ff_init_frac: f32,

    /// Upper bound of the uniform initial permanence range.
    pub ff_perm_init_hi: f32,

    /// Lower bound of the uniform initial permanence range.
    pub ff_perm_init_lo: f32,
}

impl DendriteParams {
    /// Defaults for the proximal (feed-forward) dendrites.
    pub fn proximal_defaults() -> Self {
        Self {
            max_segments: 1,
            max_synapse_count: 300,
            new_synapse_count: 12,
            stimulus_threshold: 2,
            learn_threshold: 7,
            perm_inc: 0.04,
            perm_stable_inc: 0.15,
            perm_dec: 0.01,
            perm_punish: 0.002,
            perm_connected: 0.20,
            perm_init: 0.16,
            punish: false,
            ff_potential_radius: 1.0,
            ff_init_frac: 0.25,
            ff_perm_init_hi: 0.25,
            ff_perm_init_lo: 0.10,
        }
    }

    /// Defaults for the distal (context) dendrites.
    pub fn distal_defaults() -> Self {
        Self {
            max_segments: 5,
            max_synapse_count: 22,
            new_synapse_count: 12,
            stimulus_threshold: 9,
            learn_threshold: 7,
            perm_inc: 0.05,
            perm_stable_inc: 0.05,
            perm_dec: 0.01,
            perm_punish: 0.002,
            perm_connected: 0.20,
            perm_init: 0.16,
            punish: true,
            ff_potential_radius: 1.0,
            ff_init_frac: 0.25,
            ff_perm_init_hi: 0.25,
            ff_perm_init_lo: 0.10,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let perms: [(&'static str, f32); 7] = [
            ("perm_inc", self.perm_inc),
            ("perm_stable_inc", self.perm_stable_inc),
            ("perm_dec", self.perm_dec),
            ("perm_punish", self.perm_punish),
            ("perm_connected", self.perm_connected),
            ("perm_init", self.perm_init),
            ("ff_init_frac", self.ff_init_frac),
        ];
        for (name, value) in perms {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ConfigError::PermanenceOutOfRange { name, value });
            }
        }
        if !(0.0..=1.0).contains(&self.ff_perm_init_lo)
            || !(0.0..=1.0).contains(&self.ff_perm_init_hi)
            || self.ff_perm_init_lo > self.ff_perm_init_hi
        {
            return Err(ConfigError::PermanenceOutOfRange {
                name: "ff_perm_init_lo..ff_perm_init_hi",
                value: self.ff_perm_init_lo,
            });
        }
        if self.ff_potential_radius.is_nan() || self.ff_potential_radius < 0.0 {
            return Err(ConfigError::NegativeParameter {
                name: "ff_potential_radius",
                value: self.ff_potential_radius,
            });
        }
        Ok(())
    }
}

/// The full parameter set for one layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerParams {
    /// Shape of the feed-forward input bit field. Required.
    pub input_dimensions: Vec<usize>,

    /// Shape of the column grid.
    pub column_dimensions: Vec<usize>,

    /// Number of cells per column.
    pub depth: usize,

    /// Shape of the motor copy fed into the distal source space.
    pub distal_motor_dimensions: Vec<usize>,

    /// Shape of the top-down feedback fed into the distal source space.
    pub distal_topdown_dimensions: Vec<usize>,

    /// Whether cells form lateral distal synapses onto this layer's own
    /// activity.
    pub lateral_synapses: bool,

    /// Whether the top-down feedback sub-range is used at all.
    pub use_feedback: bool,

    /// Proximal dendrite parameters.
    pub proximal: DendriteParams,

    /// Distal dendrite parameters.
    pub distal: DendriteParams,

    /// Fraction of columns allowed to activate per step.
    pub activation_level: f32,

    /// Hard cap on the activation fraction under temporal pooling.
    pub activation_level_max: f32,

    /// Global top-N inhibition instead of topological local inhibition.
    pub global_inhibition: bool,

    /// Neighbours at Chebyshev distance up to this are exempt from local
    /// inhibition.
    pub inhibition_base_distance: usize,

    /// Upper bound on the overlap boost factor.
    pub max_boost: f32,

    /// Window, in steps, of the duty-cycle moving average.
    pub duty_cycle_period: u64,

    /// A column is boosted when its duty cycle falls below this fraction of
    /// the best neighbouring duty cycle.
    pub boost_active_duty_ratio: f32,

    /// Recompute boost factors every this many steps.
    pub boost_active_every: u64,

    /// Recompute the inhibition radius every this many steps.
    pub inh_radius_every: u64,

    /// Weight of distal excitation mixed into the pre-inhibition cell
    /// excitation. 0 disables the blend.
    pub distal_vs_proximal_weight: f32,

    /// Allow cells with distal excitation but no feed-forward drive to
    /// compete for activation.
    pub spontaneous_activation: bool,

    /// Minimum margin between the best and second-best cell score for the
    /// best cells to suppress the rest of their column.
    pub dominance_margin: f32,

    /// A higher-level layer is engaged when the stable fraction of its input
    /// exceeds this.
    pub stable_inbit_frac_threshold: f32,

    /// Temporal-pooling excitation granted to newly active cells.
    pub temporal_pooling_max_exc: f32,

    /// Temporal-pooling excitation decay per step.
    pub temporal_pooling_fall: f32,

    /// Seed for the layer's splittable random stream.
    pub random_seed: u64,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self {
            input_dimensions: Vec::new(),
            column_dimensions: vec![1000],
            depth: 5,
            distal_motor_dimensions: vec![0],
            distal_topdown_dimensions: vec![0],
            lateral_synapses: true,
            use_feedback: false,
            proximal: DendriteParams::proximal_defaults(),
            distal: DendriteParams::distal_defaults(),
            activation_level: 0.02,
            activation_level_max: 0.10,
            global_inhibition: true,
            inhibition_base_distance: 1,
            max_boost: 1.5,
            duty_cycle_period: 1000,
            boost_active_duty_ratio: 0.001,
            boost_active_every: 1000,
            inh_radius_every: 1000,
            distal_vs_proximal_weight: 0.0,
            spontaneous_activation: false,
            dominance_margin: 4.0,
            stable_inbit_frac_threshold: 0.5,
            temporal_pooling_max_exc: 50.0,
            temporal_pooling_fall: 5.0,
            random_seed: 42,
        }
    }
}

impl LayerParams {
    /// Defaults for the given input shape.
    pub fn for_input(input_dimensions: Vec<usize>) -> Self {
        Self {
            input_dimensions,
            ..Self::default()
        }
    }

    /// Total number of columns.
    #[inline]
    pub fn n_columns(&self) -> usize {
        self.column_dimensions.iter().product()
    }

    /// Total number of cells.
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_columns() * self.depth
    }

    /// Number of feed-forward input bits.
    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.input_dimensions.iter().product()
    }

    /// A first-level layer has a single proximal segment per column and is
    /// permanently engaged.
    #[inline]
    pub fn first_level(&self) -> bool {
        self.proximal.max_segments == 1
    }

    /// Width of the lateral sub-range of the distal source space.
    #[inline]
    pub fn lateral_width(&self) -> usize {
        if self.lateral_synapses {
            self.n_cells()
        } else {
            0
        }
    }

    /// Width of the motor sub-range of the distal source space.
    #[inline]
    pub fn motor_width(&self) -> usize {
        self.distal_motor_dimensions.iter().product()
    }

    /// Width of the top-down feedback sub-range of the distal source space.
    #[inline]
    pub fn topdown_width(&self) -> usize {
        self.distal_topdown_dimensions.iter().product()
    }

    /// Total width of the aligned distal source space.
    #[inline]
    pub fn distal_source_width(&self) -> usize {
        self.lateral_width() + self.motor_width() + self.topdown_width()
    }

    /// Checks the configuration for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_dimensions.is_empty() {
            return Err(ConfigError::MissingInputDimensions);
        }
        if self.input_dimensions.iter().any(|&d| d == 0) {
            return Err(ConfigError::NonPositiveDimension {
                name: "input_dimensions",
                dims: self.input_dimensions.clone(),
            });
        }
        if self.column_dimensions.is_empty() || self.column_dimensions.iter().any(|&d| d == 0) {
            return Err(ConfigError::NonPositiveDimension {
                name: "column_dimensions",
                dims: self.column_dimensions.clone(),
            });
        }
        if self.depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        self.proximal.validate()?;
        self.distal.validate()?;
        if !(self.activation_level > 0.0
            && self.activation_level <= 1.0
            && self.activation_level <= self.activation_level_max)
        {
            return Err(ConfigError::BadActivationLevel {
                level: self.activation_level,
                max: self.activation_level_max,
            });
        }
        if self.max_boost < 1.0 || self.max_boost.is_nan() {
            return Err(ConfigError::BadMaxBoost(self.max_boost));
        }
        let non_negative: [(&'static str, f32); 5] = [
            ("distal_vs_proximal_weight", self.distal_vs_proximal_weight),
            ("dominance_margin", self.dominance_margin),
            ("stable_inbit_frac_threshold", self.stable_inbit_frac_threshold),
            ("temporal_pooling_max_exc", self.temporal_pooling_max_exc),
            ("temporal_pooling_fall", self.temporal_pooling_fall),
        ];
        for (name, value) in non_negative {
            if value.is_nan() || value < 0.0 {
                return Err(ConfigError::NegativeParameter { name, value });
            }
        }
        if self.boost_active_duty_ratio.is_nan() || self.boost_active_duty_ratio < 0.0 {
            return Err(ConfigError::NegativeParameter {
                name: "boost_active_duty_ratio",
                value: self.boost_active_duty_ratio,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_with_input_dimensions() {
        let params = LayerParams::for_input(vec![50]);
        assert!(params.validate().is_ok());
        assert_eq!(params.n_columns(), 1000);
        assert_eq!(params.n_cells(), 5000);
        assert!(params.first_level());
    }

    #[test]
    fn missing_input_dimensions_rejected() {
        let params = LayerParams::default();
        assert!(matches!(
            params.validate(),
            Err(ConfigError::MissingInputDimensions)
        ));
    }

    #[test]
    fn permanence_out_of_range_rejected() {
        let mut params = LayerParams::for_input(vec![10]);
        params.distal.perm_connected = 1.5;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::PermanenceOutOfRange { .. })
        ));
    }

    #[test]
    fn distal_source_width_sums_subranges() {
        let mut params = LayerParams::for_input(vec![10]);
        params.column_dimensions = vec![8];
        params.depth = 4;
        params.distal_motor_dimensions = vec![6];
        params.distal_topdown_dimensions = vec![3, 3];
        assert_eq!(params.distal_source_width(), 32 + 6 + 9);

        params.lateral_synapses = false;
        assert_eq!(params.distal_source_width(), 15);
    }
}
