//! Hierarchical Temporal Memory cortical layer.
//!
//! This crate implements the per-timestep state machine of a single HTM
//! layer: proximal overlap computation, temporal-pooling accumulation,
//! column inhibition, within-column cell selection, winner-cell tracking,
//! segment learning with growth and pruning, and distal depolarisation.
//!
//! The entry point is [`core::layer::Layer`]. A host drives it with three
//! explicit transition functions per timestep:
//!
//! ```text
//! layer.activate(ff_bits, stable_ff_bits);
//! layer.learn();
//! layer.depolarise(distal_ff_bits, apical_fb_bits, apical_fb_wc_bits);
//! ```
//!
//! Encoders, hierarchy orchestration, serialization of whole layers, and
//! visualization are external collaborators and out of scope here.

pub mod core;
