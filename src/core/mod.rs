//! Core HTM layer components:
//!
//! - **Topology**: n-dimensional grid index/coordinate mapping and
//!   annular neighbourhood enumeration
//! - **SynapseGraph**: the sparse synaptic connectivity store shared by
//!   proximal and distal dendrites
//! - **Inhibition**: global and local top-N column selection
//! - **Boosting**: rolling duty cycles and overlap boost factors
//! - **Layer**: the facade owning both synapse graphs and the per-step
//!   state records, exposing `activate`, `learn` and `depolarise`

pub mod activation;
pub mod boosting;
pub mod depolarisation;
pub mod inhibition;
pub mod layer;
pub mod learning;
pub mod params;
pub mod rng;
pub mod state;
pub mod synapses;
pub mod topology;

pub use layer::{Interrupt, Layer};
pub use params::{ConfigError, DendriteParams, LayerParams};
pub use state::{cell_bit, source_of_bit, CellId, LayerView, SegPath};
pub use synapses::{SegUpdate, SegUpdateOp, SynapseGraph};
pub use topology::Topology;
