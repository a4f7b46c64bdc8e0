//! Alarm cluster engine: a batch of wake-up alarms spaced by a fixed interval, each
//! playing the next tone from a rotating pool.

pub mod alarm;
pub mod api;
pub mod logging;
pub mod notice;
pub mod store;

pub use alarm::calculator::{Occurrence, TimeDisplayMode, compute_profile, compute_profile_in_tz};
pub use alarm::lifecycle::{ClusterError, ClusterManager, ClusterState, ReconcileReport, SharedCluster};
pub use alarm::model::{ClusterParams, ClusterProfile, RawClusterConfig};
pub use alarm::tone::{Tone, TonePool, default_tones};
