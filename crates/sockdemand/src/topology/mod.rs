//! Demand topology: which services talk to which.

pub mod builder;
pub mod demand;

pub use builder::{TopologyBuilder, find_peer};
pub use demand::{Demand, EstabTopology, ListenTopology, ResourceSnapshot};
