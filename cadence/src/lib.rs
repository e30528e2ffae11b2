//! Configuration and entry points for the `cadence` binary

pub mod controller;

pub use controller::{Cadence, RunOptions, TransportConfig};
