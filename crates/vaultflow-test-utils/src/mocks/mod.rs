//! Mock implementations of the VaultFlow seams
//!
//! Generated with mockall so tests can script expectations per call.

pub mod chain;
pub mod messaging;

pub use chain::*;
pub use messaging::*;
