//! Testing utilities for the VaultFlow platform.
//!
//! This crate provides standardized testing utilities for the VaultFlow
//! platform: mockall mocks for the chain and messaging seams, fake
//! implementations with programmable behavior, and test data generators.

pub mod data_generators;
pub mod implementations;
pub mod mocks;

/// Re-export for convenience in downstream test code
pub use mockall;
