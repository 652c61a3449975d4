//! Fake implementations with programmable behavior
//!
//! Unlike the mocks, these carry real state and can serve a whole test
//! scenario without per-call expectations.

pub mod fake_chain;
pub mod step_handlers;

pub use fake_chain::*;
pub use step_handlers::*;
