//! Application services built on the domain layer

/// Dual-check transaction confirmation
pub mod confirmation;

/// Sequential nonce allocation
pub mod nonce_manager;

/// The workflow engine
pub mod router;
