//! Domain layer - workflow state, step graph, and repository seams

/// Repository traits and in-memory test implementations
pub mod repository;
/// Workflow step records and kinds
pub mod step;
/// Declarative step-transition graphs
pub mod step_registry;
/// Transaction meta rows owned by the nonce manager
pub mod transaction_meta;
/// Workflow aggregate
pub mod workflow;
