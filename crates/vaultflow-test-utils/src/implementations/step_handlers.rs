//! Step handler fakes for engine tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use vaultflow_core::{CoreError, HandlerFactory, StepHandler, StepKind, StepOutcome, StepPayload};

/// Handler that returns the same outcome on every invocation
pub struct StaticHandler {
    kind: StepKind,
    outcome: StepOutcome,
}

impl StaticHandler {
    /// A handler for `kind` that always returns `outcome`
    pub fn new(kind: StepKind, outcome: StepOutcome) -> Arc<Self> {
        Arc::new(Self { kind, outcome })
    }
}

#[async_trait]
impl StepHandler for StaticHandler {
    fn step_kind(&self) -> StepKind {
        self.kind
    }

    async fn perform(&self, _params: &StepPayload) -> Result<StepOutcome, CoreError> {
        Ok(self.outcome.clone())
    }
}

/// Factory that completes every step kind synchronously
pub fn always_done_factory() -> HandlerFactory {
    Arc::new(|kind| {
        Ok(StaticHandler::new(kind, StepOutcome::done(None)) as Arc<dyn StepHandler>)
    })
}

/// Factory serving a fixed outcome per step kind
///
/// Kinds absent from the map resolve to `HandlerNotFound`, mirroring a
/// deploy missing a handler registration.
pub fn outcome_factory(outcomes: HashMap<StepKind, StepOutcome>) -> HandlerFactory {
    let outcomes = Arc::new(outcomes);
    Arc::new(move |kind| {
        outcomes
            .get(&kind)
            .map(|outcome| StaticHandler::new(kind, outcome.clone()) as Arc<dyn StepHandler>)
            .ok_or_else(|| CoreError::HandlerNotFound(kind.as_str().to_string()))
    })
}
