//! Declarative step-transition graphs, one per workflow kind
//!
//! A registry is pure data: it says which step kinds follow a successful
//! step (fan-out allowed), where a failure converges, which ancestor
//! steps' response data a step needs, and which paired status-check kind
//! polls a submitted-but-unconfirmed transaction. Registries are built
//! once at process start; an unknown kind at dispatch time is a
//! programming error, never a business failure.

use std::collections::HashMap;

use crate::CoreError;

use super::step::StepKind;
use super::workflow::WorkflowKind;

/// Transition rule for one step kind
#[derive(Debug, Clone, Default)]
pub struct TransitionRule {
    /// Step kinds scheduled when this step reports `TaskDone`. More than
    /// one kind means fan-out: siblings run with no mutual ordering.
    pub on_success: Vec<StepKind>,

    /// Single convergence path scheduled when this step reports `TaskFailed`
    pub on_failure: Option<StepKind>,

    /// Ancestor step kinds whose `response_data` is merged into this
    /// step's request params before execution
    pub read_data_from: Vec<StepKind>,

    /// Paired status-check kind scheduled when this step reports
    /// `TaskPending` with a transaction hash. `None` on a check kind
    /// means the step re-polls itself.
    pub pending_check: Option<StepKind>,
}

impl TransitionRule {
    fn new(on_success: Vec<StepKind>) -> Self {
        Self {
            on_success,
            on_failure: Some(StepKind::MarkFailure),
            read_data_from: Vec::new(),
            pending_check: None,
        }
    }

    fn with_check(mut self, check: StepKind) -> Self {
        self.pending_check = Some(check);
        self
    }

    fn reading_from(mut self, kinds: Vec<StepKind>) -> Self {
        self.read_data_from = kinds;
        self
    }

    fn terminal() -> Self {
        Self {
            on_success: Vec::new(),
            on_failure: None,
            read_data_from: Vec::new(),
            pending_check: None,
        }
    }
}

/// The step-transition graph for one workflow kind
#[derive(Debug, Clone)]
pub struct StepRegistry {
    workflow_kind: WorkflowKind,
    init_kind: StepKind,
    rules: HashMap<StepKind, TransitionRule>,
}

impl StepRegistry {
    /// Build the registry for a workflow kind
    pub fn for_kind(kind: WorkflowKind) -> Self {
        match kind {
            WorkflowKind::GrantEthOst => Self::grant_eth_ost(),
            WorkflowKind::StakeAndMint => Self::stake_and_mint(),
            WorkflowKind::LogoutSessions => Self::logout_sessions(),
            WorkflowKind::InitiateRecovery => Self::initiate_recovery(),
        }
    }

    /// The workflow kind this registry belongs to
    pub fn workflow_kind(&self) -> WorkflowKind {
        self.workflow_kind
    }

    /// The designated root step kind
    pub fn init_kind(&self) -> StepKind {
        self.init_kind
    }

    /// Look up the transition rule for a step kind
    pub fn next(&self, kind: StepKind) -> Result<&TransitionRule, CoreError> {
        self.rules
            .get(&kind)
            .ok_or_else(|| CoreError::UnknownStepKind(kind.as_str().to_string()))
    }

    /// Whether the registry knows this kind
    pub fn contains(&self, kind: StepKind) -> bool {
        self.rules.contains_key(&kind)
    }

    /// All kinds in the registry
    pub fn kinds(&self) -> impl Iterator<Item = StepKind> + '_ {
        self.rules.keys().copied()
    }

    /// Check graph closure: every referenced kind must exist in the
    /// registry, the init kind must be present, and terminal kinds must
    /// not schedule successors. Called once at startup; a failure here is
    /// a deploy-time bug.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.rules.contains_key(&self.init_kind) {
            return Err(CoreError::ValidationError(format!(
                "Registry for {} is missing its init kind {}",
                self.workflow_kind, self.init_kind
            )));
        }

        for (kind, rule) in &self.rules {
            let referenced = rule
                .on_success
                .iter()
                .chain(rule.on_failure.iter())
                .chain(rule.read_data_from.iter())
                .chain(rule.pending_check.iter());

            for target in referenced {
                if !self.rules.contains_key(target) {
                    return Err(CoreError::ValidationError(format!(
                        "Registry for {}: step {} references unknown kind {}",
                        self.workflow_kind, kind, target
                    )));
                }
            }

            if kind.is_terminal() && !rule.on_success.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "Registry for {}: terminal step {} must not schedule successors",
                    self.workflow_kind, kind
                )));
            }
        }

        Ok(())
    }

    fn with_rules(
        workflow_kind: WorkflowKind,
        rules: Vec<(StepKind, TransitionRule)>,
    ) -> Self {
        Self {
            workflow_kind,
            init_kind: StepKind::Init,
            rules: rules.into_iter().collect(),
        }
    }

    /// init → grantEth → checkGrantEthStatus → grantOst →
    /// checkGrantOstStatus → markSuccess
    fn grant_eth_ost() -> Self {
        use StepKind::*;
        Self::with_rules(
            WorkflowKind::GrantEthOst,
            vec![
                (Init, TransitionRule::new(vec![GrantEth])),
                (
                    GrantEth,
                    TransitionRule::new(vec![GrantOst]).with_check(CheckGrantEthStatus),
                ),
                (CheckGrantEthStatus, TransitionRule::new(vec![GrantOst])),
                (
                    GrantOst,
                    TransitionRule::new(vec![MarkSuccess]).with_check(CheckGrantOstStatus),
                ),
                (CheckGrantOstStatus, TransitionRule::new(vec![MarkSuccess])),
                (MarkSuccess, TransitionRule::terminal()),
                (MarkFailure, TransitionRule::terminal()),
            ],
        )
    }

    /// The stake-and-mint protocol: approve, request stake, then fan out
    /// into the facilitator acceptance branch and the state-root anchor
    /// branch. The acceptance branch carries the progress steps through
    /// to the auxiliary-chain mint.
    fn stake_and_mint() -> Self {
        use StepKind::*;
        Self::with_rules(
            WorkflowKind::StakeAndMint,
            vec![
                (Init, TransitionRule::new(vec![ApproveGatewayComposer])),
                (
                    ApproveGatewayComposer,
                    TransitionRule::new(vec![RequestStake]).with_check(CheckApproveStatus),
                ),
                (CheckApproveStatus, TransitionRule::new(vec![RequestStake])),
                (
                    RequestStake,
                    TransitionRule::new(vec![AcceptStake, CommitStateRoot])
                        .with_check(CheckRequestStakeStatus),
                ),
                (
                    CheckRequestStakeStatus,
                    TransitionRule::new(vec![AcceptStake, CommitStateRoot]),
                ),
                (
                    AcceptStake,
                    TransitionRule::new(vec![ProgressStake])
                        .with_check(CheckAcceptStakeStatus)
                        .reading_from(vec![RequestStake]),
                ),
                (CheckAcceptStakeStatus, TransitionRule::new(vec![ProgressStake])),
                (
                    CommitStateRoot,
                    TransitionRule::new(vec![]).with_check(CheckCommitStateRootStatus),
                ),
                (CheckCommitStateRootStatus, TransitionRule::new(vec![])),
                (
                    ProgressStake,
                    TransitionRule::new(vec![ProgressMint])
                        .with_check(CheckProgressStakeStatus)
                        .reading_from(vec![RequestStake, AcceptStake]),
                ),
                (CheckProgressStakeStatus, TransitionRule::new(vec![ProgressMint])),
                (
                    ProgressMint,
                    TransitionRule::new(vec![MarkSuccess])
                        .with_check(CheckProgressMintStatus)
                        .reading_from(vec![RequestStake]),
                ),
                (CheckProgressMintStatus, TransitionRule::new(vec![MarkSuccess])),
                (MarkSuccess, TransitionRule::terminal()),
                (MarkFailure, TransitionRule::terminal()),
            ],
        )
    }

    /// init → logoutSessions → checkLogoutSessionsStatus → markSuccess
    fn logout_sessions() -> Self {
        use StepKind::*;
        Self::with_rules(
            WorkflowKind::LogoutSessions,
            vec![
                (Init, TransitionRule::new(vec![LogoutSessions])),
                (
                    LogoutSessions,
                    TransitionRule::new(vec![MarkSuccess])
                        .with_check(CheckLogoutSessionsStatus),
                ),
                (
                    CheckLogoutSessionsStatus,
                    TransitionRule::new(vec![MarkSuccess]),
                ),
                (MarkSuccess, TransitionRule::terminal()),
                (MarkFailure, TransitionRule::terminal()),
            ],
        )
    }

    /// init → initiateRecovery → checkInitiateRecoveryStatus → markSuccess
    fn initiate_recovery() -> Self {
        use StepKind::*;
        Self::with_rules(
            WorkflowKind::InitiateRecovery,
            vec![
                (Init, TransitionRule::new(vec![InitiateRecovery])),
                (
                    InitiateRecovery,
                    TransitionRule::new(vec![MarkSuccess])
                        .with_check(CheckInitiateRecoveryStatus),
                ),
                (
                    CheckInitiateRecoveryStatus,
                    TransitionRule::new(vec![MarkSuccess]),
                ),
                (MarkSuccess, TransitionRule::terminal()),
                (MarkFailure, TransitionRule::terminal()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_registries_validate() {
        for kind in WorkflowKind::ALL {
            let registry = StepRegistry::for_kind(kind);
            registry
                .validate()
                .unwrap_or_else(|e| panic!("registry for {} failed validation: {}", kind, e));
        }
    }

    #[test]
    fn test_graph_closure_on_success() {
        for wf_kind in WorkflowKind::ALL {
            let registry = StepRegistry::for_kind(wf_kind);
            for kind in registry.kinds().collect::<Vec<_>>() {
                let rule = registry.next(kind).unwrap();
                for successor in &rule.on_success {
                    assert!(
                        registry.contains(*successor),
                        "{}: {} -> unknown {}",
                        wf_kind,
                        kind,
                        successor
                    );
                }
            }
        }
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let registry = StepRegistry::for_kind(WorkflowKind::GrantEthOst);
        let err = registry.next(StepKind::RequestStake).unwrap_err();
        assert!(matches!(err, CoreError::UnknownStepKind(_)));
    }

    #[test]
    fn test_grant_eth_ost_chain() {
        let registry = StepRegistry::for_kind(WorkflowKind::GrantEthOst);
        assert_eq!(registry.init_kind(), StepKind::Init);

        let grant_eth = registry.next(StepKind::GrantEth).unwrap();
        assert_eq!(grant_eth.on_success, vec![StepKind::GrantOst]);
        assert_eq!(grant_eth.pending_check, Some(StepKind::CheckGrantEthStatus));
        assert_eq!(grant_eth.on_failure, Some(StepKind::MarkFailure));

        let mark_success = registry.next(StepKind::MarkSuccess).unwrap();
        assert!(mark_success.on_success.is_empty());
        assert!(mark_success.on_failure.is_none());
    }

    #[test]
    fn test_stake_and_mint_fan_out() {
        let registry = StepRegistry::for_kind(WorkflowKind::StakeAndMint);
        let rule = registry.next(StepKind::RequestStake).unwrap();
        assert_eq!(
            rule.on_success,
            vec![StepKind::AcceptStake, StepKind::CommitStateRoot]
        );

        // The anchor branch ends without reaching the terminal step.
        let commit_check = registry.next(StepKind::CheckCommitStateRootStatus).unwrap();
        assert!(commit_check.on_success.is_empty());
    }

    #[test]
    fn test_read_data_from_declarations() {
        let registry = StepRegistry::for_kind(WorkflowKind::StakeAndMint);
        let progress_stake = registry.next(StepKind::ProgressStake).unwrap();
        assert_eq!(
            progress_stake.read_data_from,
            vec![StepKind::RequestStake, StepKind::AcceptStake]
        );
    }

    #[test]
    fn test_check_kinds_do_not_pair_further_checks() {
        for wf_kind in WorkflowKind::ALL {
            let registry = StepRegistry::for_kind(wf_kind);
            for kind in registry.kinds().collect::<Vec<_>>() {
                if let Some(check) = registry.next(kind).unwrap().pending_check {
                    // A paired check re-polls itself rather than chaining
                    // another check kind.
                    assert!(registry.next(check).unwrap().pending_check.is_none());
                }
            }
        }
    }
}
