//! Walking an action tree against a [`Remediator`].
//!
//! The resolver is outcome-agnostic: it executes a verb, records whether it
//! worked, and follows the matching branch. It never retries; retry policy
//! lives inside the operations. Every step is logged before branching and the
//! final outcome is logged once, which together form the audit trail for a
//! file.

use crate::context::MediaFileContext;
use crate::rules::{ActionNode, Verb};
use async_trait::async_trait;
use std::fmt;

/// Why a remediation operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// Network trouble, timeouts, 5xx; might work later.
    #[error("{0}")]
    Transient(String),

    /// Missing file or tool, rejected request, nothing owns the file.
    #[error("{0}")]
    Fatal(String),

    /// Shutdown was requested while the operation ran.
    #[error("interrupted by shutdown")]
    Cancelled,
}

impl OperationError {
    pub fn transient(msg: impl fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    pub fn fatal(msg: impl fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }
}

/// Executes individual verbs. Implemented by the real remediation layer and
/// by test doubles.
#[async_trait]
pub trait Remediator: Send + Sync {
    async fn perform(&self, verb: Verb, ctx: &mut MediaFileContext) -> Result<(), OperationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed { class: FailureClass, reason: String },
    Interrupted,
}

impl StepOutcome {
    fn label(&self) -> &'static str {
        match self {
            StepOutcome::Succeeded => "ok",
            StepOutcome::Failed {
                class: FailureClass::Transient,
                ..
            } => "failed (transient)",
            StepOutcome::Failed {
                class: FailureClass::Fatal,
                ..
            } => "failed",
            StepOutcome::Interrupted => "interrupted",
        }
    }
}

impl From<Result<(), OperationError>> for StepOutcome {
    fn from(result: Result<(), OperationError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(OperationError::Transient(reason)) => StepOutcome::Failed {
                class: FailureClass::Transient,
                reason,
            },
            Err(OperationError::Fatal(reason)) => StepOutcome::Failed {
                class: FailureClass::Fatal,
                reason,
            },
            Err(OperationError::Cancelled) => StepOutcome::Interrupted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub verb: Verb,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The walk ended on a successful verb.
    Resolved,
    /// The walk ended on a failed verb with no branch left to take.
    Exhausted,
    /// Shutdown stopped the walk; no fallback branch was taken.
    Interrupted,
}

/// Audit record of one resolution pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub steps: Vec<Step>,
    pub outcome: TerminalOutcome,
}

impl Resolution {
    pub fn verbs(&self) -> Vec<Verb> {
        self.steps.iter().map(|step| step.verb).collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome == TerminalOutcome::Resolved
    }

    /// `REPAIR:failed -> REMUX:ok -> DELETE:ok`
    pub fn trail(&self) -> String {
        self.steps
            .iter()
            .map(|step| format!("{}:{}", step.verb, step.outcome.label()))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// Execute `tree` against `remediator`, following success/failure branches.
///
/// IGNORE never reaches the remediator. The walk visits at most
/// `tree.depth()` nodes because every step descends one level.
pub async fn resolve(
    tree: &ActionNode,
    ctx: &mut MediaFileContext,
    remediator: &dyn Remediator,
) -> Resolution {
    let quiet = tree.is_passive();
    let mut steps = Vec::with_capacity(tree.depth());
    let mut node = tree;

    let outcome = loop {
        let verb = node.verb();
        let outcome: StepOutcome = if verb == Verb::Ignore {
            StepOutcome::Succeeded
        } else {
            remediator.perform(verb, ctx).await.into()
        };

        log_step(ctx, verb, &outcome, quiet);

        let succeeded = outcome == StepOutcome::Succeeded;
        let interrupted = outcome == StepOutcome::Interrupted;
        steps.push(Step { verb, outcome });

        if interrupted {
            break TerminalOutcome::Interrupted;
        }

        match node.next(succeeded) {
            Some(child) => node = child,
            None if succeeded => break TerminalOutcome::Resolved,
            None => break TerminalOutcome::Exhausted,
        }
    };

    let resolution = Resolution { steps, outcome };
    log_resolution(ctx, &resolution, quiet);
    resolution
}

fn log_step(ctx: &MediaFileContext, verb: Verb, outcome: &StepOutcome, quiet: bool) {
    let file = ctx.file_path.display();
    match outcome {
        StepOutcome::Succeeded if quiet => {
            tracing::debug!(incident = %ctx.incident, rule = %ctx.rule, %verb, %file, "Step ok")
        }
        StepOutcome::Succeeded => {
            tracing::info!(incident = %ctx.incident, rule = %ctx.rule, %verb, %file, "Step ok")
        }
        StepOutcome::Failed { class, reason } => tracing::warn!(
            incident = %ctx.incident,
            rule = %ctx.rule,
            %verb,
            %file,
            ?class,
            "Step failed: {}",
            reason
        ),
        StepOutcome::Interrupted => {
            tracing::warn!(incident = %ctx.incident, rule = %ctx.rule, %verb, %file, "Step interrupted")
        }
    }
}

fn log_resolution(ctx: &MediaFileContext, resolution: &Resolution, quiet: bool) {
    let file = ctx.file_path.display();
    let trail = resolution.trail();
    match resolution.outcome {
        TerminalOutcome::Resolved if quiet => {
            tracing::debug!(incident = %ctx.incident, rule = %ctx.rule, %file, %trail, "Ignored")
        }
        TerminalOutcome::Resolved => tracing::info!(
            incident = %ctx.incident,
            rule = %ctx.rule,
            %file,
            %trail,
            "Resolved {}",
            file
        ),
        TerminalOutcome::Exhausted => tracing::error!(
            incident = %ctx.incident,
            rule = %ctx.rule,
            %file,
            %trail,
            cause = %ctx.error_cause,
            "Unresolved incident for {}: every remediation failed",
            file
        ),
        TerminalOutcome::Interrupted => tracing::warn!(
            incident = %ctx.incident,
            rule = %ctx.rule,
            %file,
            %trail,
            "Remediation of {} interrupted by shutdown",
            file
        ),
    }

    if let Some(copy) = &ctx.replacement {
        tracing::warn!(
            incident = %ctx.incident,
            rule = %ctx.rule,
            %file,
            salvaged = %copy.display(),
            "Salvaged copy of {} left at {}",
            file,
            copy.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Fails the verbs listed in `failing`, records every call.
    #[derive(Default)]
    struct Scripted {
        failing: HashMap<Verb, OperationError>,
        calls: Mutex<Vec<Verb>>,
    }

    impl Scripted {
        fn failing(verbs: &[Verb]) -> Self {
            Self {
                failing: verbs
                    .iter()
                    .map(|v| (*v, OperationError::fatal("scripted failure")))
                    .collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Verb> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Remediator for Scripted {
        async fn perform(&self, verb: Verb, _ctx: &mut MediaFileContext) -> Result<(), OperationError> {
            self.calls.lock().push(verb);
            match self.failing.get(&verb) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    /// Answers by call index from a bit pattern: bit i set means call i fails.
    struct BitPattern {
        bits: u32,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Remediator for BitPattern {
        async fn perform(&self, _verb: Verb, _ctx: &mut MediaFileContext) -> Result<(), OperationError> {
            let mut calls = self.calls.lock();
            let idx = *calls;
            *calls += 1;
            if self.bits & (1 << idx) != 0 {
                Err(OperationError::transient("bit set"))
            } else {
                Ok(())
            }
        }
    }

    fn ctx() -> MediaFileContext {
        MediaFileContext::new("bazarr", "test", "/movies/A/a.mkv", "broken")
    }

    fn corruption_tree() -> ActionNode {
        ActionNode::branch(
            Verb::Repair,
            Some(ActionNode::leaf(Verb::Delete)),
            Some(ActionNode::branch(
                Verb::Remux,
                Some(ActionNode::leaf(Verb::Delete)),
                Some(ActionNode::leaf(Verb::Replace)),
            )),
        )
    }

    #[tokio::test]
    async fn repair_and_remux_fail_then_replace() {
        let remediator = Scripted::failing(&[Verb::Repair, Verb::Remux]);
        let resolution = resolve(&corruption_tree(), &mut ctx(), &remediator).await;

        assert_eq!(remediator.calls(), vec![Verb::Repair, Verb::Remux, Verb::Replace]);
        assert_eq!(resolution.outcome, TerminalOutcome::Resolved);
        assert_eq!(resolution.trail(), "REPAIR:failed -> REMUX:failed -> REPLACE:ok");
    }

    #[tokio::test]
    async fn repair_success_deletes() {
        let remediator = Scripted::default();
        let resolution = resolve(&corruption_tree(), &mut ctx(), &remediator).await;
        assert_eq!(resolution.verbs(), vec![Verb::Repair, Verb::Delete]);
        assert!(resolution.is_resolved());
    }

    #[tokio::test]
    async fn exhaustion_when_last_verb_fails() {
        let remediator = Scripted::failing(&[Verb::Repair, Verb::Remux, Verb::Replace]);
        let resolution = resolve(&corruption_tree(), &mut ctx(), &remediator).await;
        assert_eq!(resolution.outcome, TerminalOutcome::Exhausted);
        assert_eq!(resolution.steps.len(), 3);
    }

    #[tokio::test]
    async fn missing_branch_stops() {
        let tree = ActionNode::branch(Verb::Rescan, Some(ActionNode::leaf(Verb::Delete)), None);
        let remediator = Scripted::failing(&[Verb::Rescan]);
        let resolution = resolve(&tree, &mut ctx(), &remediator).await;
        assert_eq!(remediator.calls(), vec![Verb::Rescan]);
        assert_eq!(resolution.outcome, TerminalOutcome::Exhausted);
    }

    #[tokio::test]
    async fn lone_ignore_calls_nothing() {
        let remediator = Scripted::default();
        let resolution = resolve(&ActionNode::leaf(Verb::Ignore), &mut ctx(), &remediator).await;
        assert!(remediator.calls().is_empty());
        assert!(resolution.is_resolved());
        assert_eq!(resolution.verbs(), vec![Verb::Ignore]);
    }

    #[tokio::test]
    async fn cancellation_takes_no_fallback() {
        let mut remediator = Scripted::default();
        remediator.failing.insert(Verb::Repair, OperationError::Cancelled);
        let resolution = resolve(&corruption_tree(), &mut ctx(), &remediator).await;
        assert_eq!(remediator.calls(), vec![Verb::Repair]);
        assert_eq!(resolution.outcome, TerminalOutcome::Interrupted);
    }

    #[tokio::test]
    async fn transient_failure_follows_failure_branch() {
        let mut remediator = Scripted::default();
        remediator
            .failing
            .insert(Verb::Repair, OperationError::transient("timed out"));
        let resolution = resolve(&corruption_tree(), &mut ctx(), &remediator).await;
        assert_eq!(resolution.verbs(), vec![Verb::Repair, Verb::Remux, Verb::Delete]);
        assert_eq!(
            resolution.steps[0].outcome,
            StepOutcome::Failed {
                class: FailureClass::Transient,
                reason: "timed out".into()
            }
        );
    }

    /// All trees up to `depth` over two verbs.
    fn trees(depth: usize) -> Vec<ActionNode> {
        let verbs = [Verb::Repair, Verb::Rescan];
        let mut out: Vec<ActionNode> = verbs.iter().map(|v| ActionNode::leaf(*v)).collect();
        if depth <= 1 {
            return out;
        }

        let mut children: Vec<Option<ActionNode>> = vec![None];
        children.extend(trees(depth - 1).into_iter().map(Some));

        for verb in verbs {
            for s in &children {
                for f in &children {
                    if s.is_none() && f.is_none() {
                        continue;
                    }
                    out.push(ActionNode::branch(verb, s.clone(), f.clone()));
                }
            }
        }
        out
    }

    #[tokio::test]
    async fn every_walk_terminates_within_depth() {
        let all = trees(3);
        assert!(all.len() > 100);

        for tree in &all {
            let depth = tree.depth();
            for bits in 0..(1u32 << depth) {
                let remediator = BitPattern {
                    bits,
                    calls: Mutex::new(0),
                };
                let resolution = resolve(tree, &mut ctx(), &remediator).await;
                let calls = *remediator.calls.lock();
                assert!(calls <= depth, "{tree} with {bits:b} made {calls} calls");
                assert_eq!(calls, resolution.steps.len());
            }
        }
    }
}
