//! Branching remediation trees.
//!
//! An [`ActionNode`] is either a single verb or a verb whose outcome picks
//! the next node. Trees are finite by construction (owned boxes, no sharing)
//! and their depth is capped at [`MAX_TREE_DEPTH`] when compiled from
//! configuration, so walking one always ends after at most `depth()` verbs.

use crate::config::{ActionNodeSpec, ActionSpec};
use std::fmt;
use std::str::FromStr;

/// Deepest tree accepted from configuration.
pub const MAX_TREE_DEPTH: usize = 8;

/// A remediation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Repair,
    Remux,
    Delete,
    Replace,
    Blacklist,
    Rescan,
    Ignore,
}

impl Verb {
    pub const ALL: [Verb; 7] = [
        Verb::Repair,
        Verb::Remux,
        Verb::Delete,
        Verb::Replace,
        Verb::Blacklist,
        Verb::Rescan,
        Verb::Ignore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Repair => "REPAIR",
            Verb::Remux => "REMUX",
            Verb::Delete => "DELETE",
            Verb::Replace => "REPLACE",
            Verb::Blacklist => "BLACKLIST",
            Verb::Rescan => "RESCAN",
            Verb::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = TreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TreeError::UnknownVerb(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("unknown verb '{0}' (expected one of REPAIR, REMUX, DELETE, REPLACE, BLACKLIST, RESCAN, IGNORE)")]
    UnknownVerb(String),

    #[error("tree depth {depth} exceeds the maximum of {max}")]
    TooDeep { depth: usize, max: usize },

    #[error("'{verb}' combines `then` with `on_success`/`on_failure`")]
    AmbiguousBranches { verb: String },
}

/// One node of a remediation tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionNode {
    Leaf(Verb),
    Branch {
        verb: Verb,
        on_success: Option<Box<ActionNode>>,
        on_failure: Option<Box<ActionNode>>,
    },
}

impl ActionNode {
    pub fn leaf(verb: Verb) -> Self {
        ActionNode::Leaf(verb)
    }

    pub fn branch(verb: Verb, on_success: Option<ActionNode>, on_failure: Option<ActionNode>) -> Self {
        ActionNode::Branch {
            verb,
            on_success: on_success.map(Box::new),
            on_failure: on_failure.map(Box::new),
        }
    }

    /// Run `next` after `verb` regardless of its outcome.
    pub fn then(verb: Verb, next: ActionNode) -> Self {
        Self::branch(verb, Some(next.clone()), Some(next))
    }

    pub fn verb(&self) -> Verb {
        match self {
            ActionNode::Leaf(verb) | ActionNode::Branch { verb, .. } => *verb,
        }
    }

    /// Child selected by an outcome, if any.
    pub fn next(&self, success: bool) -> Option<&ActionNode> {
        match self {
            ActionNode::Leaf(_) => None,
            ActionNode::Branch {
                on_success,
                on_failure,
                ..
            } => {
                if success {
                    on_success.as_deref()
                } else {
                    on_failure.as_deref()
                }
            }
        }
    }

    /// Longest chain of verbs a single walk can execute.
    pub fn depth(&self) -> usize {
        match self {
            ActionNode::Leaf(_) => 1,
            ActionNode::Branch {
                on_success,
                on_failure,
                ..
            } => {
                let s = on_success.as_ref().map_or(0, |n| n.depth());
                let f = on_failure.as_ref().map_or(0, |n| n.depth());
                1 + s.max(f)
            }
        }
    }

    /// True when every verb in the tree is IGNORE.
    pub fn is_passive(&self) -> bool {
        self.verb() == Verb::Ignore
            && self.next(true).map_or(true, ActionNode::is_passive)
            && self.next(false).map_or(true, ActionNode::is_passive)
    }

    /// Compile a configured tree, rejecting unknown verbs and excess depth.
    pub fn from_spec(spec: &ActionSpec) -> Result<Self, TreeError> {
        let node = compile(spec)?;
        let depth = node.depth();
        if depth > MAX_TREE_DEPTH {
            return Err(TreeError::TooDeep {
                depth,
                max: MAX_TREE_DEPTH,
            });
        }
        Ok(node)
    }
}

fn compile(spec: &ActionSpec) -> Result<ActionNode, TreeError> {
    match spec {
        ActionSpec::Verb(name) => Ok(ActionNode::Leaf(name.parse()?)),
        ActionSpec::Node(node) => compile_node(node),
    }
}

fn compile_node(spec: &ActionNodeSpec) -> Result<ActionNode, TreeError> {
    let verb: Verb = spec.verb.parse()?;

    if let Some(then) = &spec.then {
        if spec.on_success.is_some() || spec.on_failure.is_some() {
            return Err(TreeError::AmbiguousBranches {
                verb: spec.verb.clone(),
            });
        }
        return Ok(ActionNode::then(verb, compile(then)?));
    }

    let on_success = spec.on_success.as_deref().map(compile).transpose()?;
    let on_failure = spec.on_failure.as_deref().map(compile).transpose()?;

    if on_success.is_none() && on_failure.is_none() {
        return Ok(ActionNode::Leaf(verb));
    }
    Ok(ActionNode::branch(verb, on_success, on_failure))
}

impl fmt::Display for ActionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionNode::Leaf(verb) => write!(f, "{verb}"),
            ActionNode::Branch {
                verb,
                on_success,
                on_failure,
            } => {
                write!(f, "{verb} -> (")?;
                match on_success {
                    Some(node) => write!(f, "ok: {node}")?,
                    None => f.write_str("ok: stop")?,
                }
                match on_failure {
                    Some(node) => write!(f, " | fail: {node}")?,
                    None => f.write_str(" | fail: stop")?,
                }
                f.write_str(")")
            }
        }
    }
}
