mod builtin;
mod tree;

pub use builtin::builtin_rules;
pub use tree::{ActionNode, TreeError, Verb, MAX_TREE_DEPTH};

use crate::config::RuleConfig;
use regex::Regex;

/// An error signature and the remediation it triggers.
#[derive(Debug, Clone)]
pub struct ErrorRule {
    pub name: String,
    pub pattern: Regex,
    pub action: ActionNode,
}

impl ErrorRule {
    pub fn new(name: impl Into<String>, pattern: &str, action: ActionNode) -> Result<Self, RuleError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|source| RuleError::InvalidPattern {
            rule: name.clone(),
            source,
        })?;
        Ok(Self {
            name,
            pattern,
            action,
        })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule '{rule}' has an invalid pattern")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule '{rule}' has an invalid action tree")]
    InvalidTree {
        rule: String,
        #[source]
        source: TreeError,
    },

    #[error("rule name '{0}' is used more than once")]
    DuplicateName(String),
}

/// Ordered, immutable list of error rules. The first matching rule wins.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<ErrorRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<ErrorRule>) -> Result<Self, RuleError> {
        for (idx, rule) in rules.iter().enumerate() {
            if rules[..idx].iter().any(|r| r.name == rule.name) {
                return Err(RuleError::DuplicateName(rule.name.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// The built-in Bazarr table on its own.
    pub fn builtin() -> Self {
        Self {
            rules: builtin_rules(),
        }
    }

    /// Compile configured rules in order, optionally followed by the
    /// built-in table. Disabled rules are dropped.
    pub fn from_config(configured: &[RuleConfig], include_builtin: bool) -> Result<Self, RuleError> {
        let mut rules = Vec::with_capacity(configured.len());

        for rule in configured.iter().filter(|r| r.enabled) {
            let action =
                ActionNode::from_spec(&rule.action).map_err(|source| RuleError::InvalidTree {
                    rule: rule.name.clone(),
                    source,
                })?;
            rules.push(ErrorRule::new(&rule.name, &rule.pattern, action)?);
        }

        if include_builtin {
            rules.extend(builtin_rules());
        }

        Self::new(rules)
    }

    /// Find the first rule whose pattern matches `message`.
    pub fn find(&self, message: &str) -> Option<&ErrorRule> {
        self.rules.iter().find(|rule| rule.matches(message))
    }

    pub fn rules(&self) -> &[ErrorRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
