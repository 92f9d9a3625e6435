//! Built-in rule table for Bazarr error lines.
//!
//! These rules cover the errors Bazarr logs while indexing subtitles for
//! broken media, plus the noise it logs when Sonarr or Radarr are slow.
//!
//! # Rules
//!
//! 1. **timeout**: any timeout is transient noise → IGNORE
//! 2. **table-border**: ASCII table borders from multi-line tracebacks → IGNORE
//! 3. **duplicate-movie**: Bazarr's own UNIQUE constraint on movie insert → IGNORE
//! 4. **arr-fetch-timeout**: Sonarr/Radarr sync timeouts → IGNORE
//! 5. **unique-constraint**: other database constraint noise → IGNORE
//! 6. **invalid-extension**: the release is unusable in its current container;
//!    unmonitor it, then remux. A good remux replaces the original, a failed
//!    one asks the backend for a new release.
//! 7. **corrupt-file**: ffprobe cannot analyze the file; try an
//!    error-concealing repair, then a plain remux, then replace.
//!
//! Order matters: the first matching rule wins, so the broad IGNORE rules
//! sit ahead of the remediation rules.
//!
//! # Example
//!
//! ```
//! use remediarr::rules::{RuleTable, Verb};
//!
//! let table = RuleTable::builtin();
//! let rule = table
//!     .find("ffprobe cannot analyze this video file. Could it be corrupted? /movies/a.mkv")
//!     .unwrap();
//! assert_eq!(rule.name, "corrupt-file");
//! assert_eq!(rule.action.verb(), Verb::Repair);
//! ```

use super::{ActionNode, ErrorRule, Verb};
use regex::Regex;

/// Remux into a fresh container; keep it on success, re-grab on failure.
fn remux_or_replace() -> ActionNode {
    ActionNode::branch(
        Verb::Remux,
        Some(ActionNode::leaf(Verb::Delete)),
        Some(ActionNode::leaf(Verb::Replace)),
    )
}

/// Every built-in rule, in evaluation order.
pub fn builtin_rules() -> Vec<ErrorRule> {
    let ignore = || ActionNode::leaf(Verb::Ignore);

    let table: Vec<(&str, &str, ActionNode)> = vec![
        ("timeout", r"Timeout", ignore()),
        ("table-border", r"\+-{3,}.*-{3,}\+", ignore()),
        (
            "duplicate-movie",
            r"cannot insert movie.*because of \(sqlite3\.IntegrityError\) UNIQUE constraint failed",
            ignore(),
        ),
        (
            "arr-fetch-timeout",
            r"Error trying to get (series|movies|episodes|tags|episodeFiles|profiles) from (Sonarr|Radarr)\. Timeout",
            ignore(),
        ),
        ("unique-constraint", r"UNIQUE constraint failed:", ignore()),
        (
            "invalid-extension",
            r"is not a valid video extension",
            ActionNode::then(Verb::Blacklist, remux_or_replace()),
        ),
        (
            "corrupt-file",
            r"ffprobe cannot analyze this video file.*Could it be corrupted\?",
            ActionNode::branch(
                Verb::Repair,
                Some(ActionNode::leaf(Verb::Delete)),
                Some(remux_or_replace()),
            ),
        ),
    ];

    table
        .into_iter()
        .map(|(name, pattern, action)| ErrorRule {
            name: name.to_string(),
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("built-in rule {name}: {e}")),
            action,
        })
        .collect()
}
