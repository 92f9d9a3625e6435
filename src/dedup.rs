//! Suppressing repeats of the same underlying error.
//!
//! Bazarr logs the same failure every time it rescans a file, so each error
//! line is reduced to a [`Fingerprint`] and checked against a bounded
//! [`DedupWindow`]. How much of the message is normalised away before
//! fingerprinting is configurable through [`FingerprintPolicy`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// Which parts of an error line identify the underlying event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintScope {
    /// Normalised error text plus file path.
    #[default]
    MessageAndPath,
    /// File path only; any error about the same file is a repeat. Lines
    /// without a path fall back to the message.
    Path,
    /// Normalised error text only.
    Message,
}

/// How error text is normalised before fingerprinting.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FingerprintPolicy {
    #[serde(default)]
    pub scope: FingerprintScope,

    #[serde(default = "default_true")]
    pub lowercase: bool,

    /// Replace digit runs with `#` so counters, ids and timings do not make
    /// repeats look new.
    #[serde(default = "default_true")]
    pub mask_digits: bool,

    #[serde(default = "default_true")]
    pub collapse_whitespace: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self {
            scope: FingerprintScope::default(),
            lowercase: true,
            mask_digits: true,
            collapse_whitespace: true,
        }
    }
}

impl FingerprintPolicy {
    /// Normalise error text according to this policy.
    pub fn normalize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut in_digits = false;
        let mut in_space = false;

        for c in text.trim().chars() {
            if self.mask_digits && c.is_ascii_digit() {
                if !in_digits {
                    out.push('#');
                }
                in_digits = true;
                in_space = false;
                continue;
            }
            in_digits = false;

            if self.collapse_whitespace && c.is_whitespace() {
                if !in_space {
                    out.push(' ');
                }
                in_space = true;
                continue;
            }
            in_space = false;

            if self.lowercase {
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }

        out
    }

    pub fn fingerprint(&self, cause: &str, path: Option<&Path>) -> Fingerprint {
        let path = path.map(|p| p.to_string_lossy());
        let key = match (self.scope, path) {
            (FingerprintScope::Message, _) | (FingerprintScope::Path, None) => {
                self.normalize(cause)
            }
            (FingerprintScope::Path, Some(path)) => format!("\u{1f}{path}"),
            (FingerprintScope::MessageAndPath, Some(path)) => {
                format!("{}\u{1f}{}", self.normalize(cause), path)
            }
            (FingerprintScope::MessageAndPath, None) => self.normalize(cause),
        };
        Fingerprint(key)
    }
}

/// Deduplication key for one error occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.replace('\u{1f}', " @ "))
    }
}

/// Recently seen fingerprints, bounded by count and by age.
///
/// Each fingerprint is stored at most once, so `order` and `seen` always
/// hold the same keys and eviction is FIFO by first sighting.
#[derive(Debug)]
pub struct DedupWindow {
    capacity: usize,
    ttl: Option<Duration>,
    seen: HashMap<Fingerprint, Instant>,
    order: VecDeque<Fingerprint>,
}

impl DedupWindow {
    /// `capacity` is clamped to at least one entry. A `ttl` of `None` keeps
    /// entries until they are pushed out by capacity.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `fingerprint`, returning `false` if it is a repeat.
    pub fn should_process(&mut self, fingerprint: &Fingerprint) -> bool {
        self.should_process_at(fingerprint, Instant::now())
    }

    /// [`should_process`](Self::should_process) with an explicit clock.
    pub fn should_process_at(&mut self, fingerprint: &Fingerprint, now: Instant) -> bool {
        self.expire(now);

        if self.seen.contains_key(fingerprint) {
            tracing::trace!(%fingerprint, "suppressed repeat");
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
                tracing::trace!(fingerprint = %oldest, "evicted from window");
            }
        }

        self.seen.insert(fingerprint.clone(), now);
        self.order.push_back(fingerprint.clone());
        tracing::trace!(%fingerprint, "processing new fingerprint");
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn expire(&mut self, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };

        while let Some(oldest) = self.order.front() {
            let expired = self
                .seen
                .get(oldest)
                .map_or(true, |seen_at| now.saturating_duration_since(*seen_at) >= ttl);
            if !expired {
                break;
            }
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }
}
