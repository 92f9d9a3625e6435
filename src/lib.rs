//! Remediarr - Bazarr log watcher that repairs or replaces broken media
//!
//! This library crate exposes the core functionality for integration testing.

pub mod arr;
pub mod config;
pub mod context;
pub mod dedup;
pub mod logline;
pub mod remediation;
pub mod resolver;
pub mod rules;
pub mod watch;
