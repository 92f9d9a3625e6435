//! Remediarr-Common: shared error type and path utilities.
//!
//! - **Path Utilities**: derived sibling paths for repaired/remuxed outputs
//!   and locating the media path inside a log message
//! - **Error Handling**: a small error enum and result alias shared by the
//!   workspace crates
//!
//! # Examples
//!
//! ```
//! use remediarr_common::paths::{derived_path, split_media_path};
//! use std::path::Path;
//!
//! let out = derived_path(Path::new("/movies/Heat (1995)/Heat.avi"), "remux", "mkv").unwrap();
//! assert_eq!(out, Path::new("/movies/Heat (1995)/Heat.remux.mkv"));
//!
//! let (cause, path) = split_media_path("cannot analyze /tv/Show/S01/e01.mkv");
//! assert_eq!(cause, "cannot analyze");
//! assert_eq!(path.unwrap(), Path::new("/tv/Show/S01/e01.mkv"));
//! ```

pub mod error;
pub mod paths;

pub use error::{Error, Result};
