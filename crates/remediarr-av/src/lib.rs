//! # remediarr-av
//!
//! External media tool wrappers used to salvage broken video files.
//!
//! This crate provides:
//! - Tool discovery for ffmpeg, ffprobe and mkvmerge ([`Toolbox`])
//! - An async command runner with per-call timeout and cooperative
//!   cancellation ([`ToolCommand`])
//! - An ffprobe-based validity check ([`analyze`], [`verify_playable`])
//! - Repair (error-concealing re-mux) and remux (stream copy into Matroska)
//!   actions that produce a new sibling file and validate it
//!
//! ## Example
//!
//! ```no_run
//! use remediarr_av::{actions, Toolbox};
//! use tokio_util::sync::CancellationToken;
//! use std::path::Path;
//!
//! # async fn example() -> remediarr_av::Result<()> {
//! let tools = Toolbox::discover(&Default::default());
//! let cancel = CancellationToken::new();
//! let output = actions::remux(&tools, Path::new("/movies/Heat/Heat.avi"), &cancel).await?;
//! println!("remuxed into {}", output.display());
//! # Ok(())
//! # }
//! ```

pub mod actions;
mod command;
mod error;
pub mod probe;
pub mod tools;

// Re-exports
pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use probe::{analyze, verify_playable, MediaSummary};
pub use tools::{check_tool, check_tools, require_tool, ToolInfo, ToolOverrides, Toolbox};
