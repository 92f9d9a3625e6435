//! Path utilities for media files referenced by log lines.
//!
//! Log messages embed the implicated file somewhere in free text, so the
//! helpers here locate an absolute path inside a message and derive the
//! sibling paths used for repaired and remuxed outputs.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Extensions that end a media path inside a log message.
const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "ts", "m2ts", "webm", "mov", "wmv", "flv", "mpg", "mpeg",
];

/// Disc images and raw stream containers that show up in log messages but
/// are not playable video files on their own.
const DISC_EXTENSIONS: &[&str] = &["iso", "img", "vob"];

/// Characters that commonly wrap a path inside a log message.
const QUOTES: &[char] = &['"', '\'', '`'];

/// Build `<dir>/<stem>.<tag>.<extension>` next to `path`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `path` has no file stem.
pub fn derived_path(path: &Path, tag: &str, extension: &str) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .ok_or_else(|| Error::invalid_input(format!("no file name in {}", path.display())))?;

    let mut name = stem.to_os_string();
    name.push(".");
    name.push(tag);
    name.push(".");
    name.push(extension);

    Ok(path.with_file_name(name))
}

/// Split a log message into its error text and the absolute path it names.
///
/// The path starts at the first `/` that opens a word (preceded by nothing,
/// whitespace or a quote). It ends after the last known media extension, or
/// at the end of the message when no extension is recognised. Paths may
/// contain spaces. The returned cause is the message with the path removed.
pub fn split_media_path(message: &str) -> (String, Option<PathBuf>) {
    let Some(start) = path_start(message) else {
        return (message.trim().to_string(), None);
    };

    let rest = &message[start..];
    let end = media_extension_end(rest).unwrap_or_else(|| {
        rest.trim_end()
            .trim_end_matches(|c: char| QUOTES.contains(&c) || c == '.' || c == ',')
            .len()
    });

    let path = &rest[..end];
    if path.len() <= 1 {
        return (message.trim().to_string(), None);
    }

    let before = message[..start].trim_end_matches(QUOTES).trim_end();
    let after = rest[end..].trim_start_matches(QUOTES).trim_start();
    let cause = match (before.is_empty(), after.is_empty()) {
        (false, false) => format!("{before} {after}"),
        (false, true) => before.to_string(),
        (true, _) => after.to_string(),
    };

    (cause, Some(PathBuf::from(path)))
}

fn path_start(message: &str) -> Option<usize> {
    let mut prev: Option<char> = None;
    for (idx, c) in message.char_indices() {
        if c == '/' {
            match prev {
                None => return Some(idx),
                Some(p) if p.is_whitespace() || QUOTES.contains(&p) => return Some(idx),
                _ => {}
            }
        }
        prev = Some(c);
    }
    None
}

/// Byte offset just past the last `.ext` in `text` that names a media file.
fn media_extension_end(text: &str) -> Option<usize> {
    let lower = text.to_ascii_lowercase();
    let mut best = None;

    for ext in VIDEO_EXTENSIONS.iter().chain(DISC_EXTENSIONS) {
        let needle = format!(".{ext}");
        for (idx, _) in lower.match_indices(&needle) {
            let end = idx + needle.len();
            let boundary = lower[end..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_ascii_alphanumeric());
            if boundary && best.map_or(true, |b| end > b) {
                best = Some(end);
            }
        }
    }

    best
}
