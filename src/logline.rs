//! Extracting error messages and file paths from raw log lines.

use regex::Regex;
use remediarr_common::paths::split_media_path;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LineParserError {
    #[error("invalid line pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("line pattern must define a `message` capture group")]
    MissingMessageGroup,
}

/// An error line reduced to what the rules and deduplicator need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLine {
    /// Full message text; rules match against this.
    pub message: String,
    /// Message with the file path removed.
    pub cause: String,
    pub file_path: Option<PathBuf>,
}

/// Recognises error lines using a regex with a `message` capture group.
#[derive(Debug, Clone)]
pub struct LineParser {
    pattern: Regex,
}

impl LineParser {
    pub fn new(pattern: &str) -> Result<Self, LineParserError> {
        let pattern = Regex::new(pattern)?;
        if !pattern.capture_names().any(|name| name == Some("message")) {
            return Err(LineParserError::MissingMessageGroup);
        }
        Ok(Self { pattern })
    }

    /// Returns `None` for lines that are not error lines.
    pub fn parse(&self, line: &str) -> Option<ErrorLine> {
        let captures = self.pattern.captures(line.trim_end())?;
        let message = captures.name("message")?.as_str().trim();
        if message.is_empty() {
            return None;
        }

        let (cause, file_path) = split_media_path(message);
        Some(ErrorLine {
            message: message.to_string(),
            cause,
            file_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_line_pattern;
    use std::path::Path;

    fn parser() -> LineParser {
        LineParser::new(&default_line_pattern()).unwrap()
    }

    #[test]
    fn parses_bazarr_error_line() {
        let line = "2024-03-01 10:00:01,123 - root (7f2a) :  ERROR (get_video_info:88) - BAZARR ffprobe cannot analyze this video file. Could it be corrupted? /movies/Heat (1995)/Heat.mkv\n";
        let parsed = parser().parse(line).unwrap();

        assert_eq!(
            parsed.message,
            "ffprobe cannot analyze this video file. Could it be corrupted? /movies/Heat (1995)/Heat.mkv"
        );
        assert_eq!(
            parsed.cause,
            "ffprobe cannot analyze this video file. Could it be corrupted?"
        );
        assert_eq!(parsed.file_path.as_deref(), Some(Path::new("/movies/Heat (1995)/Heat.mkv")));
    }

    #[test]
    fn non_error_lines_are_ignored() {
        let p = parser();
        assert!(p.parse("2024-03-01 10:00:01,123 - root :  INFO (x:1) - BAZARR started").is_none());
        assert!(p.parse("").is_none());
        assert!(p.parse("ERROR (x:1) - BAZARR ").is_none());
    }

    #[test]
    fn errors_without_path() {
        let parsed = parser()
            .parse("x :  ERROR (sync:12) - BAZARR Error trying to get series from Sonarr. Timeout")
            .unwrap();
        assert!(parsed.file_path.is_none());
        assert_eq!(parsed.cause, parsed.message);
    }

    #[test]
    fn custom_pattern() {
        let p = LineParser::new(r"^\[error\] (?P<message>.*)$").unwrap();
        let parsed = p.parse("[error] broken /data/a.mp4").unwrap();
        assert_eq!(parsed.file_path.as_deref(), Some(Path::new("/data/a.mp4")));
    }

    #[test]
    fn pattern_needs_message_group() {
        assert!(matches!(
            LineParser::new("ERROR (.*)"),
            Err(LineParserError::MissingMessageGroup)
        ));
        assert!(matches!(LineParser::new("("), Err(LineParserError::Pattern(_))));
    }
}
