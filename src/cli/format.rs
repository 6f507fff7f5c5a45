//! Output formatting utilities for CLI commands.
//!
//! Provides a unified `OutputFormat` enum plus the small helpers every
//! listing uses for ids and timestamps.

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use uuid::Uuid;

/// Output format options for CLI commands.
///
/// - `Text` for human-readable terminal output (default)
/// - `Json` for machine-readable output and scripting
/// - `Markdown` for copy-paste into notes and issues
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output (default).
    #[default]
    Text,
    /// Machine-readable JSON output.
    Json,
    /// Markdown-formatted output (for the show command).
    Markdown,
}

/// First eight characters of an id.
pub fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Epoch milliseconds as a UTC timestamp.
pub fn datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

/// Epoch milliseconds as `YYYY-MM-DD HH:MM`.
pub fn format_timestamp(millis: i64) -> String {
    datetime(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// How long ago `millis` was, relative to `now`.
pub fn format_relative(millis: i64, now: DateTime<Utc>) -> String {
    let Some(then) = datetime(millis) else {
        return "-".to_string();
    };
    let minutes = now.signed_duration_since(then).num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if minutes < 60 * 24 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / (60 * 24))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(
            OutputFormat::from_str("json", false).unwrap(),
            OutputFormat::Json
        );
        assert_eq!(
            OutputFormat::from_str("markdown", false).unwrap(),
            OutputFormat::Markdown
        );
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::parse_str("1b4e28ba-2fa1-11d2-883f-0016d3cca427").unwrap();
        assert_eq!(short_id(&id), "1b4e28ba");
    }

    #[test]
    fn test_format_relative() {
        let now = Utc::now();
        let at = |d: Duration| (now - d).timestamp_millis();
        assert_eq!(format_relative(at(Duration::seconds(10)), now), "just now");
        assert_eq!(format_relative(at(Duration::minutes(5)), now), "5m ago");
        assert_eq!(format_relative(at(Duration::hours(3)), now), "3h ago");
        assert_eq!(format_relative(at(Duration::days(2)), now), "2d ago");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00");
    }
}
