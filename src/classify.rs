//! Keyword-based severity detection for log lines.

use std::cmp::Ordering;
use std::fmt;

/// Coarse severity attached to a classified line.
///
/// Ordering follows [`Level::rank`], which places `Info` (2) below `Notice`
/// (3).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Level {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Fatal,
    Unknown,
}

/// Keyword groups in the order they are checked. The first group with a
/// matching keyword decides the level.
const KEYWORDS: &[(Level, &[&str])] = &[
    (Level::Debug, &["debug"]),
    (
        Level::Info,
        &[
            "info",
            "log",
            "get",
            "post",
            "processing",
            "starting",
            "started",
            "completed",
            "success",
            "saving",
            "saved",
            "creating",
            "created",
        ],
    ),
    (Level::Notice, &["notice"]),
    (Level::Warning, &["warn"]),
    (Level::Error, &["error", "failed"]),
    (Level::Fatal, &["fatal", "emerg"]),
];

impl Level {
    /// Numeric rank compared against the minimum level threshold.
    pub fn rank(self) -> u8 {
        match self {
            Level::Debug => 1,
            Level::Info => 2,
            Level::Notice => 3,
            Level::Warning => 4,
            Level::Error => 5,
            Level::Fatal => 6,
            Level::Unknown => 100,
        }
    }

    /// Label written to the `level` field of an output record.
    pub fn label(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Unknown => "unknown",
        }
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifies `message` by case-insensitive keyword match.
pub fn classify(message: &str) -> Level {
    let message = message.to_lowercase();

    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|word| message.contains(word)))
        .map_or(Level::Unknown, |(level, _)| *level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_matching_group_wins() {
        assert_eq!(classify("info error"), Level::Info);
        assert_eq!(classify("debug: request failed"), Level::Debug);
        assert_eq!(classify("warn: fatal disk state"), Level::Warning);
    }

    #[test]
    fn test_keywords_per_level() {
        assert_eq!(classify("DEBUG cache miss"), Level::Debug);
        assert_eq!(classify("Starting service"), Level::Info);
        assert_eq!(classify("GET /index.html 200"), Level::Info);
        assert_eq!(classify("NOTICE: quota at 80%"), Level::Notice);
        assert_eq!(classify("Warning: deprecated option"), Level::Warning);
        assert_eq!(classify("connection FAILED"), Level::Error);
        assert_eq!(classify("EMERG kernel panic"), Level::Fatal);
    }

    #[test]
    fn test_unknown() {
        let level = classify("nothing to see here");
        assert_eq!(level, Level::Unknown);
        assert_eq!(level.rank(), 100);
        assert_eq!(level.label(), "unknown");
    }

    #[test]
    fn test_notice_ranks_above_info() {
        // Kept as found: notice (3) is treated as more severe than info (2),
        // unlike syslog where info is the less important of the two.
        assert!(Level::Notice > Level::Info);
        assert!(Level::Info > Level::Debug);
        assert!(Level::Warning > Level::Notice);
        assert!(Level::Unknown > Level::Fatal);
    }

    #[test]
    fn test_display_uses_label() {
        assert_eq!(Level::Warning.to_string(), "warning");
        assert_eq!(Level::Fatal.to_string(), "fatal");
    }
}
