//! Runtime configuration, independent of how it was obtained.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::events::{WatchMode, DEFAULT_POLL_INTERVAL};
use crate::format::Pipeline;

/// Exclusion list used when none is given.
pub const DEFAULT_EXCLUDE: &str = "sasl|config|lock|@|gzip|tgz|gz";

/// Substrings that keep a discovered path from being tailed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExclusionRules {
    substrings: Vec<String>,
}

impl ExclusionRules {
    /// Parses a pipe-separated list. Empty entries are ignored, since they
    /// would match every path.
    pub fn parse(list: &str) -> Self {
        let substrings = list
            .split('|')
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();

        ExclusionRules { substrings }
    }

    /// Whether the full string form of `path` contains any of the rules.
    pub fn excludes(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.substrings.iter().any(|s| path.contains(s.as_str()))
    }

    pub fn substrings(&self) -> &[String] {
        &self.substrings
    }
}

/// Something named on the command line.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchTarget {
    /// A file tailed from startup.
    File(PathBuf),
    /// A directory watched recursively for files to tail.
    Directory(PathBuf),
}

impl WatchTarget {
    /// Existing directories become [`WatchTarget::Directory`]; everything
    /// else, including paths that do not exist, is a file.
    pub fn classify(path: impl AsRef<Path>) -> Self {
        let path = normalize(path.as_ref());
        if path.is_dir() {
            WatchTarget::Directory(path)
        } else {
            WatchTarget::File(path)
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            WatchTarget::File(path) | WatchTarget::Directory(path) => path,
        }
    }
}

/// Everything the daemon needs to run.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub poll: bool,
    pub poll_interval: Duration,
    pub json_only: bool,
    pub min_level: u8,
    pub exclude: ExclusionRules,
    pub targets: Vec<WatchTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            json_only: false,
            min_level: 0,
            exclude: ExclusionRules::parse(DEFAULT_EXCLUDE),
            targets: Vec::new(),
        }
    }
}

impl Config {
    pub fn watch_mode(&self) -> WatchMode {
        if self.poll {
            WatchMode::Poll(self.poll_interval)
        } else {
            WatchMode::Notify
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(self.json_only, self.min_level)
    }

    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.targets.iter().filter_map(|target| match target {
            WatchTarget::File(path) => Some(path.as_path()),
            WatchTarget::Directory(_) => None,
        })
    }

    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.targets.iter().filter_map(|target| match target {
            WatchTarget::Directory(path) => Some(path.as_path()),
            WatchTarget::File(_) => None,
        })
    }
}

/// Lexically cleans `path`: repeated separators and `.` components are
/// dropped. Symlinks are left alone so rotation of a linked file is seen at
/// the name the user gave.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
