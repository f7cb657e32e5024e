//! Command-line parsing.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{Config, ExclusionRules, WatchTarget, DEFAULT_EXCLUDE};

#[derive(Debug, Parser)]
#[command(
    name = "logmux",
    about = "Tails log files and directories into one leveled JSON stream",
    version
)]
pub struct Cli {
    /// Use polling instead of native filesystem notifications
    #[arg(long)]
    pub poll: bool,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100)]
    pub poll_interval: u64,

    /// Keep only lines that are JSON objects
    #[arg(long)]
    pub json: bool,

    /// Minimum level rank to emit (1 debug, 2 info, 3 notice, 4 warning, 5 error, 6 fatal)
    #[arg(
        long,
        alias = "minlevel",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=6)
    )]
    pub min_level: u8,

    /// Pipe-separated substrings; discovered files whose path contains any of them are skipped
    #[arg(long, default_value = DEFAULT_EXCLUDE)]
    pub exclude: String,

    /// Increase diagnostic verbosity on stderr (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Absolute paths of files to tail and directories to watch
    pub paths: Vec<PathBuf>,
}

impl Cli {
    /// Builds the runtime configuration. Relative paths are skipped with a
    /// warning.
    pub fn into_config(self) -> Config {
        let targets = self
            .paths
            .iter()
            .filter(|path| {
                let absolute = path.is_absolute();
                if !absolute {
                    tracing::warn!(path = %path.display(), "Ignoring relative path");
                }
                absolute
            })
            .map(WatchTarget::classify)
            .collect();

        Config {
            poll: self.poll,
            poll_interval: Duration::from_millis(self.poll_interval),
            json_only: self.json,
            min_level: self.min_level,
            exclude: ExclusionRules::parse(&self.exclude),
            targets,
        }
    }
}

/// Outcome of [`parse_args`].
#[derive(Debug)]
pub struct Parsed {
    pub config: Config,
    pub verbose: u8,
    /// Set when the flags were malformed and defaults were used instead.
    pub error: Option<clap::Error>,
}

/// Parses `args` (including the program name).
///
/// Malformed flags do not abort: all flags fall back to their defaults and
/// every absolute-path argument is taken as a target. The parse error is
/// returned alongside so the caller can report it once logging is up.
pub fn parse_args<I, T>(args: I) -> Parsed
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let args: Vec<OsString> = args.into_iter().map(Into::into).collect();

    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            let verbose = cli.verbose;
            Parsed {
                config: cli.into_config(),
                verbose,
                error: None,
            }
        }
        Err(error) => {
            let targets = args
                .iter()
                .skip(1)
                .map(PathBuf::from)
                .filter(|path| path.is_absolute())
                .map(WatchTarget::classify)
                .collect();

            Parsed {
                config: Config {
                    targets,
                    ..Config::default()
                },
                verbose: 0,
                error: Some(error),
            }
        }
    }
}
