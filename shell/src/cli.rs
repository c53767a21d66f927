//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::global::{Config, DEFAULT_MAX_JOBS, DEFAULT_PROMPT};

#[derive(Debug, Clone, Parser)]
#[command(
	name = "tsh",
	version,
	about = "A small interactive shell with pipes, redirection and background jobs.",
	long_about = None
)]
pub struct CliArgs {
	/// Prompt shown before each line.
	#[arg(long, value_name = "TEXT")]
	pub prompt: Option<String>,

	/// Most jobs tracked at once; further jobs run untracked.
	#[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_JOBS)]
	pub max_jobs: usize,

	/// Load line history from this file and save it on exit.
	#[arg(long, value_name = "PATH")]
	pub history_file: Option<PathBuf>,

	/// Logging level (error, warn, info, debug, trace).
	///
	/// If omitted, `TSH_LOG` or `warn` is used.
	#[arg(long, value_enum, value_name = "LEVEL")]
	pub log_level: Option<LogLevel>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
	Error,
	Warn,
	Info,
	Debug,
	Trace,
}

impl<'a> From<&'a CliArgs> for Config {
	fn from(args: &'a CliArgs) -> Config {
		Config {
			prompt: args.prompt.clone().unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
			max_jobs: args.max_jobs.max(1),
			history_file: args.history_file.clone(),
		}
	}
}

pub fn parse() -> CliArgs {
	CliArgs::parse()
}
