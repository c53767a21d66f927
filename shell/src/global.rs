use std::io::{self, IsTerminal};
use std::path::PathBuf;

use nix::unistd::{self, Pid};

use crate::job;

pub const DEFAULT_PROMPT: &str = "\x1b[1;32mtsh$ \x1b[0m";
pub const DEFAULT_MAX_JOBS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
	pub prompt: String,
	pub max_jobs: usize,
	pub history_file: Option<PathBuf>,
}

impl Default for Config {
	fn default() -> Config {
		Config { prompt: DEFAULT_PROMPT.to_string(), max_jobs: DEFAULT_MAX_JOBS, history_file: None }
	}
}

pub struct State {
	pub config: Config,
	pub job_table: job::JobTable,
	/// Standard input is a terminal, so foreground jobs get handed the terminal.
	pub interactive: bool,
	pub shell_pgid: Pid,
}

impl State {
	pub fn new(config: Config) -> State {
		let job_table = job::JobTable::new(config.max_jobs.max(1));
		let interactive = io::stdin().is_terminal();
		State { config: config, job_table: job_table, interactive: interactive, shell_pgid: unistd::getpgrp() }
	}
}
