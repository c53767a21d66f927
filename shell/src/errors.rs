//! Error conditions reported by the shell. None of them ends the shell
//! process; only `exit` or end-of-input does.

use std::{ffi, io};

use nix::errno::Errno;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
	#[error("malformed pipeline: {0}")]
	MalformedPipeline(String),

	#[error("too many arguments (limit is {0})")]
	TooManyArguments(usize),

	#[error("cd: missing argument")]
	MissingArgument,

	#[error("cd: {path}: {source}")]
	DirectoryChangeFailed {
		path: String,
		#[source]
		source: Errno,
	},

	#[error("{command}: spawn failed: {source}")]
	SpawnFailed {
		command: String,
		#[source]
		source: Errno,
	},

	#[error("{command}: execution failed: {source}")]
	ExecutionFailed {
		command: String,
		#[source]
		source: Errno,
	},

	#[error("job table full ({0} jobs), process left untracked")]
	JobTableFull(usize),

	#[error("Nix error: {0}")]
	NixError(#[from] nix::Error),

	#[error("IO error: {0}")]
	IoError(#[from] io::Error),

	#[error("Nul char error: {0}")]
	NulError(#[from] ffi::NulError),
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Prints a condition for the user on standard error.
pub fn report(err: &ShellError) {
	eprintln!("tsh: {}", err);
}
