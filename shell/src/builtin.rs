use nix::unistd;

use crate::errors::{Result, ShellError};
use crate::global;

/// What the main loop does after a builtin ran.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Flow { Continue, Exit }

pub type Builtin = fn(&mut global::State, &[&str]) -> Result<Flow>;

pub fn builtin_exit(_: &mut global::State, _: &[&str]) -> Result<Flow> {
	Ok(Flow::Exit)
}

pub fn builtin_cd(_: &mut global::State, args: &[&str]) -> Result<Flow> {
	let path = match args.first() {
		Some(&path) => path,
		None => return Err(ShellError::MissingArgument),
	};
	unistd::chdir(path).map_err(|e| ShellError::DirectoryChangeFailed { path: path.to_string(), source: e })?;
	Ok(Flow::Continue)
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"exit" => Some(builtin_exit),
		_ => None,
	}
}
