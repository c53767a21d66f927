use std::ffi::{CStr, CString};
use std::os::unix::io::{AsRawFd, BorrowedFd, OwnedFd, RawFd};

use libc;
use nix;
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{self, Pid};
use tracing::{debug, info, warn};

use crate::builtin::{self, Flow};
use crate::errors::{report, Result, ShellError};
use crate::global;
use crate::job::{self, Job, JobBuilder};
use crate::signal;
use crate::types::{Command, Pipeline};

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EvalResult {
	/// Foreground pipeline or builtin finished (or stopped) with this status.
	Done(i32),
	/// Background pipeline started; `id` is `None` when the table was full.
	Background { id: Option<usize>, pid: Pid },
	Exit,
}

/// A command converted to what `execvp` and `open` need, built before forking.
#[derive(Debug)]
struct Stage {
	name: String,
	argv: Vec<CString>,
	input: Option<CString>,
	output: Option<CString>,
}

impl Stage {
	fn prepare(command: &Command) -> Result<Stage> {
		let argv = command.argv.iter().map(|&s| CString::new(s)).collect::<std::result::Result<Vec<_>, _>>()?;
		let input = match command.input {
			Some(path) => Some(CString::new(path)?),
			None => None,
		};
		let output = match command.output {
			Some(path) => Some(CString::new(path)?),
			None => None,
		};
		Ok(Stage { name: command.name().to_string(), argv: argv, input: input, output: output })
	}
}

/// Descriptors a child installs on fd 0 and 1, and the pipe end it must drop.
#[derive(Debug, Clone, Copy)]
struct Wiring {
	stdin: Option<RawFd>,
	stdout: Option<RawFd>,
	unused: Option<RawFd>,
	take_terminal: bool,
}

fn terminal() -> BorrowedFd<'static> {
	// fd 0 stays open for the life of the process.
	unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) }
}

fn child_fail(msg: &str) {
	let line = format!("tsh: {}\n", msg);
	unsafe { libc::write(libc::STDERR_FILENO, line.as_ptr() as *const libc::c_void, line.len()); }
}

fn redirect(path: &CStr, flags: OFlag, target: RawFd) -> nix::Result<()> {
	let fd = fcntl::open(path, flags, Mode::from_bits_truncate(0o644))?;
	if fd != target {
		unistd::dup2(fd, target)?;
		unistd::close(fd)?;
	}
	Ok(())
}

fn wire(wiring: &Wiring) -> nix::Result<()> {
	if let Some(fd) = wiring.unused {
		unistd::close(fd)?;
	}
	if let Some(fd) = wiring.stdin {
		unistd::dup2(fd, libc::STDIN_FILENO)?;
		unistd::close(fd)?;
	}
	if let Some(fd) = wiring.stdout {
		unistd::dup2(fd, libc::STDOUT_FILENO)?;
		unistd::close(fd)?;
	}
	Ok(())
}

fn do_exec_command(stage: &Stage, wiring: &Wiring) -> i32 {
	if let Err(e) = wire(wiring) {
		child_fail(&format!("{}: cannot wire pipe: {}", stage.name, e));
		return 1;
	}
	// Applied after the pipes so that an explicit redirection wins.
	if let Some(ref path) = stage.input {
		if let Err(e) = redirect(path, OFlag::O_RDONLY, libc::STDIN_FILENO) {
			child_fail(&format!("{}: {}", path.to_string_lossy(), e.desc()));
			return 1;
		}
	}
	if let Some(ref path) = stage.output {
		if let Err(e) = redirect(path, OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, libc::STDOUT_FILENO) {
			child_fail(&format!("{}: {}", path.to_string_lossy(), e.desc()));
			return 1;
		}
	}
	let e = match unistd::execvp(&stage.argv[0], &stage.argv) {
		Ok(never) => match never {},
		Err(e) => e,
	};
	child_fail(&ShellError::ExecutionFailed { command: stage.name.clone(), source: e }.to_string());
	match e {
		Errno::ENOENT => 127,
		_ => 126,
	}
}

fn exec_command(stage: &Stage, wiring: &Wiring) -> ! {
	if wiring.take_terminal {
		let _ = unistd::tcsetpgrp(terminal(), unistd::getpgrp());
	}
	signal::reset_for_child();
	let s = do_exec_command(stage, wiring);
	unsafe { libc::_exit(s) }
}

fn spawn_failed(stage: &Stage, e: Errno) -> ShellError {
	ShellError::SpawnFailed { command: stage.name.clone(), source: e }
}

/// Forks the stages front to back. On failure the stages already running are
/// left alone and the error names the stage that could not be started.
fn spawn_commands(state: &global::State, stages: &[Stage], is_background: bool,
                  job_builder: &mut JobBuilder) -> Result<()> {
	let mut prev_read: Option<OwnedFd> = None;
	for (i, stage) in stages.iter().enumerate() {
		let is_last = i + 1 == stages.len();
		let pipe = if is_last {
			None
		} else {
			Some(unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| spawn_failed(stage, e))?)
		};
		let wiring = Wiring {
			stdin: prev_read.as_ref().map(|fd| fd.as_raw_fd()),
			stdout: pipe.as_ref().map(|(_, write)| write.as_raw_fd()),
			unused: pipe.as_ref().map(|(read, _)| read.as_raw_fd()),
			take_terminal: state.interactive && !is_background,
		};
		match job_builder.push_fork().map_err(|e| spawn_failed(stage, e))? {
			unistd::ForkResult::Parent{ child } => {
				debug!(pid = child.as_raw(), pgid = job_builder.pgid().as_raw(), stage = i, command = %stage.name, "spawned");
			},
			unistd::ForkResult::Child => {
				exec_command(stage, &wiring);
			},
		}
		// The parent keeps only the read end feeding the next stage.
		prev_read = pipe.map(|(read, write)| {
			drop(write);
			read
		});
	}
	Ok(())
}

fn track(state: &mut global::State, job: Job) -> Option<usize> {
	match state.job_table.add(job) {
		Ok(id) => Some(id),
		Err(full) => {
			report(&ShellError::from(&full));
			None
		},
	}
}

/// Keeps the stages that did start after a spawn failure, as a background job
/// so they are reaped and announced like any other.
fn track_partial(state: &mut global::State, job_builder: JobBuilder) -> Option<usize> {
	if job_builder.is_empty() {
		return None;
	}
	let mut job = job_builder.build();
	job.background = true;
	warn!(pgid = job.pgid.as_raw(), "tracking partially spawned pipeline in the background");
	track(state, job)
}

/// Gives the terminal to a process group and takes it back when dropped.
struct TerminalHandoff {
	shell_pgid: Pid,
}

impl TerminalHandoff {
	fn give(state: &global::State, pgid: Pid) -> Option<TerminalHandoff> {
		if !state.interactive {
			return None;
		}
		match unistd::tcsetpgrp(terminal(), pgid) {
			Ok(()) => Some(TerminalHandoff { shell_pgid: state.shell_pgid }),
			Err(e) => {
				warn!(error = %e, "could not hand the terminal to the foreground job");
				None
			},
		}
	}
}

impl Drop for TerminalHandoff {
	fn drop(&mut self) {
		if let Err(e) = unistd::tcsetpgrp(terminal(), self.shell_pgid) {
			warn!(error = %e, "could not take the terminal back");
		}
	}
}

fn wait_foreground(state: &mut global::State, job: Job) -> Result<EvalResult> {
	let _fg = signal::Foreground::set(job.pgid);
	let _terminal = TerminalHandoff::give(state, job.pgid);
	let status = match state.job_table.add(job) {
		Ok(id) => {
			let status = match state.job_table.get_mut(id) {
				Some(job) => {
					job.wait()?;
					job.last_status()
				},
				None => job::ProcessStatus::Exited(0),
			};
			state.job_table.finish_foreground(id);
			status
		},
		Err(full) => {
			report(&ShellError::from(&full));
			let mut job = full.job;
			job.wait()?;
			job.last_status()
		},
	};
	debug!(?status, "foreground pipeline returned");
	Ok(EvalResult::Done(status.code()))
}

/// Runs one parsed line. Builtins are recognized only as the sole command.
pub fn eval(state: &mut global::State, pipeline: &Pipeline) -> Result<EvalResult> {
	let commands = &pipeline.commands;
	if commands.is_empty() {
		return Err(ShellError::MalformedPipeline("empty pipeline".to_string()));
	}
	if commands.iter().any(|c| c.argv.is_empty()) {
		return Err(ShellError::MalformedPipeline("empty command".to_string()));
	}

	if commands.len() == 1 {
		if let Some(func) = builtin::match_builtin(commands[0].name()) {
			return match func(state, commands[0].arguments())? {
				Flow::Continue => Ok(EvalResult::Done(0)),
				Flow::Exit => Ok(EvalResult::Exit),
			};
		}
	}

	let stages = commands.iter().map(Stage::prepare).collect::<Result<Vec<Stage>>>()?;
	let mut job_builder = JobBuilder::new(stages.len(), pipeline.to_string(), pipeline.is_background);
	if let Err(e) = spawn_commands(state, &stages, pipeline.is_background, &mut job_builder) {
		track_partial(state, job_builder);
		return Err(e);
	}

	let job = job_builder.build();
	info!(pgid = job.pgid.as_raw(), background = pipeline.is_background, text = %job.text, "pipeline started");
	if pipeline.is_background {
		let pid = job.leader();
		let id = track(state, job);
		Ok(EvalResult::Background { id: id, pid: pid })
	} else {
		wait_foreground(state, job)
	}
}
