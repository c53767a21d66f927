use std::fmt;

use nix;
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::errors::ShellError;

/// Ordered so that the state of a job is the minimum over its processes.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum State { Running, Stopped, Done }

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ProcessStatus {
	Running,
	Stopped(Signal),
	Exited(i32),
	Signaled(Signal),
}

impl ProcessStatus {
	pub fn state(self) -> State {
		match self {
			ProcessStatus::Running => State::Running,
			ProcessStatus::Stopped(..) => State::Stopped,
			ProcessStatus::Exited(..) | ProcessStatus::Signaled(..) => State::Done,
		}
	}

	/// Shell-style status code: the exit code, or 128 + signal number.
	pub fn code(self) -> i32 {
		match self {
			ProcessStatus::Running => 0,
			ProcessStatus::Exited(code) => code,
			ProcessStatus::Stopped(sig) | ProcessStatus::Signaled(sig) => 128 + sig as i32,
		}
	}
}

pub trait WaitStatusExt {
	fn process_status(self) -> Option<ProcessStatus>;
}

impl WaitStatusExt for WaitStatus {
	fn process_status(self) -> Option<ProcessStatus> {
		match self {
			WaitStatus::Exited(_, code) => Some(ProcessStatus::Exited(code)),
			WaitStatus::Signaled(_, sig, _) => Some(ProcessStatus::Signaled(sig)),
			WaitStatus::Stopped(_, sig) => Some(ProcessStatus::Stopped(sig)),
			WaitStatus::Continued(_) => Some(ProcessStatus::Running),
			_ => None,
		}
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Process {
	pub pid: Pid,
	pub status: ProcessStatus,
}

#[derive(Debug)]
pub struct Job {
	pub pgid: Pid,
	pub processes: Vec<Process>,
	pub text: String,
	pub background: bool,
}

impl Job {
	#[cfg(test)]
	pub fn new(pgid: Pid, pids: &[Pid], text: String, background: bool) -> Job {
		let processes = pids.iter().map(|&pid| Process { pid: pid, status: ProcessStatus::Running }).collect();
		Job { pgid: pgid, processes: processes, text: text, background: background }
	}

	pub fn state(&self) -> State {
		self.processes.iter().map(|pr| pr.status.state()).min().unwrap_or(State::Done)
	}

	pub fn leader(&self) -> Pid {
		self.processes.first().map_or(self.pgid, |pr| pr.pid)
	}

	/// Status of the last stage, which stands for the whole pipeline.
	pub fn last_status(&self) -> ProcessStatus {
		self.processes.last().map_or(ProcessStatus::Exited(0), |pr| pr.status)
	}

	pub fn contains(&self, pid: Pid) -> bool {
		self.processes.iter().any(|pr| pr.pid == pid)
	}

	fn record(&mut self, pid: Pid, status: ProcessStatus) -> bool {
		match self.processes.iter_mut().find(|pr| pr.pid == pid) {
			Some(pr) => {
				pr.status = status;
				true
			},
			None => false,
		}
	}

	/// Blocks until every stage has exited or one of them stopped. Only
	/// members of this job's process group are collected.
	pub fn wait(&mut self) -> nix::Result<()> {
		let group = Pid::from_raw(-self.pgid.as_raw());
		while self.state() == State::Running {
			match wait::waitpid(group, Some(WaitPidFlag::WUNTRACED)) {
				Ok(status) => {
					if let (Some(pid), Some(st)) = (status.pid(), status.process_status()) {
						debug!(pid = pid.as_raw(), ?st, "foreground member changed state");
						self.record(pid, st);
					}
				},
				Err(Errno::EINTR) => {},
				Err(Errno::ECHILD) => {
					warn!(pgid = self.pgid.as_raw(), "foreground group vanished before all stages were collected");
					break;
				},
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}
}

#[derive(Debug)]
pub struct JobBuilder {
	imp: Job,
}

impl JobBuilder {
	pub fn new(size_hint: usize, text: String, background: bool) -> JobBuilder {
		JobBuilder {
			imp: Job { pgid: Pid::from_raw(0), processes: Vec::with_capacity(size_hint), text: text, background: background }
		}
	}

	pub fn is_empty(&self) -> bool {
		self.imp.processes.is_empty()
	}

	pub fn pgid(&self) -> Pid {
		self.imp.pgid
	}

	/// Forks one stage into the job's process group, which the first stage leads.
	/// Both sides call `setpgid` so neither can observe the child outside it.
	pub fn push_fork(&mut self) -> nix::Result<unistd::ForkResult> {
		let job = &mut self.imp;

		let r = unsafe { unistd::fork()? };
		match r {
			unistd::ForkResult::Parent{ child: pid } => {
				if job.pgid.as_raw() == 0 {
					job.pgid = pid;
				}
				// EACCES once the child has exec'd; it already joined the group by then.
				let _ = unistd::setpgid(pid, job.pgid);
				job.processes.push(Process { pid: pid, status: ProcessStatus::Running });
			},
			unistd::ForkResult::Child => {
				let _ = unistd::setpgid(Pid::from_raw(0), job.pgid);
			},
		}
		Ok(r)
	}

	pub fn build(self) -> Job {
		self.imp
	}
}

/// Something worth telling the user about a tracked job.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct JobEvent {
	pub id: usize,
	pub text: String,
	pub status: ProcessStatus,
}

impl fmt::Display for JobEvent {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let what = match self.status {
			ProcessStatus::Running => "Running".to_string(),
			ProcessStatus::Stopped(..) => "Stopped".to_string(),
			ProcessStatus::Exited(0) => "Done".to_string(),
			ProcessStatus::Exited(code) => format!("Exit {}", code),
			ProcessStatus::Signaled(sig) => sig.as_str().to_string(),
		};
		write!(f, "[{}]  {:<9} {}", self.id, what, self.text)
	}
}

/// Returned by `JobTable::add` when every slot is taken. Hands the job back so
/// the caller can keep driving it untracked.
#[derive(Debug)]
pub struct TableFull {
	pub capacity: usize,
	pub job: Job,
}

impl<'a> From<&'a TableFull> for ShellError {
	fn from(full: &'a TableFull) -> ShellError {
		ShellError::JobTableFull(full.capacity)
	}
}

/// Jobs indexed by id; id `n` lives in slot `n - 1`.
#[derive(Debug)]
pub struct JobTable {
	jobs: Vec<Option<Job>>,
	capacity: usize,
	events: Vec<JobEvent>,
}

impl JobTable {
	pub fn new(capacity: usize) -> JobTable {
		JobTable { jobs: vec![], capacity: capacity, events: vec![] }
	}

	pub fn len(&self) -> usize {
		self.jobs.iter().filter(|o| o.is_some()).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn get(&self, id: usize) -> Option<&Job> {
		id.checked_sub(1).and_then(|i| self.jobs.get(i)).and_then(|o| o.as_ref())
	}

	pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
		match id.checked_sub(1) {
			Some(i) => self.jobs.get_mut(i).and_then(|o| o.as_mut()),
			None => None,
		}
	}

	pub fn find_by_pid(&self, pid: Pid) -> Option<usize> {
		self.iter().find(|&(_, job)| job.contains(pid)).map(|(id, _)| id)
	}

	pub fn iter(&self) -> impl Iterator<Item = (usize, &Job)> {
		self.jobs.iter().enumerate().filter_map(|(i, o)| o.as_ref().map(|job| (i + 1, job)))
	}

	/// Stores a job under the lowest free id.
	pub fn add(&mut self, job: Job) -> Result<usize, TableFull> {
		let jobs = &mut self.jobs;
		if let Some((i, space)) = jobs.iter_mut().enumerate().find(|(_, o)| o.is_none()) {
			*space = Some(job);
			return Ok(i + 1);
		}
		if jobs.len() >= self.capacity {
			return Err(TableFull { capacity: self.capacity, job: job });
		}
		jobs.push(Some(job));
		Ok(jobs.len())
	}

	pub fn remove(&mut self, id: usize) -> Option<Job> {
		let job = id.checked_sub(1).and_then(|i| self.jobs.get_mut(i)).and_then(|o| o.take());
		let len = self.jobs.iter().rposition(|o| o.is_some()).map_or(0, |i| i + 1);
		self.jobs.truncate(len);
		job
	}

	/// Applies a status reported by `waitpid`. A job whose processes are all
	/// done is removed, with a notification if it ran in the background; a job
	/// that becomes stopped is announced and kept. Returns the job's id.
	pub fn update(&mut self, status: WaitStatus) -> Option<usize> {
		let (pid, st) = match (status.pid(), status.process_status()) {
			(Some(pid), Some(st)) => (pid, st),
			_ => return None,
		};
		let id = match self.find_by_pid(pid) {
			Some(id) => id,
			None => {
				debug!(pid = pid.as_raw(), ?st, "reaped untracked child");
				return None;
			},
		};
		let job = self.get_mut(id)?;
		let before = job.state();
		job.record(pid, st);
		let after = job.state();
		if before == after {
			return Some(id);
		}
		match after {
			State::Done => {
				let announce = job.background;
				let event = JobEvent { id: id, text: job.text.clone(), status: job.last_status() };
				self.remove(id);
				if announce {
					self.events.push(event);
				}
			},
			State::Stopped => {
				job.background = true;
				let status = job.processes.iter().rev().find(|pr| pr.status.state() == State::Stopped).map_or(st, |pr| pr.status);
				let event = JobEvent { id: id, text: job.text.clone(), status: status };
				self.events.push(event);
			},
			State::Running => {},
		}
		Some(id)
	}

	/// Settles a foreground job after `Job::wait` returned. A finished job is
	/// dropped silently; a stopped one is announced and kept.
	pub fn finish_foreground(&mut self, id: usize) {
		let job = match self.get_mut(id) {
			Some(job) => job,
			None => return,
		};
		match job.state() {
			State::Done => { self.remove(id); },
			State::Stopped => {
				job.background = true;
				let event = JobEvent { id: id, text: job.text.clone(), status: job.last_status() };
				self.events.push(event);
			},
			State::Running => {
				debug!(id = id, "foreground job left earlier stages running");
			},
		}
	}

	/// Collects every child that has already changed state, without blocking.
	pub fn reap_all(&mut self) -> usize {
		let mut reaped = 0;
		loop {
			match wait::waitpid(None, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
				Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => { break; },
				Ok(status) => {
					reaped += 1;
					self.update(status);
				},
				Err(Errno::EINTR) => {},
				Err(e) => {
					warn!(error = %e, "waitpid failed while reaping");
					break;
				},
			}
		}
		reaped
	}

	pub fn take_events(&mut self) -> Vec<JobEvent> {
		std::mem::replace(&mut self.events, vec![])
	}
}
