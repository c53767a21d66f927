//! Routing of terminal signals.
//!
//! Handlers only touch the atomics below and call `kill(2)` or `waitpid(2)`.
//! Everything that allocates or prints (job table updates, notifications) runs
//! in the main loop after it observes `take_child_event` or `take_reaped`.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize, Ordering};

use libc;
use nix;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use tracing::debug;

/// Process group of the pipeline the shell is waiting on, 0 when none.
static FOREGROUND: AtomicI32 = AtomicI32::new(0);
static CHILD_EVENT: AtomicBool = AtomicBool::new(false);

/// Set while the main loop sits at the prompt; the SIGCHLD handler reaps then.
static IDLE_REAP: AtomicBool = AtomicBool::new(false);
static REAP_LOCK: AtomicBool = AtomicBool::new(false);

const QUEUE_LEN: usize = 64;
const EMPTY_SLOT: AtomicU64 = AtomicU64::new(0);
/// Statuses reaped by the handler, packed as `pid << 32 | raw status`.
static REAPED: [AtomicU64; QUEUE_LEN] = [EMPTY_SLOT; QUEUE_LEN];
static REAPED_LEN: AtomicUsize = AtomicUsize::new(0);

extern "C" fn forward_to_foreground(signo: libc::c_int) {
	let pgid = FOREGROUND.load(Ordering::SeqCst);
	if pgid > 0 {
		unsafe { libc::kill(-pgid, signo); }
	}
}

/// Collects exited or stopped children into `REAPED` until none is left or the
/// queue is full. Whatever it leaves behind is reaped later by the main loop.
fn reap_into_queue() {
	if REAP_LOCK.swap(true, Ordering::Acquire) {
		return;
	}
	loop {
		let len = REAPED_LEN.load(Ordering::Relaxed);
		if len == QUEUE_LEN {
			break;
		}
		let mut status: libc::c_int = 0;
		let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG | libc::WUNTRACED) };
		if pid <= 0 {
			break;
		}
		let packed = ((pid as u32 as u64) << 32) | status as u32 as u64;
		REAPED[len].store(packed, Ordering::Relaxed);
		REAPED_LEN.store(len + 1, Ordering::Relaxed);
	}
	REAP_LOCK.store(false, Ordering::Release);
}

extern "C" fn note_child_event(_: libc::c_int) {
	CHILD_EVENT.store(true, Ordering::SeqCst);
	if IDLE_REAP.load(Ordering::SeqCst) {
		let errno = Errno::last_raw();
		reap_into_queue();
		Errno::set_raw(errno);
	}
}

const ROUTED: [Signal; 4] = [Signal::SIGINT, Signal::SIGTSTP, Signal::SIGCHLD, Signal::SIGTTOU];

/// Installed handlers. Dropping it restores the previous dispositions.
#[derive(Debug)]
pub struct SignalRouter {
	previous: Vec<(Signal, SigAction)>,
}

impl SignalRouter {
	pub fn install() -> nix::Result<SignalRouter> {
		let mut router = SignalRouter { previous: Vec::with_capacity(ROUTED.len()) };
		for &sig in ROUTED.iter() {
			let handler = match sig {
				Signal::SIGCHLD => SigHandler::Handler(note_child_event),
				// Lets the shell take the terminal back from a foreground group.
				Signal::SIGTTOU => SigHandler::SigIgn,
				_ => SigHandler::Handler(forward_to_foreground),
			};
			let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
			let old = unsafe { signal::sigaction(sig, &action)? };
			router.previous.push((sig, old));
		}
		debug!("signal router installed");
		Ok(router)
	}
}

impl Drop for SignalRouter {
	fn drop(&mut self) {
		IDLE_REAP.store(false, Ordering::SeqCst);
		for (sig, old) in self.previous.drain(..).rev() {
			let _ = unsafe { signal::sigaction(sig, &old) };
		}
		FOREGROUND.store(0, Ordering::SeqCst);
		CHILD_EVENT.store(false, Ordering::SeqCst);
		debug!("signal router removed");
	}
}

/// Marks a process group as foreground until dropped.
#[derive(Debug)]
pub struct Foreground {
	_private: (),
}

impl Foreground {
	pub fn set(pgid: Pid) -> Foreground {
		FOREGROUND.store(pgid.as_raw(), Ordering::SeqCst);
		Foreground { _private: () }
	}
}

impl Drop for Foreground {
	fn drop(&mut self) {
		FOREGROUND.store(0, Ordering::SeqCst);
	}
}

/// Lets the SIGCHLD handler reap children until dropped. Only held while no
/// pipeline is being spawned or waited on, so the handler never takes a status
/// that `Job::wait` is blocking for.
#[derive(Debug)]
pub struct IdleReaper {
	_private: (),
}

impl IdleReaper {
	pub fn enable() -> IdleReaper {
		IDLE_REAP.store(true, Ordering::SeqCst);
		// Children that changed state before the flag was up sent their SIGCHLD already.
		reap_into_queue();
		IdleReaper { _private: () }
	}
}

impl Drop for IdleReaper {
	fn drop(&mut self) {
		IDLE_REAP.store(false, Ordering::SeqCst);
	}
}

/// Drains the statuses the handler collected.
pub fn take_reaped() -> Vec<WaitStatus> {
	while REAP_LOCK.swap(true, Ordering::Acquire) {
		std::hint::spin_loop();
	}
	let len = REAPED_LEN.load(Ordering::Relaxed);
	let statuses = REAPED[..len].iter().filter_map(|slot| {
		let packed = slot.load(Ordering::Relaxed);
		let pid = Pid::from_raw((packed >> 32) as u32 as i32);
		WaitStatus::from_raw(pid, packed as u32 as i32).ok()
	}).collect();
	REAPED_LEN.store(0, Ordering::Relaxed);
	REAP_LOCK.store(false, Ordering::Release);
	statuses
}

#[cfg(test)]
pub fn foreground() -> Option<Pid> {
	match FOREGROUND.load(Ordering::SeqCst) {
		0 => None,
		pgid => Some(Pid::from_raw(pgid)),
	}
}

/// Whether a child changed state since the last call.
pub fn take_child_event() -> bool {
	CHILD_EVENT.swap(false, Ordering::SeqCst)
}

/// Gives a freshly forked child the default dispositions the shell overrides.
/// SIGPIPE is ignored by the Rust runtime and would stay ignored across exec.
pub fn reset_for_child() {
	let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	let defaults = [
		Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP, Signal::SIGTTIN,
		Signal::SIGTTOU, Signal::SIGCHLD, Signal::SIGPIPE,
	];
	for &sig in defaults.iter() {
		let _ = unsafe { signal::sigaction(sig, &action) };
	}
}
