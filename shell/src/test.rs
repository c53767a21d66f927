use std::{fs,thread};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{Duration,Instant};

use nix::sys::signal::{self,Signal};
use nix::unistd;
use serial_test::serial;

use crate::errors::Result;
use crate::eval::{eval,EvalResult};
use crate::global::{Config,State};
use crate::job::{JobEvent,ProcessStatus};
use crate::parser;
use crate::signal::SignalRouter;

fn state_with(config: Config) -> State {
	let mut st = State::new(config);
	st.interactive = false;
	st
}

fn state() -> State {
	state_with(Config::default())
}

fn run(st: &mut State, line: &str) -> Result<EvalResult> {
	let pipeline = parser::parse(line).unwrap().unwrap();
	eval(st, &pipeline)
}

/// Reaps until the job table is empty, returning the notifications seen.
fn drain(st: &mut State) -> Vec<JobEvent> {
	let deadline = Instant::now() + Duration::from_secs(10);
	let mut events = vec![];
	while !st.job_table.is_empty() {
		assert!(Instant::now() < deadline, "jobs never finished: {:?}", st.job_table);
		thread::sleep(Duration::from_millis(50));
		st.job_table.reap_all();
		events.extend(st.job_table.take_events());
	}
	events
}

fn read(path: &Path) -> String {
	fs::read_to_string(path).unwrap()
}

fn signal_self_after(sig: Signal, delay: Duration) -> thread::JoinHandle<()> {
	thread::spawn(move || {
		thread::sleep(delay);
		signal::kill(unistd::getpid(), sig).unwrap();
	})
}

#[test]
#[serial]
fn pipe_composition_matches_filters_in_sequence() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");
	let line = format!("seq 1 20 | grep 1 | sort -r > {}", out.display());
	assert_eq!(run(&mut state(), &line).unwrap(), EvalResult::Done(0));
	assert_eq!(read(&out), "19\n18\n17\n16\n15\n14\n13\n12\n11\n10\n1\n");
}

#[test]
#[serial]
fn ls_grep_into_file() {
	let dir = tempfile::tempdir().unwrap();
	for name in &["foo1", "bar", "foo2", "bazfoo"] {
		fs::write(dir.path().join(name), b"").unwrap();
	}
	let out = dir.path().join("out.txt");
	let line = format!("ls {} | grep foo > {}", dir.path().display(), out.display());
	let mut st = state();
	assert_eq!(run(&mut st, &line).unwrap(), EvalResult::Done(0));
	assert_eq!(read(&out), "bazfoo\nfoo1\nfoo2\n");
	assert!(st.job_table.is_empty());
}

#[test]
#[serial]
fn output_then_input_redirection_round_trips() {
	let dir = tempfile::tempdir().unwrap();
	let a = dir.path().join("a");
	let b = dir.path().join("b");
	let mut st = state();
	run(&mut st, &format!("seq 1 5000 > {}", a.display())).unwrap();
	run(&mut st, &format!("cat < {} > {}", a.display(), b.display())).unwrap();
	let written = fs::read(&a).unwrap();
	assert!(written.len() > 20000);
	assert_eq!(written, fs::read(&b).unwrap());
}

#[test]
#[serial]
fn output_redirection_truncates() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");
	fs::write(&out, "a much longer previous content\n").unwrap();
	run(&mut state(), &format!("echo new > {}", out.display())).unwrap();
	assert_eq!(read(&out), "new\n");
}

#[test]
#[serial]
fn explicit_redirection_wins_over_pipe() {
	let dir = tempfile::tempdir().unwrap();
	let mid = dir.path().join("mid");
	let end = dir.path().join("end");
	let line = format!("echo hi > {} | cat > {}", mid.display(), end.display());
	assert_eq!(run(&mut state(), &line).unwrap(), EvalResult::Done(0));
	assert_eq!(read(&mid), "hi\n");
	assert_eq!(read(&end), "");
}

#[test]
#[serial]
fn piped_input_loses_to_input_redirection() {
	let dir = tempfile::tempdir().unwrap();
	let input = dir.path().join("in");
	let out = dir.path().join("out");
	fs::write(&input, "from the file\n").unwrap();
	let line = format!("echo a | cat < {} > {}", input.display(), out.display());
	assert_eq!(run(&mut state(), &line).unwrap(), EvalResult::Done(0));
	assert_eq!(read(&out), "from the file\n");
}

#[test]
#[serial]
fn foreground_waits_for_last_stage() {
	let start = Instant::now();
	let mut st = state();
	assert_eq!(run(&mut st, "sleep 0.3").unwrap(), EvalResult::Done(0));
	assert!(start.elapsed() >= Duration::from_millis(300));
	assert!(st.job_table.is_empty());
	assert_eq!(run(&mut st, "false").unwrap(), EvalResult::Done(1));
}

#[test]
#[serial]
fn foreground_waits_for_every_stage() {
	let dir = tempfile::tempdir().unwrap();
	let slow = dir.path().join("slow");
	let mid = dir.path().join("mid");
	fs::write(&slow, "#!/bin/sh\nsleep 0.5\necho done\n").unwrap();
	fs::set_permissions(&slow, fs::Permissions::from_mode(0o755)).unwrap();

	let mut st = state();
	let start = Instant::now();
	let line = format!("{} > {} | true", slow.display(), mid.display());
	assert_eq!(run(&mut st, &line).unwrap(), EvalResult::Done(0));
	assert!(start.elapsed() >= Duration::from_millis(500));
	assert_eq!(read(&mid), "done\n");
	assert!(st.job_table.is_empty());
}

#[test]
#[serial]
fn writer_into_closed_pipe_dies_of_sigpipe() {
	let dir = tempfile::tempdir().unwrap();
	let out = dir.path().join("out");
	let mut st = state();
	let id = match run(&mut st, &format!("yes | head -n 1 > {} &", out.display())).unwrap() {
		EvalResult::Background { id: Some(id), .. } => id,
		r => panic!("unexpected {:?}", r),
	};
	let mut job = st.job_table.remove(id).unwrap();
	job.wait().unwrap();
	assert_eq!(job.processes[0].status, ProcessStatus::Signaled(Signal::SIGPIPE));
	assert_eq!(job.processes[1].status, ProcessStatus::Exited(0));
	assert_eq!(read(&out), "y\n");
}

#[test]
#[serial]
fn background_returns_at_once_and_is_announced_once() {
	let mut st = state();
	let start = Instant::now();
	let id = match run(&mut st, "sleep 0.5 &").unwrap() {
		EvalResult::Background { id: Some(id), pid } => {
			assert_eq!(st.job_table.get(id).unwrap().leader(), pid);
			id
		},
		r => panic!("unexpected {:?}", r),
	};
	assert!(start.elapsed() < Duration::from_millis(400));
	assert_eq!(st.job_table.get(id).unwrap().text, "sleep 0.5");

	let events = drain(&mut st);
	assert_eq!(events, vec![JobEvent { id: id, text: "sleep 0.5".to_string(), status: ProcessStatus::Exited(0) }]);
	assert!(st.job_table.get(id).is_none());

	st.job_table.reap_all();
	assert!(st.job_table.take_events().is_empty());
}

#[test]
#[serial]
fn background_pipeline_is_one_job() {
	let mut st = state();
	match run(&mut st, "sleep 0.2 | cat &").unwrap() {
		EvalResult::Background { id: Some(id), .. } => {
			assert_eq!(st.job_table.get(id).unwrap().processes.len(), 2);
		},
		r => panic!("unexpected {:?}", r),
	}
	assert_eq!(drain(&mut st).len(), 1);
}

#[test]
#[serial]
fn missing_program_fails_only_its_stage() {
	let mut st = state();
	assert_eq!(run(&mut st, "tsh-no-such-program-xyz").unwrap(), EvalResult::Done(127));
	assert_eq!(run(&mut st, "tsh-no-such-program-xyz | cat").unwrap(), EvalResult::Done(0));
	assert_eq!(run(&mut st, "echo hi | tsh-no-such-program-xyz").unwrap(), EvalResult::Done(127));
	drain(&mut st);
}

#[test]
#[serial]
fn non_executable_file_and_missing_input() {
	let dir = tempfile::tempdir().unwrap();
	let script = dir.path().join("plain");
	fs::write(&script, "echo hi\n").unwrap();
	fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
	let mut st = state();
	assert_eq!(run(&mut st, &script.display().to_string()).unwrap(), EvalResult::Done(126));

	let missing = dir.path().join("missing");
	assert_eq!(run(&mut st, &format!("cat < {}", missing.display())).unwrap(), EvalResult::Done(1));
}

#[test]
#[serial]
fn builtins_only_alone() {
	let mut st = state();
	assert_eq!(run(&mut st, "exit").unwrap(), EvalResult::Exit);
	assert_ne!(run(&mut st, "exit | cat").unwrap(), EvalResult::Exit);
	drain(&mut st);
}

#[test]
#[serial]
fn full_table_still_runs_the_job() {
	let dir = tempfile::tempdir().unwrap();
	let marker = dir.path().join("marker");
	let mut st = state_with(Config { max_jobs: 1, ..Config::default() });

	match run(&mut st, "sleep 0.3 &").unwrap() {
		EvalResult::Background { id: Some(1), .. } => {},
		r => panic!("unexpected {:?}", r),
	}
	match run(&mut st, &format!("touch {} &", marker.display())).unwrap() {
		EvalResult::Background { id: None, .. } => {},
		r => panic!("unexpected {:?}", r),
	}
	assert_eq!(run(&mut st, "true").unwrap(), EvalResult::Done(0));
	assert_eq!(st.job_table.len(), 1);

	let events = drain(&mut st);
	assert_eq!(events.len(), 1);
	assert!(marker.exists());
}

#[test]
#[serial]
fn interrupt_is_forwarded_to_foreground() {
	let _router = SignalRouter::install().unwrap();
	let mut st = state();
	let start = Instant::now();
	let killer = signal_self_after(Signal::SIGINT, Duration::from_millis(300));
	assert_eq!(run(&mut st, "sleep 5").unwrap(), EvalResult::Done(130));
	killer.join().unwrap();
	assert!(start.elapsed() < Duration::from_secs(4));

	let killer = signal_self_after(Signal::SIGINT, Duration::from_millis(300));
	assert_eq!(run(&mut st, "sleep 5 | sleep 5").unwrap(), EvalResult::Done(130));
	killer.join().unwrap();
	assert!(start.elapsed() < Duration::from_secs(8));
	drain(&mut st);

	// The shell itself survives an interrupt with nothing in the foreground.
	signal::kill(unistd::getpid(), Signal::SIGINT).unwrap();
	assert_eq!(run(&mut st, "true").unwrap(), EvalResult::Done(0));
}

#[test]
#[serial]
fn stop_is_forwarded_and_job_kept() {
	let _router = SignalRouter::install().unwrap();
	let mut st = state();
	let killer = signal_self_after(Signal::SIGTSTP, Duration::from_millis(300));
	assert_eq!(run(&mut st, "sleep 5").unwrap(), EvalResult::Done(128 + Signal::SIGTSTP as i32));
	killer.join().unwrap();

	let (id, pgid) = {
		let (id, job) = st.job_table.iter().next().unwrap();
		(id, job.pgid)
	};
	let events = st.job_table.take_events();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].id, id);
	assert_eq!(events[0].to_string(), format!("[{}]  Stopped   sleep 5", id));

	signal::killpg(pgid, Signal::SIGKILL).unwrap();
	signal::killpg(pgid, Signal::SIGCONT).unwrap_or(());
	let events = drain(&mut st);
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].status, ProcessStatus::Signaled(Signal::SIGKILL));
}
