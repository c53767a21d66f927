use std::io::{self, Write};
use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, warn};

use crate::builtin::Flow;
use crate::errors::{report, Result};
use crate::eval::{self, EvalResult};
use crate::global;
use crate::parser;
use crate::signal::{self, SignalRouter};

/// Source of input lines. `Ok(None)` means end of input.
pub trait LineReader {
	fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

pub struct EditorReader {
	editor: DefaultEditor,
	history_file: Option<PathBuf>,
}

impl EditorReader {
	pub fn new(config: &global::Config) -> rustyline::Result<EditorReader> {
		let mut editor = DefaultEditor::new()?;
		if let Some(ref path) = config.history_file {
			if let Err(e) = editor.load_history(path) {
				debug!(path = %path.display(), error = %e, "no history loaded");
			}
		}
		Ok(EditorReader { editor: editor, history_file: config.history_file.clone() })
	}

	pub fn save_history(&mut self) {
		if let Some(ref path) = self.history_file {
			if let Err(e) = self.editor.save_history(path) {
				warn!(path = %path.display(), error = %e, "could not save history");
			}
		}
	}
}

impl LineReader for EditorReader {
	fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
		loop {
			match self.editor.readline(prompt) {
				Ok(line) => {
					if !line.trim().is_empty() {
						let _ = self.editor.add_history_entry(line.as_str());
					}
					return Ok(Some(line));
				},
				// Ctrl-C at the prompt drops the partial line.
				Err(ReadlineError::Interrupted) => {},
				Err(ReadlineError::Eof) => return Ok(None),
				Err(ReadlineError::Io(e)) => return Err(e),
				Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
			}
		}
	}
}

/// Applies what the handler reaped at the prompt, reaps if a child changed
/// state since, and prints what the user should hear about.
pub fn collect_job_events<W: Write>(state: &mut global::State, out: &mut W) {
	for status in signal::take_reaped() {
		if state.job_table.update(status).is_none() {
			debug!(?status, "reaped a child no job owns");
		}
	}
	if signal::take_child_event() {
		let n = state.job_table.reap_all();
		debug!(reaped = n, "reap pass");
	}
	for event in state.job_table.take_events() {
		let _ = writeln!(out, "{}", event);
	}
}

/// Parses and runs one line, reporting any condition to the user.
pub fn run_line<W: Write>(state: &mut global::State, line: &str, out: &mut W) -> Flow {
	let pipeline = match parser::parse(line) {
		Ok(Some(pipeline)) => pipeline,
		Ok(None) => return Flow::Continue,
		Err(e) => {
			report(&e);
			return Flow::Continue;
		},
	};
	match eval::eval(state, &pipeline) {
		Ok(EvalResult::Exit) => return Flow::Exit,
		Ok(EvalResult::Background { id: Some(id), pid }) => { let _ = writeln!(out, "[{}] {}", id, pid); },
		Ok(EvalResult::Background { id: None, pid }) => { let _ = writeln!(out, "[-] {}", pid); },
		Ok(EvalResult::Done(status)) => debug!(status = status, "line finished"),
		Err(e) => report(&e),
	}
	Flow::Continue
}

/// The shell's main loop. Signal routing is active for exactly its duration.
pub fn run<R: LineReader>(state: &mut global::State, reader: &mut R) -> Result<()> {
	let _router = SignalRouter::install()?;
	let mut out = io::stdout();
	loop {
		collect_job_events(state, &mut out);
		let line = {
			// Background jobs finishing at the prompt are reaped right away.
			let _idle = signal::IdleReaper::enable();
			reader.read_line(&state.config.prompt)?
		};
		let line = match line {
			Some(line) => line,
			None => { break; },
		};
		if run_line(state, &line, &mut out) == Flow::Exit {
			break;
		}
	}
	Ok(())
}
