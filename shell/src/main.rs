use tsh::{cli, global, logging, repl};

fn main() {
	if let Err(err) = run_main() {
		eprintln!("tsh: {err:?}");
		std::process::exit(1);
	}
}

fn run_main() -> anyhow::Result<()> {
	let args = cli::parse();
	logging::init_logging(args.log_level)?;
	let mut state = global::State::new(global::Config::from(&args));
	let mut reader = repl::EditorReader::new(&state.config)
		.map_err(|e| anyhow::anyhow!("cannot start line editor: {e}"))?;
	let r = repl::run(&mut state, &mut reader);
	reader.save_history();
	r?;
	Ok(())
}
