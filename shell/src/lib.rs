pub mod builtin;
pub mod cli;
pub mod errors;
pub mod eval;
pub mod global;
pub mod job;
pub mod logging;
pub mod parser;
pub mod repl;
pub mod signal;
pub mod types;

#[cfg(test)]
mod test;
