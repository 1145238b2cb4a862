mod args;
mod commands;
mod repl;

pub use args::CliArgs;
pub use repl::{AppState, PROMPT, run_repl, run_single_question};
