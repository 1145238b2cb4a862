use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(name = "alphanode")]
#[command(
    about = "Ask questions about the latest USDA Hogs and Pigs reports",
    long_about = "Ask questions about the latest USDA Hogs and Pigs reports\n\nThe reports are fetched once at startup and handed to the language model as hidden context.\n\nConfig file loading:\n  - --config <path> (explicit file, overrides default path discovery)\n  - Default search order when --config is not provided:\n    1. $XDG_CONFIG_HOME/alphanode/config.toml\n    2. ~/.config/alphanode/config.toml"
)]
pub struct CliArgs {
    /// Load config from this file path instead of the default discovery path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print redacted HTTP requests and responses to stderr.
    #[arg(long)]
    pub verbose: bool,

    /// Ask a single question, print the answer and exit.
    #[arg(long, value_name = "TEXT")]
    pub question: Option<String>,
}
