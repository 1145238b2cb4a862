use alphanode::cli::CliArgs;
use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    alphanode::run(args).await
}
