use anyhow::Result;
use clap::Parser;
use saldo::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    saldo::telemetry::init(cli.verbose, cli.log_json);
    cli.run().await
}
