// Command-line entry point

use std::process::ExitCode;

use clap::Parser;

use bingo_downloader_lib::cli::{self, Cli};
use bingo_downloader_lib::{logging, Config};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    logging::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    cli::run(cli, config).await
}
