use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = bookfetch::cli::Cli::parse();
    bookfetch::logging::init(cli.verbose).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        bookfetch::cli::Command::Download(args) => {
            bookfetch::download::run(args).await.context("download")?;
        }
        bookfetch::cli::Command::Chapters(args) => {
            bookfetch::catalog::run(args).await.context("chapters")?;
        }
        bookfetch::cli::Command::Status(args) => {
            bookfetch::report::run(args).await.context("status")?;
        }
    }

    Ok(())
}
