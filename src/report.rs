use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::StatusArgs;
use crate::status_store;

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let save_dir = PathBuf::from(&args.out);
    if !save_dir.is_dir() {
        anyhow::bail!("save directory does not exist: {}", save_dir.display());
    }

    let status = status_store::load(&save_dir).await;
    let failures = status_store::load_failure_report(&save_dir)
        .await
        .context("read failure report")?;

    println!("Completed chapters: {}", status.len());
    if failures.is_empty() {
        println!("No unresolved chapters.");
        return Ok(());
    }

    println!("Unresolved chapters: {}", failures.len());
    for failure in &failures {
        println!(
            "  #{} {} [{}] {}",
            failure.index, failure.title, failure.id, failure.url
        );
    }
    Ok(())
}
