//! Durable progress ledger for resumable runs.
//!
//! The status file holds a JSON array of completed chapter ids. The failure
//! report holds the chapters still unresolved at the end of the last run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

use crate::formats::FailureRecord;

pub const STATUS_FILE_NAME: &str = "download_status.json";
pub const FAILURE_REPORT_FILE_NAME: &str = "failed_chapters.json";

/// Chapter ids considered durably complete.
pub type StatusSet = BTreeSet<String>;

pub fn status_path(save_dir: &Path) -> PathBuf {
    save_dir.join(STATUS_FILE_NAME)
}

pub fn failure_report_path(save_dir: &Path) -> PathBuf {
    save_dir.join(FAILURE_REPORT_FILE_NAME)
}

/// Loads the status set. Missing or unreadable data counts as no prior progress.
pub async fn load(save_dir: &Path) -> StatusSet {
    let path = status_path(save_dir);
    match read_json::<Vec<String>>(&path).await {
        Ok(Some(ids)) => ids.into_iter().collect(),
        Ok(None) => StatusSet::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), ?err, "status file unreadable; starting fresh");
            StatusSet::new()
        }
    }
}

pub async fn save(save_dir: &Path, status: &StatusSet) -> anyhow::Result<()> {
    let ids = status.iter().collect::<Vec<_>>();
    write_json_atomic(&status_path(save_dir), &ids)
        .await
        .context("write status file")
}

pub async fn save_failure_report(save_dir: &Path, failures: &[FailureRecord]) -> anyhow::Result<()> {
    write_json_atomic(&failure_report_path(save_dir), &failures)
        .await
        .context("write failure report")
}

/// Reads the failure report; a missing file means the last run had no failures.
pub async fn load_failure_report(save_dir: &Path) -> anyhow::Result<Vec<FailureRecord>> {
    let path = failure_report_path(save_dir);
    let failures = read_json(&path)
        .await
        .with_context(|| format!("read: {}", path.display()))?;
    Ok(failures.unwrap_or_default())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
