use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::storage::RemoteStorage;

pub fn ensure_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("expected output missing: {}", path.display());
    }
    Ok(())
}

pub fn line_count(path: &Path) -> Result<usize> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file).lines().count())
}

/// Line-count parity against a remote index: the local file must have
/// exactly as many lines as the index object lists.
pub async fn line_count_matches_index(
    storage: &dyn RemoteStorage,
    index_uri: &str,
    path: &Path,
) -> Result<()> {
    let (index, _revision) = storage
        .download_to_string(index_uri)
        .await
        .with_context(|| format!("failed to fetch index {index_uri}"))?;
    let expected = index.lines().filter(|line| !line.trim().is_empty()).count();
    let actual = line_count(path)?;
    if actual != expected {
        bail!(
            "{} has {actual} line(s), index {index_uri} lists {expected}",
            path.display()
        );
    }
    Ok(())
}

/// Work-dir precondition: the directory must exist (created on demand) and
/// be writable before any task runs.
pub fn ensure_work_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create work dir: {}", dir.display()))?;
    let probe = dir.join(".pis-write-probe");
    fs::write(&probe, b"probe")
        .with_context(|| format!("work dir is not writable: {}", dir.display()))?;
    fs::remove_file(&probe)
        .with_context(|| format!("failed to clean probe file: {}", probe.display()))?;
    Ok(())
}
