use std::path::Path;
use std::time::Duration;

use camino::Utf8Path;
use ingest_core::EntryName;
use walkdir::WalkDir;

pub async fn robust_rename<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> std::io::Result<()> {
    let mut attempt = 0u32;
    let max_attempts = 5u32;
    let mut backoff = Duration::from_millis(50);

    loop {
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                // A missing source will not reappear.
                if attempt >= max_attempts || e.kind() == std::io::ErrorKind::NotFound {
                    return Err(e);
                }
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, Duration::from_millis(1000));
            }
        }
    }
}

/// Remove temporary download files left behind by an interrupted process.
/// Files for which `in_use` returns true are kept.
pub fn sweep_partials(
    staging: &Utf8Path,
    in_use: impl Fn(&str) -> bool,
) -> std::io::Result<usize> {
    if !staging.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in WalkDir::new(staging.as_std_path())
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let stale = entry
            .file_name()
            .to_str()
            .is_some_and(|n| EntryName::is_partial(n) && !in_use(n));
        if stale {
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
