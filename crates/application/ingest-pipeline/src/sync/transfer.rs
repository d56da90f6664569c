use camino::Utf8Path;
use filetime::FileTime;
use ingest_core::{EntryName, RemoteEntry, StagedFile};
use ingest_infra::RemoteSession;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::warn;

use crate::io_utils::robust_rename;
use crate::sync::SyncOptions;

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub(crate) enum FetchError {
    /// The remote side failed; safe to retry on a later cycle.
    Transfer(String),
    /// The staging directory failed; the cycle stops.
    Local(String),
}

#[derive(Debug)]
pub(crate) struct Fetched {
    pub staged: StagedFile,
    pub bytes: u64,
}

/// Stream one entry into `.<name>.part` and rename it into place once complete.
/// On any failure the temporary file is removed and the final name is untouched.
pub(crate) async fn fetch_entry(
    session: &mut dyn RemoteSession,
    opts: &SyncOptions,
    entry: &RemoteEntry,
) -> Result<Fetched, FetchError> {
    EntryName::verify_safe(&entry.name)
        .map_err(|e| FetchError::Transfer(format!("Security: {e}")))?;

    let remote_path = EntryName::remote_path(&opts.remote_dir, &entry.name);
    let target = opts.staging_dir.join(&entry.name);
    let tmp = opts.staging_dir.join(EntryName::partial(&entry.name));

    let mut reader = session
        .open_read(&remote_path)
        .await
        .map_err(|e| FetchError::Transfer(format!("open {remote_path}: {e}")))?;

    let mut file = File::create(tmp.as_std_path())
        .await
        .map_err(|e| FetchError::Local(format!("create {tmp}: {e}")))?;

    let copied = copy_stream(&mut reader, &mut file, &remote_path, &tmp).await;
    let bytes = match copied {
        Ok(n) => n,
        Err(e) => {
            drop(file);
            discard(&tmp).await;
            return Err(e);
        }
    };

    let finished = match file.flush().await {
        Ok(()) => file.sync_all().await,
        Err(e) => Err(e),
    };
    drop(file);
    if let Err(e) = finished {
        discard(&tmp).await;
        return Err(FetchError::Local(format!("flush {tmp}: {e}")));
    }

    if let Some(expected) = entry.size {
        if expected != bytes {
            discard(&tmp).await;
            return Err(FetchError::Transfer(format!(
                "size mismatch for {remote_path}: listed {expected} bytes, received {bytes}"
            )));
        }
    }

    if opts.preserve_timestamp {
        if let Some(secs) = entry.modified.and_then(|m| i64::try_from(m).ok()) {
            let mtime = FileTime::from_unix_time(secs, 0);
            if let Err(e) = filetime::set_file_mtime(tmp.as_std_path(), mtime) {
                warn!("could not set mtime on {tmp}: {e}");
            }
        }
    }

    if let Err(e) = robust_rename(tmp.as_std_path(), target.as_std_path()).await {
        discard(&tmp).await;
        return Err(FetchError::Local(format!("rename {tmp} -> {target}: {e}")));
    }

    Ok(Fetched {
        staged: StagedFile {
            local_path: target,
            original_name: entry.name.clone(),
        },
        bytes,
    })
}

async fn copy_stream(
    reader: &mut ingest_infra::RemoteReader,
    file: &mut File,
    remote_path: &str,
    tmp: &Utf8Path,
) -> Result<u64, FetchError> {
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(|e| {
            FetchError::Transfer(format!("read {remote_path} after {total} bytes: {e}"))
        })?;
        if n == 0 {
            return Ok(total);
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| FetchError::Local(format!("write {tmp}: {e}")))?;
        total += n as u64;
    }
}

async fn discard(tmp: &Utf8Path) {
    if let Err(e) = tokio::fs::remove_file(tmp.as_std_path()).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove partial download {tmp}: {e}");
        }
    }
}
