use anyhow::Context;
use ingest_pipeline::{ConsumerHandler, StagedFile};
use tracing::info;

/// Logs each delivered file. Stands in for a real downstream processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingConsumer;

#[async_trait::async_trait]
impl ConsumerHandler for LoggingConsumer {
    async fn handle(&self, file: StagedFile) -> anyhow::Result<()> {
        let meta = tokio::fs::metadata(file.local_path.as_std_path())
            .await
            .with_context(|| format!("staged file {} is not readable", file.local_path))?;
        if !meta.is_file() {
            anyhow::bail!("staged path {} is not a regular file", file.local_path);
        }
        info!(
            path = %file.local_path,
            bytes = meta.len(),
            "Received {} file.",
            file.original_name
        );
        Ok(())
    }
}
