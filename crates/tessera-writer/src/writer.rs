//! Host-facing entry point producing one file session per period

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::backend::{ContainerBackend, TesseraBackend};
use crate::cancel::CancellationToken;
use crate::catalog::CatalogItem;
use crate::config::WriterConfig;
use crate::error::Result;
use crate::naming;
use crate::session::{FileSession, Period};

/// Writes sequential period files with a shared configuration and backend
#[derive(Debug, Clone)]
pub struct DataWriter<B: ContainerBackend = TesseraBackend> {
    config: Arc<WriterConfig>,
    backend: Arc<B>,
}

impl DataWriter<TesseraBackend> {
    /// Writer producing Tessera container files
    pub fn new(config: WriterConfig) -> Result<Self> {
        let backend = TesseraBackend::new(config.container_options());
        Self::with_backend(config, backend)
    }
}

impl<B: ContainerBackend> DataWriter<B> {
    /// Writer over a custom backend
    pub fn with_backend(config: WriterConfig, backend: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            backend: Arc::new(backend),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Path of the file for the period starting at `begin`
    pub fn file_path(&self, begin: DateTime<Utc>, sample_period: Duration) -> PathBuf {
        self.config.output_dir.join(naming::file_name(
            begin,
            sample_period,
            &self.config.file_extension,
        ))
    }

    /// Open the file for the period `[begin, begin + period)` holding `items`
    pub async fn open(
        &self,
        begin: DateTime<Utc>,
        period: Duration,
        sample_period: Duration,
        items: &[CatalogItem],
        cancel: &CancellationToken,
    ) -> Result<FileSession<B>> {
        debug!(%begin, ?period, ?sample_period, items = items.len(), "opening period");
        let mut session = FileSession::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.config),
            Period {
                begin,
                length: period,
                sample_period,
            },
        );
        session.open(items, cancel).await?;
        Ok(session)
    }
}
