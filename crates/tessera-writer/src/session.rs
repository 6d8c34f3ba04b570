//! One container file covering one period
//!
//! A [`FileSession`] goes `Idle -> Open -> Closed` exactly once. Storage work
//! runs on tokio's blocking pool: the open file is moved into the blocking
//! task for the duration of an operation and moved back when it completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::backend::{ContainerBackend, ContainerFile, TesseraBackend};
use crate::cancel::CancellationToken;
use crate::catalog::{CatalogItem, WriteRequest};
use crate::config::WriterConfig;
use crate::dispatch::{DispatchSummary, Dispatcher};
use crate::error::{Result, WriterError};
use crate::namespace::{DatasetIndex, NamespaceTree};
use crate::naming;

/// Period covered by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// First instant covered
    pub begin: DateTime<Utc>,
    /// Length of the file period
    pub length: Duration,
    /// Time between two samples
    pub sample_period: Duration,
}

struct OpenFile<F: ContainerFile> {
    file: F,
    index: DatasetIndex<F::Node>,
}

enum SessionState<F: ContainerFile> {
    Idle,
    Open(OpenFile<F>),
    Closed,
}

impl<F: ContainerFile> SessionState<F> {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Open(_) => "open",
            Self::Closed => "closed",
        }
    }
}

/// A container file being written for one period
pub struct FileSession<B: ContainerBackend = TesseraBackend> {
    backend: Arc<B>,
    config: Arc<WriterConfig>,
    path: PathBuf,
    period: Period,
    total_length: u64,
    state: SessionState<B::File>,
}

impl<B: ContainerBackend> std::fmt::Debug for FileSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSession")
            .field("path", &self.path)
            .field("period", &self.period)
            .field("total_length", &self.total_length)
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

impl<B: ContainerBackend> FileSession<B> {
    /// Idle session for `period`; nothing is created until [`open`](Self::open)
    pub fn new(backend: Arc<B>, config: Arc<WriterConfig>, period: Period) -> Self {
        let path = config.output_dir.join(naming::file_name(
            period.begin,
            period.sample_period,
            &config.file_extension,
        ));
        Self {
            backend,
            config,
            path,
            period,
            total_length: 0,
            state: SessionState::Idle,
        }
    }

    /// Target file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Period covered by the file
    pub fn period(&self) -> Period {
        self.period
    }

    /// Samples per dataset; 0 until opened
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Whether the file is open for writing
    pub fn is_open(&self) -> bool {
        matches!(self.state, SessionState::Open(_))
    }

    /// Whether the session has ended
    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Create the file and its complete group/dataset tree for `items`
    ///
    /// # Errors
    ///
    /// - `AlreadyOpened` if the session was opened before
    /// - `FileExists` if the target file exists; nothing is touched then
    /// - geometry, naming and serialization errors from the namespace
    /// - `Canceled` if `cancel` fires before or during the commit
    ///
    /// Any error other than `AlreadyOpened` leaves the session `Closed`. A
    /// file created before the failure is released and removed, so the same
    /// period can be opened again.
    pub async fn open(&mut self, items: &[CatalogItem], cancel: &CancellationToken) -> Result<()> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(WriterError::AlreadyOpened);
        }
        self.state = SessionState::Closed;

        self.config.validate()?;
        let tree = NamespaceTree::build(
            self.period.begin,
            self.period.length,
            self.period.sample_period,
            items,
            &self.config.planner(),
        )?;
        self.total_length = tree.total_length;

        if tokio::fs::try_exists(&self.path).await? {
            return Err(WriterError::FileExists(self.path.clone()));
        }
        cancel.check()?;

        let backend = Arc::clone(&self.backend);
        let path = self.path.clone();
        let output_dir = self.config.output_dir.clone();
        let pipeline = self.config.pipeline();
        let cancel = cancel.clone();

        let open = tokio::task::spawn_blocking(move || -> Result<OpenFile<B::File>> {
            std::fs::create_dir_all(&output_dir)?;
            let mut file = backend.create(&path)?;

            let committed = tree
                .commit(&mut file, pipeline)
                .and_then(|index| cancel.check().map(|()| index));
            match committed {
                Ok(index) => {
                    info!(
                        path = %path.display(),
                        catalogs = tree.catalogs.len(),
                        datasets = index.len(),
                        total_length = tree.total_length,
                        "opened period file"
                    );
                    Ok(OpenFile { file, index })
                }
                Err(e) => {
                    if let Err(finalize) = file.finalize() {
                        debug!(path = %path.display(), error = %finalize, "failed to finalize aborted file");
                    }
                    match std::fs::remove_file(&path) {
                        Ok(()) => debug!(path = %path.display(), error = %e, "removed aborted file"),
                        Err(remove) => {
                            warn!(path = %path.display(), error = %remove, "failed to remove aborted file");
                        }
                    }
                    Err(e)
                }
            }
        })
        .await??;

        self.state = SessionState::Open(open);
        Ok(())
    }

    /// Write every request at `file_offset` from the period begin
    ///
    /// `progress` receives the fraction of requests written after each
    /// catalog group. The session stays open when a request fails; writes
    /// completed before the failure are kept.
    pub async fn write<P>(
        &mut self,
        file_offset: Duration,
        requests: Vec<WriteRequest>,
        progress: P,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary>
    where
        P: FnMut(f64) + Send + 'static,
    {
        if !self.is_open() {
            return Err(WriterError::NotOpen);
        }
        let SessionState::Open(mut open) = std::mem::replace(&mut self.state, SessionState::Closed)
        else {
            return Err(WriterError::NotOpen);
        };

        let sample_period = self.period.sample_period;
        let cancel = cancel.clone();
        let (open, result) = tokio::task::spawn_blocking(move || {
            let result = Dispatcher::new(&mut open.file, &open.index, sample_period).write(
                file_offset,
                &requests,
                progress,
                &cancel,
            );
            (open, result)
        })
        .await?;

        self.state = SessionState::Open(open);
        if let Err(e) = &result {
            debug!(path = %self.path.display(), error = %e, "write failed");
        }
        result
    }

    /// Flush and finalize the file
    ///
    /// A session that never opened just ends; closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let SessionState::Open(open) = std::mem::replace(&mut self.state, SessionState::Closed)
        else {
            return Ok(());
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            open.file.finalize()?;
            info!(path = %path.display(), "closed period file");
            Ok(())
        })
        .await?
    }
}

impl<B: ContainerBackend> Drop for FileSession<B> {
    fn drop(&mut self) {
        if let SessionState::Open(open) = std::mem::replace(&mut self.state, SessionState::Closed) {
            if let Err(e) = open.file.finalize() {
                warn!(path = %self.path.display(), error = %e, "failed to finalize file session on drop");
            }
        }
    }
}
