//! Enrollment (`train`) and verification (`predict`).
//!
//! Every suspension point (decode, embed, filesystem) runs under a timeout.
//! Nothing is persisted unless every image of an enrollment embeds cleanly.

use crate::decode::{DecodeError, ImageSource};
use crate::embedder::{EmbedError, Embedder};
use crate::store::{StoreError, TemplateStore};
use crate::types::{Embedding, Template};
use crate::vector::VectorError;
use image::RgbImage;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error("image {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Embed(#[from] EmbedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: &'static str, after: Duration },
    #[error("background task failed: {0}")]
    Task(String),
}

/// Distinguishable failure categories for callers mapping errors outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    DimensionMismatch,
    EmptyInput,
    NoFaceDetected,
    MultipleFaces,
    ImageDecodeError,
    TemplateNotFound,
    CorruptTemplate,
    InvalidTemplateName,
    NameCollision,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorKind::EmptyInput => "EMPTY_INPUT",
            ErrorKind::NoFaceDetected => "NO_FACE_DETECTED",
            ErrorKind::MultipleFaces => "MULTIPLE_FACES",
            ErrorKind::ImageDecodeError => "IMAGE_DECODE_ERROR",
            ErrorKind::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            ErrorKind::CorruptTemplate => "CORRUPT_TEMPLATE",
            ErrorKind::InvalidTemplateName => "INVALID_TEMPLATE_NAME",
            ErrorKind::NameCollision => "NAME_COLLISION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Vector(VectorError::DimensionMismatch { .. }) => ErrorKind::DimensionMismatch,
            PipelineError::Vector(VectorError::EmptyInput) => ErrorKind::EmptyInput,
            PipelineError::Decode { .. } => ErrorKind::ImageDecodeError,
            PipelineError::Embed(EmbedError::NoFaceDetected) => ErrorKind::NoFaceDetected,
            PipelineError::Embed(EmbedError::MultipleFaces(_)) => ErrorKind::MultipleFaces,
            PipelineError::Embed(_) => ErrorKind::Internal,
            PipelineError::Store(StoreError::TemplateNotFound(_)) => ErrorKind::TemplateNotFound,
            PipelineError::Store(StoreError::CorruptTemplate { .. }) => ErrorKind::CorruptTemplate,
            PipelineError::Store(StoreError::InvalidName(_)) => ErrorKind::InvalidTemplateName,
            PipelineError::Store(StoreError::NameCollision(_)) => ErrorKind::NameCollision,
            PipelineError::Store(StoreError::Io { .. } | StoreError::Abandoned) => ErrorKind::Internal,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::Task(_) => ErrorKind::Internal,
        }
    }
}

/// Timeouts applied around each suspension point.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub embed: Duration,
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            embed: Duration::from_secs(10),
            io: Duration::from_secs(5),
        }
    }
}

/// Enrollment and verification over one embedder and one template store.
pub struct Pipeline<E> {
    embedder: E,
    store: TemplateStore,
    dim: usize,
    timeouts: Timeouts,
}

impl<E: Embedder> Pipeline<E> {
    pub fn new(embedder: E, store: TemplateStore, dim: usize, timeouts: Timeouts) -> Self {
        Self {
            embedder,
            store,
            dim,
            timeouts,
        }
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Build a template from `images` and persist it under a new name.
    ///
    /// Returns the template identifier.
    #[tracing::instrument(skip_all, fields(images = images.len()))]
    pub async fn train(&self, images: Vec<ImageSource>) -> Result<String, PipelineError> {
        if images.is_empty() {
            return Err(VectorError::EmptyInput.into());
        }
        let started = Instant::now();

        let mut embeddings = Vec::with_capacity(images.len());
        for (index, source) in images.into_iter().enumerate() {
            let image = self.decode(index, source).await?;
            let embedding = self.embed(image).await?;
            embeddings.push(embedding);
        }

        let template = Template::from_embeddings(&embeddings)?;
        let name = self
            .persist(template, |store, template, abandoned| store.create_unless(template, abandoned))
            .await?;

        tracing::info!(
            template = %name,
            samples = embeddings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "enrolled template"
        );
        Ok(name)
    }

    /// Euclidean distance between a probe photo and a stored template.
    ///
    /// Lower is a closer match; no threshold is applied here.
    #[tracing::instrument(skip(self, probe))]
    pub async fn predict(&self, template_name: &str, probe: ImageSource) -> Result<f64, PipelineError> {
        let started = Instant::now();

        let store = self.store.clone();
        let name = template_name.to_string();
        let template = self
            .blocking("template read", move || store.load(&name).map_err(PipelineError::from))
            .await?;
        if template.dim() != self.dim {
            return Err(VectorError::DimensionMismatch {
                expected: self.dim,
                actual: template.dim(),
            }
            .into());
        }

        let image = self.decode(0, probe).await?;
        let embedding = self.embed(image).await?;
        let distance = template.distance_to(&embedding)?;

        tracing::info!(
            distance,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "verified probe"
        );
        Ok(distance)
    }

    async fn decode(&self, index: usize, source: ImageSource) -> Result<RgbImage, PipelineError> {
        self.blocking("image decode", move || {
            source
                .decode()
                .map_err(|source| PipelineError::Decode { index, source })
        })
        .await
    }

    async fn embed(&self, image: RgbImage) -> Result<Embedding, PipelineError> {
        let embedding = with_timeout("embed", self.timeouts.embed, async {
            self.embedder.embed(image).await.map_err(PipelineError::from)
        })
        .await?;
        embedding.ensure_dim(self.dim)?;
        Ok(embedding)
    }

    /// Write a new template off the runtime, bounded by the I/O timeout.
    ///
    /// If the caller stops waiting (timeout, or this future is dropped) the
    /// write is told to stop, and a template it still manages to create is
    /// removed once the blocking task finishes.
    async fn persist<W>(&self, template: Template, write: W) -> Result<String, PipelineError>
    where
        W: FnOnce(&TemplateStore, &Template, &AtomicBool) -> Result<String, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let abandoned = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&abandoned);
        let task = tokio::task::spawn_blocking(move || write(&store, &template, &flag));
        let mut pending = PendingWrite {
            store: self.store.clone(),
            abandoned,
            task: Some(task),
        };

        with_timeout("template write", self.timeouts.io, async {
            let Some(task) = pending.task.as_mut() else {
                return Err(PipelineError::Task("template write already taken".into()));
            };
            let joined = task.await;
            pending.task = None;
            joined
                .map_err(|e| PipelineError::Task(e.to_string()))?
                .map_err(PipelineError::from)
        })
        .await
    }

    /// Run blocking work off the async runtime, bounded by the I/O timeout.
    async fn blocking<T, F>(&self, operation: &'static str, work: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    {
        with_timeout(operation, self.timeouts.io, async {
            tokio::task::spawn_blocking(work)
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))?
        })
        .await
    }
}

/// A template write nobody has collected yet.
///
/// Dropped while still holding the task means the caller gave up on it.
struct PendingWrite {
    store: TemplateStore,
    abandoned: Arc<AtomicBool>,
    task: Option<JoinHandle<Result<String, StoreError>>>,
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.abandoned.store(true, Ordering::SeqCst);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no runtime to clean up an abandoned template write");
            return;
        };
        let store = self.store.clone();
        runtime.spawn(async move {
            if let Ok(Ok(name)) = task.await {
                tracing::warn!(template = %name, "removing template written after its enrollment was abandoned");
                if let Err(e) = store.remove(&name) {
                    tracing::error!(template = %name, error = %e, "failed to remove orphaned template");
                }
            }
        });
    }
}

async fn with_timeout<T>(
    operation: &'static str,
    after: Duration,
    fut: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, ?after, "operation timed out");
            Err(PipelineError::Timeout { operation, after })
        }
    }
}
