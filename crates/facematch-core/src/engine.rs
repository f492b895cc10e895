//! Embedding engine: owns the ONNX models on a dedicated OS thread.
//!
//! Models are loaded once at start-up. Async callers reach the thread
//! through a cloneable [`EngineHandle`], which implements [`Embedder`].

use crate::embedder::{EmbedError, Embedder, MultiFacePolicy, OnnxEmbedder};
use crate::types::Embedding;
use image::RgbImage;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Embed {
        image: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EmbedError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl Embedder for EngineHandle {
    async fn embed(&self, image: RgbImage) -> Result<Embedding, EmbedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EmbedError::EngineUnavailable)?;
        reply_rx.await.map_err(|_| EmbedError::EngineUnavailable)?
    }
}

/// Load both ONNX models and spawn the engine thread.
///
/// Fails fast if either model is missing or unloadable.
pub fn spawn_engine(
    detector_path: &Path,
    recognizer_path: &Path,
    policy: MultiFacePolicy,
    queue_depth: usize,
) -> Result<EngineHandle, EmbedError> {
    let embedder = OnnxEmbedder::load(detector_path, recognizer_path, policy)?;
    tracing::info!(?policy, queue_depth, "face models loaded");

    let (tx, rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || run(embedder, rx))
        .map_err(|e| {
            tracing::error!(error = %e, "failed to spawn engine thread");
            EmbedError::EngineUnavailable
        })?;

    Ok(EngineHandle { tx })
}

fn run(mut embedder: OnnxEmbedder, mut rx: mpsc::Receiver<EngineRequest>) {
    tracing::info!("engine thread started");
    while let Some(req) = rx.blocking_recv() {
        match req {
            EngineRequest::Embed { image, reply } => {
                // Caller timed out or disconnected while queued.
                if reply.is_closed() {
                    tracing::debug!("embed request abandoned before inference; skipping");
                    continue;
                }
                let started = std::time::Instant::now();
                let result = embedder.embed(&image);
                tracing::debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    ok = result.is_ok(),
                    "embed complete"
                );
                let _ = reply.send(result);
            }
        }
    }
    tracing::info!("engine thread exiting");
}
