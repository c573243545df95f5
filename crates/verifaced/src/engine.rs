use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use veriface_core::{EmbedError, EmbedOutcome, Embedder};
use veriface_store::{rebuild_from_store, FaceIndex, GalleryStore, IndexError, RebuildStats};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("embedder: {0}")]
    Embed(#[from] EmbedError),
    #[error("rebuild: {0}")]
    Rebuild(#[from] IndexError),
    #[error("embedder timed out after {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Embed {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<EmbedOutcome, EngineError>>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RebuildStats, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    scheme: String,
    embed_timeout: Duration,
}

impl EngineHandle {
    /// Embedding scheme of the embedder the engine owns.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Embed probe bytes on the engine thread, bounded by the configured
    /// timeout so a pathological input cannot stall a request forever.
    pub async fn embed(&self, bytes: Vec<u8>) -> Result<EmbedOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        match tokio::time::timeout(self.embed_timeout, reply_rx).await {
            Err(_) => Err(EngineError::Timeout(self.embed_timeout)),
            Ok(reply) => reply.map_err(|_| EngineError::ChannelClosed)?,
        }
    }

    /// Run a full gallery rebuild on the engine thread. Deliberately not
    /// bounded by the embed timeout — a reload over a large gallery is slow
    /// by nature, and readers keep the old snapshot meanwhile.
    pub async fn rebuild(&self) -> Result<RebuildStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Rebuild { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The embedder's model sessions need `&mut self`, so exactly one thread
/// owns them and requests queue on the channel. Rebuilds run here too: only
/// this thread may embed cache misses discovered during the scan.
pub fn spawn_engine(
    mut embedder: Box<dyn Embedder>,
    store: Arc<GalleryStore>,
    index: Arc<FaceIndex>,
    embed_timeout: Duration,
) -> EngineHandle {
    let scheme = embedder.scheme().to_string();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("veriface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Embed { bytes, reply } => {
                        let result = embedder.embed(&bytes).map_err(EngineError::Embed);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Rebuild { reply } => {
                        let result = rebuild_from_store(&store, &index, embedder.as_mut())
                            .map_err(EngineError::Rebuild);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        scheme,
        embed_timeout,
    }
}
