use facewise_core::{
    FacePipeline, FaceStore, RecognizeError, Recognition, Recognizer, RecognizerConfig, StoreError,
};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Recognize(#[from] RecognizeError),
    #[error("face store: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the stdin loop to the engine thread.
enum EngineRequest {
    Recognize {
        payload: String,
        reply: oneshot::Sender<Result<Recognition, RecognizeError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<usize, StoreError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Decode a base64 frame and recognize every face in it.
    pub async fn recognize(&self, payload: String) -> Result<Recognition, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Re-read the gallery from the database. Returns the number of known faces.
    pub async fn reload(&self) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reload { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Replace the recognizer's gallery from `db_path`. A database without a
/// faces table yields an empty gallery.
fn load_gallery<P: FacePipeline>(
    recognizer: &mut Recognizer<P>,
    db_path: &Path,
) -> Result<usize, StoreError> {
    let store = FaceStore::open_existing(db_path)?;
    if !store.has_faces_table()? {
        tracing::warn!(db = %db_path.display(), "faces table does not exist");
        recognizer.set_known_faces(Vec::new());
        return Ok(0);
    }
    recognizer.load_known_faces(&store)
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the pipeline, the known-face cache and the rate limiter,
/// and serves one request at a time. An unreadable gallery at startup is
/// logged and the engine starts empty; `reload` can pick faces up later.
pub fn spawn_engine<P>(
    pipeline: P,
    config: RecognizerConfig,
    db_path: PathBuf,
) -> Result<EngineHandle, EngineError>
where
    P: FacePipeline + Send + 'static,
{
    let mut recognizer = Recognizer::new(pipeline, config);
    match load_gallery(&mut recognizer, &db_path) {
        Ok(known) => tracing::info!(known, db = %db_path.display(), "recognizer initialized"),
        Err(err) => tracing::error!(error = %err, "cannot load known faces; starting with none"),
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facewise-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { payload, reply } => {
                        let _ = reply.send(recognizer.recognize_base64(&payload));
                    }
                    EngineRequest::Reload { reply } => {
                        let result = load_gallery(&mut recognizer, &db_path);
                        if let Err(err) = &result {
                            tracing::error!(error = %err, "reload failed; keeping previous gallery");
                        }
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
