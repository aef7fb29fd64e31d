//! # Background Artwork Worker
//!
//! Downloads additional artwork for movies and shows outside the sync
//! passes. Requests are queued by the apply stage (new items) and by the
//! orchestrator at startup (items whose artwork was never completed), and
//! drained by a single low-priority task that yields to full passes.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, warn};

use bridge_traits::{ArtworkFetcher, LibraryIndex, MediaKind};

use crate::context::EngineFlags;

/// How long the worker sleeps while a full pass holds the connection.
const BACKOFF_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// One queued artwork download.
#[derive(Debug, Clone, PartialEq)]
pub struct FanartRequest {
    pub remote_id: String,
    pub kind: MediaKind,
    /// Re-download artwork that is already cached.
    pub refresh: bool,
}

/// Producer half of the artwork queue, cloned into the pipeline.
#[derive(Debug, Clone)]
pub struct FanartQueue {
    tx: mpsc::UnboundedSender<FanartRequest>,
}

impl FanartQueue {
    /// Queue a download. Silently dropped after the worker has shut down.
    pub fn push(&self, request: FanartRequest) {
        let _ = self.tx.send(request);
    }
}

/// The consuming worker. Create one per engine, hand out the queue, then
/// spawn [`run`](FanartWorker::run).
pub struct FanartWorker {
    fetcher: Arc<dyn ArtworkFetcher>,
    index: Arc<dyn LibraryIndex>,
    flags: Arc<EngineFlags>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<FanartRequest>>,
    queue: FanartQueue,
}

impl FanartWorker {
    pub fn new(
        fetcher: Arc<dyn ArtworkFetcher>,
        index: Arc<dyn LibraryIndex>,
        flags: Arc<EngineFlags>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            index,
            flags,
            rx: AsyncMutex::new(rx),
            queue: FanartQueue { tx },
        }
    }

    pub fn queue(&self) -> FanartQueue {
        self.queue.clone()
    }

    /// Drain the queue until the engine stops.
    pub async fn run(&self) {
        let token = self.flags.stop_token();
        let mut rx = self.rx.lock().await;

        loop {
            // Stay off the remote connection while a pass is running or the
            // engine is suspended.
            while self.flags.is_scan_in_progress() || self.flags.is_suspended() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(BACKOFF_INTERVAL) => {}
                }
            }

            let request = tokio::select! {
                _ = token.cancelled() => return,
                next = rx.recv() => match next {
                    Some(r) => r,
                    None => return,
                },
            };

            match self
                .fetcher
                .fetch(&request.remote_id, request.kind, request.refresh)
                .await
            {
                Ok(true) => {
                    if let Err(e) = self.index.set_fanart_synced(&request.remote_id).await {
                        warn!(
                            item_id = %request.remote_id,
                            error = %e,
                            "Could not mark artwork as synced"
                        );
                    }
                }
                Ok(false) => {
                    debug!(item_id = %request.remote_id, "No additional artwork found");
                }
                Err(e) => {
                    warn!(
                        item_id = %request.remote_id,
                        error = %e,
                        "Artwork download failed, skipping"
                    );
                }
            }
        }
    }
}
