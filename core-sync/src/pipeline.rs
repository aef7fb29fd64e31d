//! # Fetch/Apply Pipeline
//!
//! Two-stage worker pipeline turning a queue of [`WorkItem`]s into local
//! store writes.
//!
//! ## Overview
//!
//! Several fetch workers pull ids from a shared work queue and download
//! full metadata payloads concurrently; a single apply worker per run
//! writes them to the category store, preserving the one-writer-per-
//! category guarantee. The processing queue between the stages is bounded
//! so fetches back off when the writer falls behind.
//!
//! Progress is reported from a sampling task rather than inline: it
//! snapshots the stage counters on a fixed interval and publishes a
//! [`SyncEvent::Progress`], so reporting cost is independent of item count.
//!
//! ## Failure Policy
//!
//! - A missing item (`NotFound`) is skipped for this pass; both stage
//!   counters advance so progress still reaches 100%.
//! - A transport error on one item is logged and skipped the same way.
//! - `Unauthorized` aborts the whole run: the worker that saw it drains the
//!   work queue, every other worker stops picking up new work, and the
//!   outcome is surfaced to the orchestrator.
//! - Cancellation drains both queues and exits without error; the outcome
//!   reflects whatever completed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use bridge_traits::{CategoryStore, Fetched, ItemPayload, LibraryCategory, MediaKind, RemoteCatalog};
use core_runtime::{EventBus, SyncEvent};

use crate::context::EngineFlags;
use crate::delta::{ApplyOp, WorkItem};
use crate::error::Result;
use crate::fanart::{FanartQueue, FanartRequest};

/// Bound on payloads buffered between the fetch and apply stages.
const PROCESSING_QUEUE_CAPACITY: usize = 100;

/// How often the reporter samples the stage counters.
const PROGRESS_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

// ============================================================================
// Stage Counters
// ============================================================================

/// Shared per-run counters, one slot per pipeline stage.
///
/// Progress treats a run as two equal halves (fetch, then apply), so the
/// combined percentage is `(fetched + applied) / (2 * total)`.
#[derive(Debug)]
pub struct StageCounters {
    total: u64,
    fetched: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    view_name: StdMutex<String>,
}

/// Point-in-time copy of the counters, taken by the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub fetched: u64,
    pub applied: u64,
    pub failed: u64,
    pub total: u64,
    pub percent: u8,
    pub view_name: String,
}

impl StageCounters {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            fetched: AtomicU64::new(0),
            applied: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            view_name: StdMutex::new(String::new()),
        }
    }

    fn inc_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_applied(&self) {
        self.applied.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// An item that will never be applied (missing, fetch error, abort)
    /// still advances both stages so the run can finish at 100%.
    fn mark_skipped(&self) {
        self.inc_fetched();
        self.inc_applied();
    }

    fn set_view_name(&self, name: &str) {
        if let Ok(mut slot) = self.view_name.lock() {
            if *slot != name {
                slot.clear();
                slot.push_str(name);
            }
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let fetched = self.fetched.load(Ordering::Relaxed);
        let applied = self.applied.load(Ordering::Relaxed);
        let percent = if self.total == 0 {
            100
        } else {
            ((fetched + applied) * 100 / (2 * self.total)).min(100) as u8
        };
        ProgressSnapshot {
            fetched,
            applied,
            failed: self.failed.load(Ordering::Relaxed),
            total: self.total,
            percent,
            view_name: self
                .view_name
                .lock()
                .map(|s| s.clone())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    pub fetched: u64,
    pub applied: u64,
    pub failed: u64,
    /// The remote server revoked access mid-run; the pass must abort.
    pub unauthorized: bool,
}

/// A reusable fetch/apply pipeline for one category's work queues.
pub struct Pipeline {
    flags: Arc<EngineFlags>,
    events: EventBus,
    worker_count: usize,
    report_progress: bool,
    fanart: Option<FanartQueue>,
}

impl Pipeline {
    pub fn new(flags: Arc<EngineFlags>, events: EventBus, worker_count: usize) -> Self {
        Self {
            flags,
            events,
            worker_count: worker_count.max(1),
            report_progress: true,
            fanart: None,
        }
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.report_progress = enabled;
        self
    }

    /// Queue fanart downloads for applied movies and shows.
    pub fn with_fanart(mut self, queue: Option<FanartQueue>) -> Self {
        self.fanart = queue;
        self
    }

    /// Run the pipeline to completion over one batch of work.
    pub async fn run(
        &self,
        catalog: Arc<dyn RemoteCatalog>,
        store: Arc<dyn CategoryStore>,
        category: LibraryCategory,
        items: Vec<WorkItem>,
    ) -> Result<PipelineOutcome> {
        if items.is_empty() {
            return Ok(PipelineOutcome::default());
        }

        let total = items.len() as u64;
        let counters = Arc::new(StageCounters::new(total));
        let token = self.flags.stop_token();
        let abort = Arc::new(AtomicBool::new(false));

        // Work queue: pre-filled, closed before the workers start so an
        // empty recv means the batch is done.
        let (work_tx, work_rx) = mpsc::unbounded_channel();
        let workers = self.worker_count.min(items.len());
        for item in items {
            let _ = work_tx.send(item);
        }
        drop(work_tx);
        let work_rx = Arc::new(AsyncMutex::new(work_rx));

        let (proc_tx, proc_rx) = mpsc::channel(PROCESSING_QUEUE_CAPACITY);

        let mut fetch_tasks = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            fetch_tasks.push(tokio::spawn(fetch_worker(
                worker_id,
                Arc::clone(&catalog),
                Arc::clone(&work_rx),
                proc_tx.clone(),
                Arc::clone(&counters),
                Arc::clone(&abort),
                token.clone(),
            )));
        }
        drop(proc_tx);

        let apply_task = tokio::spawn(apply_worker(
            store,
            proc_rx,
            Arc::clone(&counters),
            token.clone(),
            self.fanart.clone(),
        ));

        let reporter = if self.report_progress {
            let stop = CancellationToken::new();
            let handle = tokio::spawn(progress_reporter(
                category,
                Arc::clone(&counters),
                self.events.clone(),
                stop.clone(),
            ));
            Some((stop, handle))
        } else {
            None
        };

        futures::future::join_all(fetch_tasks).await;
        let _ = apply_task.await;

        if let Some((stop, handle)) = reporter {
            stop.cancel();
            let _ = handle.await;
        }

        let snapshot = counters.snapshot();
        Ok(PipelineOutcome {
            fetched: snapshot.fetched,
            applied: snapshot.applied,
            failed: snapshot.failed,
            unauthorized: abort.load(Ordering::SeqCst),
        })
    }
}

// ============================================================================
// Workers
// ============================================================================

async fn fetch_worker(
    worker_id: usize,
    catalog: Arc<dyn RemoteCatalog>,
    work_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkItem>>>,
    proc_tx: mpsc::Sender<(WorkItem, ItemPayload)>,
    counters: Arc<StageCounters>,
    abort: Arc<AtomicBool>,
    token: CancellationToken,
) {
    loop {
        let item = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                _ = token.cancelled() => {
                    while rx.try_recv().is_ok() {}
                    None
                }
                next = rx.recv() => next,
            }
        };
        let Some(item) = item else { break };

        if abort.load(Ordering::SeqCst) {
            counters.mark_skipped();
            continue;
        }

        match catalog.fetch_item(&item.item_id).await {
            Ok(Fetched::Ok(payload)) => {
                counters.inc_fetched();
                if proc_tx.send((item, payload)).await.is_err() {
                    // Apply stage is gone; nothing left to do here.
                    break;
                }
            }
            Ok(Fetched::NotFound) => {
                debug!(
                    worker = worker_id,
                    item_id = %item.item_id,
                    "Item no longer on server, skipping for this pass"
                );
                counters.mark_skipped();
            }
            Ok(Fetched::Unauthorized) => {
                warn!(
                    worker = worker_id,
                    "Remote server rejected credentials, aborting batch"
                );
                abort.store(true, Ordering::SeqCst);
                let mut rx = work_rx.lock().await;
                while rx.try_recv().is_ok() {}
                break;
            }
            Err(e) => {
                warn!(
                    worker = worker_id,
                    item_id = %item.item_id,
                    error = %e,
                    "Fetch failed, skipping item for this pass"
                );
                counters.inc_failed();
                counters.mark_skipped();
            }
        }
    }
}

async fn apply_worker(
    store: Arc<dyn CategoryStore>,
    mut proc_rx: mpsc::Receiver<(WorkItem, ItemPayload)>,
    counters: Arc<StageCounters>,
    token: CancellationToken,
    fanart: Option<FanartQueue>,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => {
                while proc_rx.try_recv().is_ok() {}
                None
            }
            next = proc_rx.recv() => next,
        };
        let Some((item, payload)) = next else { break };

        if let Some(name) = item.view_name.as_deref() {
            counters.set_view_name(name);
        }

        let result = dispatch(
            item.op,
            store.as_ref(),
            &payload,
            item.view_name.as_deref(),
            item.view_id.as_deref(),
        )
        .await;

        match result {
            Ok(()) => {
                counters.inc_applied();
                if let Some(queue) = &fanart {
                    if matches!(payload.kind, MediaKind::Movie | MediaKind::Show) {
                        queue.push(FanartRequest {
                            remote_id: payload.id.clone(),
                            kind: payload.kind,
                            refresh: false,
                        });
                    }
                }
            }
            Err(e) => {
                error!(
                    item_id = %payload.id,
                    title = %payload.title,
                    error = %e,
                    "Apply failed, item left stale for the next pass"
                );
                counters.inc_applied();
                counters.inc_failed();
            }
        }
    }
}

/// Dispatch one payload to the store method its operation names.
async fn dispatch(
    op: ApplyOp,
    store: &dyn CategoryStore,
    payload: &ItemPayload,
    view_tag: Option<&str>,
    view_id: Option<&str>,
) -> bridge_traits::error::Result<()> {
    match op {
        ApplyOp::AddOrUpdate => store.add_or_update(payload, view_tag, view_id).await,
        ApplyOp::AddSeason => store.add_season(payload, view_tag, view_id).await,
        ApplyOp::AddEpisode => store.add_episode(payload, view_tag, view_id).await,
        ApplyOp::AddAlbum => store.add_album(payload, view_tag, view_id).await,
        ApplyOp::AddTrack => store.add_track(payload, view_tag, view_id).await,
    }
}

async fn progress_reporter(
    category: LibraryCategory,
    counters: Arc<StageCounters>,
    events: EventBus,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(PROGRESS_INTERVAL) => {
                let s = counters.snapshot();
                events.emit(SyncEvent::Progress {
                    category: category.to_string(),
                    fetched: s.fetched,
                    applied: s.applied,
                    total: s.total,
                    percent: s.percent,
                    view_name: s.view_name,
                });
            }
        }
    }
}
