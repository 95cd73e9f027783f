//! Background cleanup of dangling index entries.
//!
//! Deleting a ticket never touches its index entries. Readers skip those
//! entries, but they accumulate. The reconciler periodically walks the indexed
//! registry and deindexes every id whose payload is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument, Span};

use crate::config::ReconcilerConfig;
use crate::context::RequestContext;
use crate::error::StoreError;
use crate::index::IndexManager;
use crate::metrics;
use crate::primary::PrimaryStore;

/// Registry ids resolved per primary store round trip.
const SWEEP_CHUNK: usize = 256;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registry entries examined.
    pub scanned: usize,
    /// Dangling tickets deindexed.
    pub removed: usize,
}

/// Shared between the handle and the spawned loop.
struct Sweeper {
    indexes: Arc<IndexManager>,
    primary: Arc<PrimaryStore>,
}

impl Sweeper {
    async fn sweep(&self, ctx: &RequestContext) -> Result<SweepReport, StoreError> {
        let ids = self.indexes.indexed_ids(ctx).await?;
        let mut report = SweepReport {
            scanned: ids.len(),
            removed: 0,
        };

        for chunk in ids.chunks(SWEEP_CHUNK) {
            let resolved = self.primary.get_many(ctx, chunk).await?;
            for (id, ticket) in chunk.iter().zip(resolved) {
                if ticket.is_some() {
                    continue;
                }
                // Recreated between the batch read and now: leave it alone.
                match self.primary.get(ctx, id).await {
                    Err(StoreError::NotFound(_)) => {}
                    Ok(_) => continue,
                    Err(e) => return Err(e),
                }
                self.indexes.deindex_ticket(ctx, id).await?;
                debug!(ticket_id = %id, "Deindexed dangling ticket");
                report.removed += 1;
            }
        }

        metrics::RECONCILED.inc_by(report.removed as u64);
        Ok(report)
    }
}

/// Periodic reconciliation task.
///
/// A sweep can race a concurrent delete-recreate-index of the same id and
/// deindex the new ticket. Callers that recreate ids should index again.
pub struct Reconciler {
    config: ReconcilerConfig,
    sweeper: Arc<Sweeper>,
    span: Span,

    // Runtime state
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        indexes: Arc<IndexManager>,
        primary: Arc<PrimaryStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            sweeper: Arc::new(Sweeper { indexes, primary }),
            span: Span::current(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run a single sweep now.
    pub async fn sweep_once(&self, ctx: &RequestContext) -> Result<SweepReport, StoreError> {
        let result = self.sweeper.sweep(ctx).instrument(self.span.clone()).await;
        record_sweep(&result);
        result
    }

    /// Start the sweep loop (spawns a background task).
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!(parent: &self.span, "Reconciler already running");
            return;
        }

        let running = Arc::clone(&self.running);
        let sweeper = Arc::clone(&self.sweeper);
        let interval = Duration::from_millis(self.config.interval_ms);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(
            async move {
                info!(interval_ms = interval.as_millis() as u64, "Reconciler started");
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Reconciler received shutdown signal");
                            break;
                        }
                        _ = tokio::time::sleep(interval) => {
                            if !running.load(Ordering::Relaxed) {
                                break;
                            }
                            let result = sweeper.sweep(&RequestContext::background()).await;
                            record_sweep(&result);
                        }
                    }
                }
                info!("Reconciler stopped");
            }
            .instrument(self.span.clone()),
        );

        *self.task.lock().await = Some(handle);
    }

    /// Stop the sweep loop and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!(parent: &self.span, "Reconciler not running");
            return;
        }

        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(parent: &self.span, error = %e, "Reconciler task ended abnormally");
            }
        }
    }
}

fn record_sweep(result: &Result<SweepReport, StoreError>) {
    match result {
        Ok(report) => {
            metrics::SWEEPS.with_label_values(&["ok"]).inc();
            if report.removed > 0 {
                info!(
                    scanned = report.scanned,
                    removed = report.removed,
                    "Reconciliation sweep removed dangling tickets"
                );
            }
        }
        Err(e) => {
            metrics::SWEEPS.with_label_values(&["error"]).inc();
            warn!(error = %e, "Reconciliation sweep failed");
        }
    }
}
