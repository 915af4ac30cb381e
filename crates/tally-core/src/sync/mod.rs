//! Synchronization engine.
//!
//! Drains the durable record queue to the intake service. An explicit
//! finite-state machine with injected storage, connectivity, and submission
//! dependencies: triggers are connectivity transitions, new captures while
//! online, and manual sync requests. Only one drain session may be active
//! at a time, system-wide.

mod backoff;

pub use backoff::BackoffPolicy;

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::net::NetworkMonitor;
use crate::services::RecordStore;
use crate::submit::{SubmissionClient, SubmitOutcome};
use crate::util::unix_timestamp_millis;
use crate::Result;

/// Engine-wide state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No drain session active
    Idle,
    /// A drain session is delivering pending records
    Draining,
    /// Halted on credential expiry; resumes only on a fresh trigger after
    /// the auth layer refreshes the token
    BlockedByAuth,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Draining => write!(f, "draining"),
            Self::BlockedByAuth => write!(f, "blocked-by-auth"),
        }
    }
}

/// Status surface published for UI layers after every record transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub state: EngineState,
    /// Records still awaiting delivery (pending + retryable failed)
    pub pending_count: usize,
    /// When the last drain pass completed (Unix ms)
    pub last_sync_time: Option<i64>,
    /// Most recent engine-level problem, when there is one
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Whether a drain session is currently active
    #[must_use]
    pub const fn sync_in_progress(&self) -> bool {
        matches!(self.state, EngineState::Draining)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            pending_count: 0,
            last_sync_time: None,
            last_error: None,
        }
    }
}

/// Counters for one completed drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Records actually submitted during this pass
    pub submitted: usize,
    /// Accepted by the server
    pub succeeded: usize,
    /// Rejected (permanently or transiently)
    pub failed: usize,
    /// True when the pass stopped early on credential expiry
    pub halted_on_auth: bool,
}

struct EngineInner {
    store: RecordStore,
    client: Arc<dyn SubmissionClient>,
    network: NetworkMonitor,
    backoff: BackoffPolicy,
    status: watch::Sender<SyncStatus>,
    trigger: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
    drain_lock: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// The offline-first synchronization engine.
///
/// Constructed once per process and handed to interface layers by
/// reference; cloning is cheap and shares the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine over the given store, client, and monitor.
    ///
    /// The published status starts from what the store already knows, so a
    /// restarted app immediately shows its true pending count.
    pub async fn new(
        store: RecordStore,
        client: Arc<dyn SubmissionClient>,
        network: NetworkMonitor,
        backoff: BackoffPolicy,
    ) -> Result<Self> {
        let pending_count = store.count_pending().await?;
        let last_sync_time = store.last_sync_time().await?;
        let (status, _) = watch::channel(SyncStatus {
            state: EngineState::Idle,
            pending_count,
            last_sync_time,
            last_error: None,
        });
        // Capacity 1: a full buffer already represents a queued drain, so
        // concurrent triggers coalesce
        let (trigger, trigger_rx) = mpsc::channel(1);

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                client,
                network,
                backoff,
                status,
                trigger,
                trigger_rx: Mutex::new(Some(trigger_rx)),
                drain_lock: Mutex::new(()),
                worker: Mutex::new(None),
            }),
        })
    }

    /// Spawn the background worker that reacts to triggers and connectivity
    /// transitions. Calling twice is a no-op.
    pub async fn start(&self) {
        let mut slot = self.inner.trigger_rx.lock().await;
        let Some(trigger_rx) = slot.take() else {
            tracing::warn!("sync engine already started");
            return;
        };
        drop(slot);

        let connectivity = self.inner.network.subscribe();
        let engine = self.clone();
        let handle = tokio::spawn(engine.run_worker(trigger_rx, connectivity));
        *self.inner.worker.lock().await = Some(handle);
        tracing::info!("sync engine started");
    }

    /// Tear the worker down. Records claimed by an interrupted pass are
    /// reclaimed by crash recovery the next time the store opens.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.worker.lock().await.take() {
            handle.abort();
            self.publish(|status| {
                if status.state == EngineState::Draining {
                    status.state = EngineState::Idle;
                }
            });
            tracing::info!("sync engine stopped");
        }
    }

    /// Ask for a drain; a no-op while one is already queued or running.
    pub fn request_sync(&self) {
        let _ = self.inner.trigger.try_send(());
    }

    /// Tell the engine a record was just appended: refresh the published
    /// pending count and, when online, kick off a drain.
    pub async fn notify_appended(&self) -> Result<()> {
        self.refresh_pending_count().await?;
        if self.inner.network.currently_online() {
            self.request_sync();
        }
        Ok(())
    }

    /// Snapshot of the published status
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch status updates (for UI layers)
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    /// Run one drain pass right now.
    ///
    /// Returns an empty summary without touching anything when offline or
    /// when another pass already holds the drain lock (coalescing).
    pub async fn sync_now(&self) -> Result<DrainSummary> {
        if !self.inner.network.currently_online() {
            tracing::debug!("offline; skipping drain");
            return Ok(DrainSummary::default());
        }

        let Ok(_guard) = self.inner.drain_lock.try_lock() else {
            tracing::debug!("drain already in progress; coalescing trigger");
            return Ok(DrainSummary::default());
        };

        self.publish(|status| {
            status.state = EngineState::Draining;
            status.last_error = None;
        });

        match self.drain_loop().await {
            Ok(summary) => {
                if summary.halted_on_auth {
                    self.publish(|status| {
                        status.state = EngineState::BlockedByAuth;
                        status.last_error =
                            Some("authentication expired; sync halted".to_string());
                    });
                } else {
                    let completed_at = unix_timestamp_millis();
                    self.inner.store.set_last_sync_time(completed_at).await?;
                    self.publish(|status| {
                        status.state = EngineState::Idle;
                        status.last_sync_time = Some(completed_at);
                    });
                }
                self.refresh_pending_count().await?;
                tracing::info!(
                    submitted = summary.submitted,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "drain pass finished"
                );
                Ok(summary)
            }
            Err(error) => {
                // Storage failures must surface, never vanish
                self.publish(|status| {
                    status.state = EngineState::Idle;
                    status.last_error = Some(error.to_string());
                });
                Err(error)
            }
        }
    }

    async fn run_worker(
        self,
        mut trigger_rx: mpsc::Receiver<()>,
        mut connectivity: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break; // monitor dropped
                    }
                    let online = *connectivity.borrow_and_update();
                    if online {
                        tracing::info!("connectivity restored; draining queue");
                        self.drain_and_report().await;
                    }
                }
                received = trigger_rx.recv() => {
                    match received {
                        None => break,
                        Some(()) => {
                            if self.inner.network.currently_online() {
                                self.drain_and_report().await;
                            } else {
                                tracing::debug!("sync requested while offline; deferring");
                            }
                        }
                    }
                }
            }
        }
    }

    async fn drain_and_report(&self) {
        if let Err(error) = self.sync_now().await {
            tracing::warn!("drain pass failed: {error}");
        }
    }

    /// The drain session: deliver eligible records oldest-first, looping so
    /// a pass naturally picks up records appended while it runs.
    async fn drain_loop(&self) -> Result<DrainSummary> {
        let mut summary = DrainSummary::default();

        loop {
            let now = unix_timestamp_millis();
            let batch = self.inner.store.list_eligible(now).await?;
            if batch.is_empty() {
                return Ok(summary);
            }

            let mut any_transitioned = false;
            for record in batch {
                if !self.inner.store.mark_syncing(&record.id).await? {
                    tracing::debug!(id = %record.id, "record no longer claimable; skipping");
                    continue;
                }
                summary.submitted += 1;

                let outcome = match self.inner.client.submit(&record).await {
                    Ok(outcome) => outcome,
                    Err(error) => {
                        // Local fault (not a server verdict): release the
                        // claim so the record isn't stranded in syncing
                        self.inner.store.release_syncing(&record.id).await?;
                        return Err(error);
                    }
                };

                match outcome {
                    SubmitOutcome::Accepted { server_reference } => {
                        self.inner
                            .store
                            .mark_synced(&record.id, server_reference.as_deref())
                            .await?;
                        summary.succeeded += 1;
                        tracing::debug!(id = %record.id, "record accepted");
                    }
                    SubmitOutcome::RejectedPermanent { reason } => {
                        // Terminal for this record, but the batch keeps going
                        tracing::warn!(id = %record.id, %reason, "record rejected permanently");
                        self.inner.store.mark_rejected(&record.id, &reason).await?;
                        summary.failed += 1;
                    }
                    SubmitOutcome::RejectedTransient { reason } => {
                        let failures = record.attempts.saturating_add(1);
                        let next_attempt_at = self
                            .inner
                            .backoff
                            .next_attempt_at(failures, unix_timestamp_millis());
                        self.inner
                            .store
                            .mark_failed(&record.id, &reason, next_attempt_at)
                            .await?;
                        summary.failed += 1;
                        tracing::debug!(
                            id = %record.id,
                            %reason,
                            attempts = failures,
                            "transient failure; backing off"
                        );
                    }
                    SubmitOutcome::AuthExpired => {
                        // Release the claim without burning an attempt and
                        // leave the rest of the queue untouched
                        self.inner.store.release_syncing(&record.id).await?;
                        summary.halted_on_auth = true;
                        tracing::warn!(id = %record.id, "authentication expired; halting drain");
                        return Ok(summary);
                    }
                }

                any_transitioned = true;
                self.refresh_pending_count().await?;
            }

            if !any_transitioned {
                return Ok(summary);
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut SyncStatus)) {
        self.inner.status.send_modify(update);
    }

    async fn refresh_pending_count(&self) -> Result<()> {
        let pending_count = self.inner.store.count_pending().await?;
        self.publish(|status| status.pending_count = pending_count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SurveyRecord, SyncState};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Submission client driven by a script of outcomes; records every call.
    #[derive(Default)]
    struct ScriptedClient {
        outcomes: StdMutex<VecDeque<SubmitOutcome>>,
        submitted: StdMutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(outcomes: impl IntoIterator<Item = SubmitOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: StdMutex::new(outcomes.into_iter().collect()),
                submitted: StdMutex::new(Vec::new()),
            })
        }

        fn accepting() -> Arc<Self> {
            Self::new([])
        }

        fn submitted_ids(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }

        fn calls(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SubmissionClient for ScriptedClient {
        async fn submit(&self, record: &SurveyRecord) -> Result<SubmitOutcome> {
            self.submitted.lock().unwrap().push(record.id.to_string());
            Ok(self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SubmitOutcome::Accepted {
                    server_reference: None,
                }))
        }
    }

    async fn engine_with(
        client: Arc<ScriptedClient>,
        online: bool,
    ) -> (SyncEngine, RecordStore, NetworkMonitor) {
        let store = RecordStore::open_in_memory().await.unwrap();
        let network = NetworkMonitor::new(online);
        let engine = SyncEngine::new(
            store.clone(),
            client,
            network.clone(),
            BackoffPolicy::default(),
        )
        .await
        .unwrap();
        (engine, store, network)
    }

    async fn wait_for_status(engine: &SyncEngine, predicate: impl Fn(&SyncStatus) -> bool) {
        let mut rx = engine.subscribe_status();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let current = rx.borrow_and_update().clone();
                if predicate(&current) {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("status condition not reached in time");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drains_records_in_capture_order() {
        let client = ScriptedClient::accepting();
        let (engine, store, _network) = engine_with(client.clone(), true).await;

        let a = store.append(&json!({"n": 1})).await.unwrap();
        let b = store.append(&json!({"n": 2})).await.unwrap();

        let summary = engine.sync_now().await.unwrap();
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            client.submitted_ids(),
            vec![a.id.to_string(), b.id.to_string()]
        );

        let status = engine.status();
        assert_eq!(status.state, EngineState::Idle);
        assert_eq!(status.pending_count, 0);
        assert!(status.last_sync_time.is_some());

        for record in store.list_all(10, 0).await.unwrap() {
            assert_eq!(record.sync_state, SyncState::Synced);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_capture_syncs_on_connectivity() {
        let client = ScriptedClient::accepting();
        let (engine, store, network) = engine_with(client.clone(), false).await;

        for n in 0..3 {
            store.append(&json!({"n": n})).await.unwrap();
            engine.notify_appended().await.unwrap();
        }
        assert_eq!(engine.status().pending_count, 3);
        assert_eq!(client.calls(), 0);

        engine.start().await;
        network.set_online(true);

        wait_for_status(&engine, |status| {
            status.pending_count == 0 && status.state == EngineState::Idle
        })
        .await;

        assert_eq!(client.calls(), 3);
        assert!(engine.status().last_sync_time.is_some());
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn request_sync_while_offline_defers() {
        let client = ScriptedClient::accepting();
        let (engine, store, network) = engine_with(client.clone(), false).await;

        store.append(&json!({})).await.unwrap();
        engine.notify_appended().await.unwrap();
        engine.start().await;
        engine.request_sync();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.calls(), 0);
        assert_eq!(engine.status().pending_count, 1);

        network.set_online(true);
        wait_for_status(&engine, |status| status.pending_count == 0).await;
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn auth_expiry_halts_and_leaves_queue_pending() {
        let client = ScriptedClient::new([SubmitOutcome::AuthExpired]);
        let (engine, store, _network) = engine_with(client.clone(), true).await;

        store.append(&json!({"n": 1})).await.unwrap();
        store.append(&json!({"n": 2})).await.unwrap();

        let summary = engine.sync_now().await.unwrap();
        assert!(summary.halted_on_auth);
        assert_eq!(summary.submitted, 1);
        assert_eq!(client.calls(), 1);

        let status = engine.status();
        assert_eq!(status.state, EngineState::BlockedByAuth);
        assert!(!status.sync_in_progress());
        assert_eq!(status.pending_count, 2);
        assert_eq!(status.last_sync_time, None);
        for record in store.list_pending().await.unwrap() {
            assert_eq!(record.sync_state, SyncState::Pending);
            assert_eq!(record.attempts, 0);
        }

        // Fresh trigger after a token refresh drains normally
        let summary = engine.sync_now().await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(engine.status().state, EngineState::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn permanent_rejection_does_not_halt_the_batch() {
        let client = ScriptedClient::new([SubmitOutcome::RejectedPermanent {
            reason: "malformed payload (400)".to_string(),
        }]);
        let (engine, store, _network) = engine_with(client.clone(), true).await;

        let bad = store.append(&json!({"broken": true})).await.unwrap();
        let good = store.append(&json!({"n": 2})).await.unwrap();

        let summary = engine.sync_now().await.unwrap();
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);

        let rejected = store.get(&bad.id).await.unwrap().unwrap();
        assert_eq!(rejected.sync_state, SyncState::Failed);
        assert!(rejected.terminal);
        assert_eq!(rejected.last_error.as_deref(), Some("malformed payload (400)"));

        let accepted = store.get(&good.id).await.unwrap().unwrap();
        assert_eq!(accepted.sync_state, SyncState::Synced);

        // Terminal failure leaves the queue but stays visible
        assert_eq!(engine.status().pending_count, 0);
        assert_eq!(store.list_all(10, 0).await.unwrap().len(), 2);

        // No resubmission of the rejected record on a later pass
        engine.sync_now().await.unwrap();
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_failure_backs_off_until_deadline() {
        let client = ScriptedClient::new([SubmitOutcome::RejectedTransient {
            reason: "gateway timeout (504)".to_string(),
        }]);
        let (engine, store, _network) = engine_with(client.clone(), true).await;

        let record = store.append(&json!({})).await.unwrap();

        let summary = engine.sync_now().await.unwrap();
        assert_eq!(summary.failed, 1);

        let failed = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(failed.sync_state, SyncState::Failed);
        assert_eq!(failed.attempts, 1);
        assert!(failed.next_attempt_at > unix_timestamp_millis() - 1_000);

        // Still counted as pending, but not eligible before the deadline
        assert_eq!(engine.status().pending_count, 1);
        let summary = engine.sync_now().await.unwrap();
        assert_eq!(summary.submitted, 0);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn append_while_online_triggers_worker_drain() {
        let client = ScriptedClient::accepting();
        let (engine, store, _network) = engine_with(client.clone(), true).await;

        engine.start().await;
        store.append(&json!({"village": "Chandrakona"})).await.unwrap();
        engine.notify_appended().await.unwrap();

        wait_for_status(&engine, |status| {
            status.pending_count == 0 && status.state == EngineState::Idle
        })
        .await;
        assert_eq!(client.calls(), 1);
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn starting_twice_is_a_no_op() {
        let client = ScriptedClient::accepting();
        let (engine, _store, _network) = engine_with(client, true).await;

        engine.start().await;
        engine.start().await; // must not spawn a second worker
        engine.stop().await;
    }
}
