//! Write Coalescer - Debounced Per-Key Write Buffering
//!
//! Buffers rapid local edits per entity key and flushes them as a single
//! merged backend write. Each key owns one pending entry and one single-shot
//! timer; every new schedule for the key merges its patch (later fields win)
//! and restarts the timer, so the debounce window slides with every edit.
//!
//! Flush semantics:
//! - The pending entry is removed from the map *before* the gateway write is
//!   awaited. A schedule arriving during the write starts a fresh entry with
//!   its own timer; the two writes may overlap on the wire. Only the
//!   pending-merge windows are exclusive per key.
//! - Failed writes are not retried. The entry is gone either way; the
//!   outcome reaches the status tracker and every `FlushHandle` issued for
//!   the burst.
//! - `cancel_all` drops unflushed payloads. Callers needing the edits
//!   persisted must `flush_now` each key first.

use super::gateway::{PersistenceGateway, StorageError};
use super::patch::ResponsePatch;
use super::status::SyncStatusTracker;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

// ============================================================================
// Configuration
// ============================================================================

/// Coalescer configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoalescerConfig {
    /// Debounce window in milliseconds; restarted on every schedule
    pub debounce_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self { debounce_ms: 1000 }
    }
}

// ============================================================================
// Flush Handles
// ============================================================================

/// Why a scheduled update never reached the backend successfully
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlushError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Pending update was cancelled before flushing")]
    Cancelled,
}

/// Settles when the flush that absorbed this schedule call settles.
///
/// Every `schedule` call for a burst gets its own handle; all of them settle
/// with the outcome of the single merged flush.
pub struct FlushHandle {
    rx: oneshot::Receiver<Result<(), StorageError>>,
}

impl FlushHandle {
    /// Wait for the flush outcome
    pub async fn settled(self) -> Result<(), FlushError> {
        match self.rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FlushError::Storage(e)),
            Err(_) => Err(FlushError::Cancelled),
        }
    }
}

// ============================================================================
// Coalescer
// ============================================================================

/// One buffered entry per entity key
struct PendingUpdate {
    payload: ResponsePatch,
    /// Guards against a stale timer flushing an entry whose window was
    /// restarted after the timer had already fired
    generation: u64,
    timer: JoinHandle<()>,
    waiters: Vec<oneshot::Sender<Result<(), StorageError>>>,
}

/// Debounced write buffer, one pending entry per entity key.
///
/// Explicitly owned and injectable; construct one per wizard session and
/// drop or `cancel_all` it on teardown. Cheap to clone (shared interior).
#[derive(Clone)]
pub struct WriteCoalescer {
    gateway: Arc<dyn PersistenceGateway>,
    tracker: SyncStatusTracker,
    config: CoalescerConfig,
    pending: Arc<Mutex<HashMap<String, PendingUpdate>>>,
    generations: Arc<AtomicU64>,
}

impl WriteCoalescer {
    /// Create a coalescer with the default debounce window
    pub fn new(gateway: Arc<dyn PersistenceGateway>, tracker: SyncStatusTracker) -> Self {
        Self::with_config(gateway, tracker, CoalescerConfig::default())
    }

    /// Create a coalescer with an explicit configuration
    pub fn with_config(
        gateway: Arc<dyn PersistenceGateway>,
        tracker: SyncStatusTracker,
        config: CoalescerConfig,
    ) -> Self {
        Self {
            gateway,
            tracker,
            config,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule a partial update using the configured debounce window
    pub fn schedule(&self, key: &str, patch: ResponsePatch) -> FlushHandle {
        self.schedule_with_delay(key, patch, Duration::from_millis(self.config.debounce_ms))
    }

    /// Schedule a partial update with an explicit debounce window.
    ///
    /// Never fails synchronously; flush failures surface through the
    /// returned handle and the status tracker only.
    pub fn schedule_with_delay(
        &self,
        key: &str,
        patch: ResponsePatch,
        delay: Duration,
    ) -> FlushHandle {
        let (tx, rx) = oneshot::channel();
        self.tracker.on_scheduled();

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        match pending.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.payload.merge(patch);
                entry.timer.abort();
                entry.generation = generation;
                entry.timer = self.spawn_timer(key.to_string(), generation, delay);
                entry.waiters.push(tx);
                log::debug!(
                    "Coalesced update for '{}' ({} fields buffered), window restarted",
                    key,
                    entry.payload.len()
                );
            }
            Entry::Vacant(vacant) => {
                log::debug!("Buffering first update for '{}' ({:?} window)", key, delay);
                vacant.insert(PendingUpdate {
                    payload: patch,
                    generation,
                    timer: self.spawn_timer(key.to_string(), generation, delay),
                    waiters: vec![tx],
                });
            }
        }

        FlushHandle { rx }
    }

    fn spawn_timer(&self, key: String, generation: u64, delay: Duration) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.flush(&key, generation).await;
        })
    }

    /// Timer-driven flush. Removes the entry first, then performs the write,
    /// so new schedules during the write open a fresh pending window.
    async fn flush(&self, key: &str, generation: u64) {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.get(key) {
                // A restarted window supersedes this timer
                Some(e) if e.generation == generation => pending.remove(key),
                _ => None,
            }
        };
        let Some(entry) = entry else {
            return;
        };

        self.write_and_settle(key, entry.payload, entry.waiters).await;
    }

    /// Force-flush a key immediately, bypassing its timer.
    ///
    /// Returns `None` if nothing was pending for the key.
    pub async fn flush_now(&self, key: &str) -> Option<Result<(), StorageError>> {
        let entry = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.remove(key)
        };
        let entry = entry?;
        entry.timer.abort();

        log::debug!("Force-flushing '{}'", key);
        Some(self.write_and_settle(key, entry.payload, entry.waiters).await)
    }

    async fn write_and_settle(
        &self,
        key: &str,
        payload: ResponsePatch,
        waiters: Vec<oneshot::Sender<Result<(), StorageError>>>,
    ) -> Result<(), StorageError> {
        let field_count = payload.len();
        let result = self.gateway.write(key, payload).await;

        match &result {
            Ok(()) => {
                log::debug!("Flushed '{}' ({} fields)", key, field_count);
                self.tracker.on_flush_success();
            }
            Err(e) => {
                // No retry: the entry is already gone, the error is surfaced
                log::error!("Flush for '{}' failed: {}", key, e);
                self.tracker.on_flush_error(e);
            }
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
        result
    }

    /// Cancel every outstanding timer without flushing.
    ///
    /// Unflushed edits are discarded; their handles settle as `Cancelled`.
    /// Returns the number of discarded entries.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingUpdate)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };

        let count = drained.len();
        if count > 0 {
            log::warn!(
                "Discarding {} pending update(s) without flushing; unsynced edits are lost",
                count
            );
        }
        for (_, entry) in drained {
            entry.timer.abort();
            // Dropping the waiters settles their handles as Cancelled
        }
        count
    }

    /// True if any key currently has a buffered, unflushed update
    pub fn has_pending(&self) -> bool {
        !self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Keys with buffered updates, for diagnostics and unload warnings
    pub fn pending_keys(&self) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Advisory drain: poll until the pending map empties or the timeout
    /// elapses. Returns true once drained. In-flight gateway writes are not
    /// tracked, so this delays teardown but cannot guarantee persistence.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.has_pending() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::gateway::MemoryGateway;
    use serde_json::json;

    fn setup() -> (Arc<MemoryGateway>, SyncStatusTracker, WriteCoalescer) {
        let gateway = Arc::new(MemoryGateway::new());
        let tracker = SyncStatusTracker::new();
        let coalescer = WriteCoalescer::new(gateway.clone(), tracker.clone());
        (gateway, tracker, coalescer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_schedule_flushes_once() {
        let (gateway, _, coalescer) = setup();

        let handle = coalescer.schedule("profile", ResponsePatch::new().set("first_name", "Max"));
        assert!(coalescer.has_pending());

        handle.settled().await.unwrap();

        assert!(!coalescer.has_pending());
        assert_eq!(gateway.write_count("profile"), 1);
        let record = gateway.record("profile").unwrap();
        assert_eq!(record.get("first_name"), Some(&json!("Max")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_merges_into_single_write() {
        let (gateway, _, coalescer) = setup();

        let h1 = coalescer.schedule("profile", ResponsePatch::new().set("a", 1));
        let h2 = coalescer.schedule("profile", ResponsePatch::new().set("b", 2));
        let h3 = coalescer.schedule("profile", ResponsePatch::new().set("a", 3));

        h1.settled().await.unwrap();
        h2.settled().await.unwrap();
        h3.settled().await.unwrap();

        assert_eq!(gateway.write_count("profile"), 1);
        let (_, payload) = &gateway.write_log()[0];
        assert_eq!(payload.get("a"), Some(&json!(3))); // later write wins
        assert_eq!(payload.get("b"), Some(&json!(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_with_each_schedule() {
        let (gateway, _, coalescer) = setup();

        // schedule at t=0, again at t=400; window now ends at t=1400
        let h1 = coalescer.schedule("profile", ResponsePatch::new().set("first_name", "Max"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        let h2 = coalescer.schedule("profile", ResponsePatch::new().set("last_name", "Muster"));

        // t=1250: past the first window's original end, before the restarted one
        tokio::time::sleep(Duration::from_millis(850)).await;
        assert_eq!(gateway.total_writes(), 0);
        assert!(coalescer.has_pending());

        h1.settled().await.unwrap();
        h2.settled().await.unwrap();

        assert_eq!(gateway.write_count("profile"), 1);
        let record = gateway.record("profile").unwrap();
        assert_eq!(record.get("first_name"), Some(&json!("Max")));
        assert_eq!(record.get("last_name"), Some(&json!("Muster")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let (gateway, _, coalescer) = setup();

        let h1 = coalescer.schedule("contact", ResponsePatch::new().set("email", "a@b.c"));
        let h2 = coalescer.schedule("education", ResponsePatch::new().set("degree", "MSc"));

        h1.settled().await.unwrap();
        h2.settled().await.unwrap();

        assert_eq!(gateway.write_count("contact"), 1);
        assert_eq!(gateway.write_count("education"), 1);
        assert!(gateway.record("contact").unwrap().get("degree").is_none());
        assert!(gateway.record("education").unwrap().get("email").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_discards_pending() {
        let (gateway, _, coalescer) = setup();

        let h1 = coalescer.schedule("contact", ResponsePatch::new().set("a", 1));
        let h2 = coalescer.schedule("education", ResponsePatch::new().set("b", 2));

        assert_eq!(coalescer.cancel_all(), 2);
        assert!(!coalescer.has_pending());

        assert!(matches!(h1.settled().await, Err(FlushError::Cancelled)));
        assert!(matches!(h2.settled().await, Err(FlushError::Cancelled)));

        // Waiting past the window produces no writes for the cancelled keys
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(gateway.total_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_is_not_retried() {
        let (gateway, tracker, coalescer) = setup();
        gateway.set_failing(true);

        let handle = coalescer.schedule("profile", ResponsePatch::new().set("a", 1));
        let outcome = handle.settled().await;

        assert!(matches!(outcome, Err(FlushError::Storage(_))));
        assert_eq!(tracker.snapshot().status, crate::sync::SyncState::Error);
        // Entry is gone; nothing left to retry
        assert!(!coalescer.has_pending());
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(gateway.total_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_now_bypasses_timer() {
        let (gateway, _, coalescer) = setup();

        let handle = coalescer.schedule("profile", ResponsePatch::new().set("a", 1));
        let result = coalescer.flush_now("profile").await;

        assert!(matches!(result, Some(Ok(()))));
        assert_eq!(gateway.write_count("profile"), 1);
        assert!(!coalescer.has_pending());
        handle.settled().await.unwrap();

        // Nothing pending for an unknown key
        assert!(coalescer.flush_now("unknown").await.is_none());

        // The aborted timer must not produce a second write
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(gateway.write_count("profile"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_after_flush_starts_new_entry() {
        let (gateway, _, coalescer) = setup();

        let h1 = coalescer.schedule("profile", ResponsePatch::new().set("a", 1));
        h1.settled().await.unwrap();

        let h2 = coalescer.schedule("profile", ResponsePatch::new().set("b", 2));
        h2.settled().await.unwrap();

        assert_eq!(gateway.write_count("profile"), 2);
        let log = gateway.write_log();
        assert!(log[0].1.get("b").is_none());
        assert!(log[1].1.get("a").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_idle_drains() {
        let (_, _, coalescer) = setup();

        coalescer.schedule("profile", ResponsePatch::new().set("a", 1));
        assert!(coalescer.wait_idle(Duration::from_secs(5)).await);
        assert!(!coalescer.has_pending());
    }
}
