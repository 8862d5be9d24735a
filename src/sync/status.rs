//! Sync Status Tracker
//!
//! Derives a small observable status from coalescer activity and flush
//! outcomes. The tracker is the only writer of the status snapshot; the
//! coalescer reports events into it and UI layers consume it either by
//! pulling `snapshot()` or by subscribing to the watch channel.
//!
//! State machine:
//! - any schedule -> `syncing` (optimistic, before the timer fires)
//! - flush success -> `synced` + timestamp
//! - flush failure -> `error`, sticky until the next schedule
//!
//! A periodic poll task covers pending writes scheduled by components other
//! than the one rendering the indicator: it forces `syncing` whenever the
//! coalescer has pending entries but the status says otherwise.

use super::coalescer::WriteCoalescer;
use super::gateway::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

// ============================================================================
// Status Model
// ============================================================================

/// Current sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
        }
    }
}

/// Read-only status snapshot exposed to UI layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    pub status: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncSnapshot {
    fn default() -> Self {
        Self {
            status: SyncState::Idle,
            last_synced_at: None,
            last_error: None,
        }
    }
}

/// Tracker lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Status poll is already running")]
    AlreadyRunning,

    #[error("Status poll is not running")]
    NotRunning,
}

// ============================================================================
// Tracker
// ============================================================================

/// Observable sync status derived from coalescer events
#[derive(Clone)]
pub struct SyncStatusTracker {
    snapshot: Arc<Mutex<SyncSnapshot>>,
    changes: Arc<watch::Sender<SyncSnapshot>>,
    poll_running: Arc<AtomicBool>,
    poll_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Default for SyncStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        let initial = SyncSnapshot::default();
        let (tx, _rx) = watch::channel(initial.clone());
        Self {
            snapshot: Arc::new(Mutex::new(initial)),
            changes: Arc::new(tx),
            poll_running: Arc::new(AtomicBool::new(false)),
            poll_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Pull the current status snapshot
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.changes.subscribe()
    }

    /// A write was scheduled; optimistically report `syncing`
    pub fn on_scheduled(&self) {
        self.update(|snap| {
            snap.status = SyncState::Syncing;
        });
    }

    /// A flush reached the backend successfully
    pub fn on_flush_success(&self) {
        self.update(|snap| {
            snap.status = SyncState::Synced;
            snap.last_synced_at = Some(Utc::now());
            snap.last_error = None;
        });
    }

    /// A flush failed; sticky until the next schedule starts a new cycle
    pub fn on_flush_error(&self, error: &StorageError) {
        log::warn!("Sync flush failed: {}", error);
        self.update(|snap| {
            snap.status = SyncState::Error;
            snap.last_error = Some(error.message.clone());
        });
    }

    fn update(&self, mutate: impl FnOnce(&mut SyncSnapshot)) {
        let updated = {
            let mut snap = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            let before = snap.clone();
            mutate(&mut snap);
            if *snap == before {
                // Nothing changed; don't wake subscribers
                return;
            }
            snap.clone()
        };
        let _ = self.changes.send(updated);
    }

    // ========================================================================
    // Background Poll
    // ========================================================================

    /// Start the periodic poll task.
    ///
    /// The poll forces `syncing` whenever the coalescer holds pending
    /// entries but the current status claims otherwise. It never downgrades
    /// the status on its own; flush outcomes do that.
    pub fn start_poll(
        &self,
        coalescer: WriteCoalescer,
        interval: Duration,
    ) -> Result<(), TrackerError> {
        if self.poll_running.load(Ordering::Relaxed) {
            return Err(TrackerError::AlreadyRunning);
        }
        self.poll_running.store(true, Ordering::Relaxed);

        let running = self.poll_running.clone();
        let tracker = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately; skip it so the poll is periodic
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::Relaxed) {
                    break;
                }

                if coalescer.has_pending() {
                    tracker.update(|snap| {
                        if snap.status != SyncState::Syncing {
                            snap.status = SyncState::Syncing;
                        }
                    });
                }
            }
        });

        *self.poll_handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        log::info!("Sync status poll started (interval: {:?})", interval);
        Ok(())
    }

    /// Stop the periodic poll task
    pub fn stop_poll(&self) -> Result<(), TrackerError> {
        if !self.poll_running.load(Ordering::Relaxed) {
            return Err(TrackerError::NotRunning);
        }
        self.poll_running.store(false, Ordering::Relaxed);

        if let Some(handle) = self
            .poll_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        log::info!("Sync status poll stopped");
        Ok(())
    }

    /// Check if the poll task is currently running
    pub fn is_polling(&self) -> bool {
        self.poll_running.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================
