//! Persistence Gateway - Backend Write Seam
//!
//! The coalescer talks to the persistence backend through this trait only.
//! The backend's schema and wire format are external contracts; from the
//! core's point of view a write either succeeds or fails with a
//! `StorageError`, and is never retried automatically.
//!
//! `MemoryGateway` is the reference implementation: an in-memory upsert
//! store with a write log and switchable failure injection. It backs the
//! crate's own tests and is useful as a stand-in backend downstream.

use super::patch::ResponsePatch;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Gateway Trait
// ============================================================================

/// Gateway write failure
#[derive(Debug, Clone, thiserror::Error)]
#[error("Storage write failed: {message}")]
pub struct StorageError {
    pub message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Write access to the persistence backend.
///
/// Implementations may be slow and may fail; callers own all policy around
/// both (the coalescer surfaces outcomes and moves on).
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a merged payload for one entity
    async fn write(&self, entity_key: &str, payload: ResponsePatch) -> Result<(), StorageError>;
}

// ============================================================================
// In-Memory Gateway
// ============================================================================

/// In-memory reference backend.
///
/// Writes upsert field-wise into a per-entity record, and every write is
/// appended to a log so tests can assert on exact write counts and payloads.
#[derive(Default)]
pub struct MemoryGateway {
    records: Mutex<HashMap<String, ResponsePatch>>,
    write_log: Mutex<Vec<(String, ResponsePatch)>>,
    failing: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make all subsequent writes fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Current stored record for an entity
    pub fn record(&self, entity_key: &str) -> Option<ResponsePatch> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(entity_key)
            .cloned()
    }

    /// Number of successful writes for an entity
    pub fn write_count(&self, entity_key: &str) -> usize {
        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(key, _)| key == entity_key)
            .count()
    }

    /// Total successful writes across all entities
    pub fn total_writes(&self) -> usize {
        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Full write log, oldest first
    pub fn write_log(&self) -> Vec<(String, ResponsePatch)> {
        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn write(&self, entity_key: &str, payload: ResponsePatch) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StorageError::new(format!(
                "simulated backend failure for '{}'",
                entity_key
            )));
        }

        {
            let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
            records
                .entry(entity_key.to_string())
                .or_default()
                .merge(payload.clone());
        }

        self.write_log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((entity_key.to_string(), payload));

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
