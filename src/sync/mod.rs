//! Sync Module - Write Coalescing and Status Tracking
//!
//! Buffers rapid local edits per entity key and flushes them as single
//! merged backend writes, with an observable sync status for UI display and
//! unload-time warnings.
//!
//! Architecture:
//! - `WriteCoalescer`: per-key pending map with sliding debounce timers;
//!   one write per edit burst, later fields win
//! - `SyncStatusTracker`: `{idle, syncing, synced, error}` derived from
//!   coalescer activity; snapshot pull + watch-channel subscription
//! - `PersistenceGateway`: the backend seam; writes succeed or fail, are
//!   never retried here

pub mod coalescer;
pub mod gateway;
pub mod patch;
pub mod status;


// Re-export commonly used types
pub use coalescer::{CoalescerConfig, FlushError, FlushHandle, WriteCoalescer};
pub use gateway::{MemoryGateway, PersistenceGateway, StorageError};
pub use patch::ResponsePatch;
pub use status::{SyncSnapshot, SyncState, SyncStatusTracker, TrackerError};
