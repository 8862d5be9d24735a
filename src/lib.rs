//! # formwizard
//!
//! Core engine for multi-step data-collection wizards: a write-coalescing
//! sync layer that folds rapid edits into single backend writes, and a
//! section-gated progress state machine with a forward-lock invariant that
//! keeps completed sections append-only.
//!
//! Form rendering, validation UI, authentication, and the backend schema
//! are external; this crate owns the timing behavior, the pending-update
//! lifecycle, and the progress invariants.

pub mod sync;
pub mod wizard;

pub use sync::{
    CoalescerConfig, FlushError, FlushHandle, MemoryGateway, PersistenceGateway, ResponsePatch,
    StorageError, SyncSnapshot, SyncState, SyncStatusTracker, TrackerError, WriteCoalescer,
};
pub use wizard::{
    Advance, CompletedSection, FlowPosition, ProgressError, ProgressTracker, SectionDef,
    SessionConfig, SessionStep, WizardSession,
};
