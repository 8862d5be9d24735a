//! Wizard Module - Section-Gated Progress
//!
//! The progress state machine and the session glue that ties it to the sync
//! engine: every section completion schedules that section's accumulated
//! responses as a coalesced backend write.

pub mod progress;
pub mod session;

// Re-export commonly used types
pub use progress::{
    Advance, CompletedSection, FlowPosition, ProgressError, ProgressTracker, SectionDef,
};
pub use session::{SessionConfig, SessionStep, WizardSession};
