//! Wizard Session - Orchestrates Progress and Sync
//!
//! Owns the progress tracker, the write coalescer, and the status tracker
//! for one wizard run. The session accumulates answers per section, feeds
//! every edit into the coalescer as a debounced partial write, and turns
//! each section completion into a schedule of the section's full
//! accumulated payload under that section's entity key.
//!
//! Section completion never blocks on persistence: the user may advance past
//! a section whose flush later fails; the failure reaches the status
//! tracker and the flush handle asynchronously.

use crate::sync::{
    CoalescerConfig, FlushHandle, PersistenceGateway, ResponsePatch, SyncSnapshot,
    SyncStatusTracker, WriteCoalescer,
};
use crate::wizard::progress::{Advance, FlowPosition, ProgressError, ProgressTracker, SectionDef};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// Configuration
// ============================================================================

/// Session configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionConfig {
    /// Debounce window for coalesced field edits, in milliseconds
    pub debounce_ms: u64,
    /// Pause for an acknowledgement step after every N completed sections.
    /// 0 disables interstitials.
    pub interstitial_every: usize,
    /// Interval of the background status poll, in milliseconds
    pub status_poll_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            interstitial_every: 3,
            status_poll_ms: 2000,
        }
    }
}

/// Outcome of a forward step as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStep {
    /// Moved to the next question
    Question(FlowPosition),
    /// A section was completed and its payload scheduled for flush
    SectionSaved {
        section_id: String,
        resumed_at: FlowPosition,
    },
    /// Forward progress is paused until `acknowledge_interstitial`
    Interstitial,
    /// The final section was completed; the wizard is done
    Finished { section_id: String },
    /// Nothing to do (wizard already finished)
    NoOp,
}

// ============================================================================
// Session
// ============================================================================

/// One wizard run: progress, answers, and sync plumbing
pub struct WizardSession {
    id: String,
    progress: ProgressTracker,
    coalescer: WriteCoalescer,
    tracker: SyncStatusTracker,
    /// Accumulated responses per section id
    answers: HashMap<String, ResponsePatch>,
    awaiting_ack: bool,
    config: SessionConfig,
}

impl WizardSession {
    /// Create a session over the given sections and backend.
    /// Fails on an empty section list.
    pub fn new(
        sections: Vec<SectionDef>,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Self, ProgressError> {
        Self::with_config(sections, gateway, SessionConfig::default())
    }

    /// Create a session with an explicit configuration
    pub fn with_config(
        sections: Vec<SectionDef>,
        gateway: Arc<dyn PersistenceGateway>,
        config: SessionConfig,
    ) -> Result<Self, ProgressError> {
        let progress = ProgressTracker::new(sections)?;
        let tracker = SyncStatusTracker::new();
        let coalescer = WriteCoalescer::with_config(
            gateway,
            tracker.clone(),
            CoalescerConfig {
                debounce_ms: config.debounce_ms,
            },
        );

        let session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            progress,
            coalescer,
            tracker,
            answers: HashMap::new(),
            awaiting_ack: false,
            config,
        };
        log::info!(
            "Wizard session {} created ({} sections)",
            session.id,
            session.progress.sections().len()
        );
        Ok(session)
    }

    /// Start the background status poll for this session's coalescer
    pub fn start_status_poll(&self) -> Result<(), crate::sync::TrackerError> {
        self.tracker.start_poll(
            self.coalescer.clone(),
            Duration::from_millis(self.config.status_poll_ms),
        )
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Record an answer for the current section.
    ///
    /// The edit is folded into the section's accumulated responses and
    /// scheduled as a debounced partial write under the section's key.
    pub fn record_answer(&mut self, field: impl Into<String>, value: impl Into<Value>) -> FlushHandle {
        let field = field.into();
        let value = value.into();
        let section_id = self.progress.current_section().id.clone();

        self.answers
            .entry(section_id.clone())
            .or_default()
            .insert(field.clone(), value.clone());

        self.coalescer
            .schedule(&section_id, ResponsePatch::new().set(field, value))
    }

    /// Accumulated responses for a section, if any were recorded
    pub fn section_answers(&self, section_id: &str) -> Option<&ResponsePatch> {
        self.answers.get(section_id)
    }

    // ========================================================================
    // Progress Transitions
    // ========================================================================

    /// Step forward one question, completing the section on its last one.
    ///
    /// Completion schedules the section's full accumulated payload and,
    /// every `interstitial_every` completions, pauses forward progress until
    /// the interstitial is acknowledged.
    pub fn advance_question(&mut self) -> SessionStep {
        if self.awaiting_ack {
            return SessionStep::Interstitial;
        }

        match self.progress.advance_question() {
            Advance::Question(pos) => SessionStep::Question(pos),
            Advance::SectionCompleted {
                section,
                resumed_at,
            } => {
                let section_id = self.flush_section(section);
                self.maybe_arm_interstitial();
                SessionStep::SectionSaved {
                    section_id,
                    resumed_at,
                }
            }
            Advance::Finished { section } => {
                let section_id = self.flush_section(section);
                SessionStep::Finished { section_id }
            }
            Advance::NoOp => SessionStep::NoOp,
        }
    }

    /// Acknowledge the interstitial and resume forward progress
    pub fn acknowledge_interstitial(&mut self) {
        self.awaiting_ack = false;
    }

    /// True if forward progress is paused on an interstitial
    pub fn awaiting_acknowledgement(&self) -> bool {
        self.awaiting_ack
    }

    /// Step back one question; silently refused by the forward lock
    pub fn retreat_question(&mut self) -> FlowPosition {
        self.progress.retreat_question()
    }

    /// Complete the current section without answering its questions.
    /// Whatever partial payload exists is scheduled for flush. Like
    /// `advance_question`, a skip waits behind an armed interstitial.
    pub fn skip_section(&mut self) -> SessionStep {
        if self.awaiting_ack {
            return SessionStep::Interstitial;
        }

        match self.progress.skip_section() {
            Advance::SectionCompleted {
                section,
                resumed_at,
            } => {
                let section_id = self.flush_section(section);
                self.maybe_arm_interstitial();
                SessionStep::SectionSaved {
                    section_id,
                    resumed_at,
                }
            }
            Advance::Finished { section } => {
                let section_id = self.flush_section(section);
                SessionStep::Finished { section_id }
            }
            Advance::Question(pos) => SessionStep::Question(pos),
            Advance::NoOp => SessionStep::NoOp,
        }
    }

    /// Jump to a section by id for a side-quest edit
    pub fn jump_to_section(&mut self, id: &str) -> Result<FlowPosition, ProgressError> {
        self.progress.jump_to_section(id)
    }

    /// Return from a side-quest jump; no-op if none is outstanding
    pub fn restore_previous_position(&mut self) -> Option<FlowPosition> {
        self.progress.restore_previous_position()
    }

    fn flush_section(&mut self, section: usize) -> String {
        let section_id = self.progress.sections()[section].id.clone();
        let payload = self.answers.get(&section_id).cloned().unwrap_or_default();

        log::info!(
            "Section '{}' completed; scheduling {} field(s) for flush",
            section_id,
            payload.len()
        );
        // Scheduled, not awaited: a later flush failure surfaces through the
        // status tracker, never by blocking the transition
        let _ = self.coalescer.schedule(&section_id, payload);
        section_id
    }

    fn maybe_arm_interstitial(&mut self) {
        let every = self.config.interstitial_every;
        if every == 0 {
            return;
        }
        if self.progress.completed_sections().len() % every == 0 {
            self.awaiting_ack = true;
        }
    }

    // ========================================================================
    // Read Access & Teardown
    // ========================================================================

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn coalescer(&self) -> &WriteCoalescer {
        &self.coalescer
    }

    /// Current sync status snapshot
    pub fn sync_state(&self) -> SyncSnapshot {
        self.tracker.snapshot()
    }

    /// Subscribe to sync status changes
    pub fn subscribe_sync(&self) -> watch::Receiver<SyncSnapshot> {
        self.tracker.subscribe()
    }

    /// True if edits are buffered but not yet flushed
    pub fn has_unsaved_changes(&self) -> bool {
        self.coalescer.has_pending()
    }

    /// Advisory unload guard: true means closing now would lose edits.
    /// Callers should warn the user; nothing here blocks the exit.
    pub fn close_guard(&self) -> bool {
        let pending = self.coalescer.has_pending();
        if pending {
            log::warn!(
                "Session {} closing with pending updates for {:?}",
                self.id,
                self.coalescer.pending_keys()
            );
        }
        pending
    }

    /// Tear the session down: stop the poll and cancel outstanding timers.
    /// Unflushed edits are discarded (logged by the coalescer).
    pub fn teardown(&mut self) {
        if self.tracker.is_polling() {
            let _ = self.tracker.stop_poll();
        }
        let discarded = self.coalescer.cancel_all();
        log::info!(
            "Wizard session {} torn down ({} pending update(s) discarded)",
            self.id,
            discarded
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
