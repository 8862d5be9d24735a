//! Progress Tracking - Section-Gated Wizard State Machine
//!
//! Tracks the `(section, question)` pointer through a fixed, ordered list of
//! sections, records which sections are fully completed, and enforces the
//! forward lock: once a section has been completed (its payload flushed as
//! final), stepping back into it is refused. Completed-section payloads are
//! treated as append-only by downstream consumers, so silent re-entry would
//! corrupt derived data.
//!
//! Transitions never fail. A refused transition is a no-op; callers that
//! need to inform the user compare the position before and after.

use serde::{Deserialize, Serialize};

// ============================================================================
// Data Types
// ============================================================================

/// One section of the wizard, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDef {
    pub id: String,
    pub title: String,
    pub question_count: usize,
}

impl SectionDef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, question_count: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            question_count,
        }
    }
}

/// Bookkeeping entry for a completed section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSection {
    pub id: String,
    pub title: String,
    pub skipped: bool,
}

/// Current `(section, question)` pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPosition {
    pub section: usize,
    pub question: usize,
}

impl FlowPosition {
    pub fn new(section: usize, question: usize) -> Self {
        Self { section, question }
    }
}

/// Outcome of a forward transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the next question within the current section
    Question(FlowPosition),
    /// Completed a section and moved to the first question of the next one
    SectionCompleted {
        section: usize,
        resumed_at: FlowPosition,
    },
    /// Completed the final section; the wizard is done
    Finished { section: usize },
    /// Nothing to advance (wizard already finished)
    NoOp,
}

/// Progress errors. Transitions themselves never fail; only construction
/// and lookups do.
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Unknown section id: {0}")]
    UnknownSection(String),

    #[error("Wizard requires at least one section")]
    NoSections,
}

// ============================================================================
// Tracker
// ============================================================================

/// Section-gated progress state machine
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    sections: Vec<SectionDef>,
    position: FlowPosition,
    completed: Vec<CompletedSection>,
    /// Highest completed section index; monotonically non-decreasing.
    /// `None` means nothing has been completed yet.
    last_completed: Option<usize>,
    /// Pointer saved by a jump, restored by its matching restore
    saved_position: Option<FlowPosition>,
    finished: bool,
}

impl ProgressTracker {
    /// Create a tracker positioned at the first question of the first
    /// section. An empty section list is rejected here so that transitions
    /// and `current_section` can stay infallible.
    pub fn new(sections: Vec<SectionDef>) -> Result<Self, ProgressError> {
        if sections.is_empty() {
            return Err(ProgressError::NoSections);
        }
        Ok(Self {
            sections,
            position: FlowPosition::new(0, 0),
            completed: Vec::new(),
            last_completed: None,
            saved_position: None,
            finished: false,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn position(&self) -> FlowPosition {
        self.position
    }

    pub fn sections(&self) -> &[SectionDef] {
        &self.sections
    }

    pub fn current_section(&self) -> &SectionDef {
        &self.sections[self.position.section]
    }

    pub fn completed_sections(&self) -> &[CompletedSection] {
        &self.completed
    }

    /// Highest completed section index, `None` if nothing is completed yet
    pub fn last_completed_index(&self) -> Option<usize> {
        self.last_completed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True if stepping back into `section` is refused by the forward lock
    pub fn is_locked(&self, section: usize) -> bool {
        self.last_completed.map_or(false, |last| section <= last)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Step forward one question; completing a section when the pointer is
    /// on its last question.
    pub fn advance_question(&mut self) -> Advance {
        if self.finished {
            return Advance::NoOp;
        }

        let section = self.position.section;
        if self.position.question + 1 < self.sections[section].question_count {
            self.position.question += 1;
            return Advance::Question(self.position);
        }

        self.complete_current(false)
    }

    /// Complete the current section without requiring its questions answered
    pub fn skip_section(&mut self) -> Advance {
        if self.finished {
            return Advance::NoOp;
        }
        self.complete_current(true)
    }

    fn complete_current(&mut self, skipped: bool) -> Advance {
        let section = self.position.section;
        let def = &self.sections[section];

        // Monotonic: a jump back can complete an earlier section without
        // lowering the high-water mark
        self.last_completed = Some(self.last_completed.map_or(section, |l| l.max(section)));
        self.completed.push(CompletedSection {
            id: def.id.clone(),
            title: def.title.clone(),
            skipped,
        });

        if section + 1 == self.sections.len() {
            self.finished = true;
            Advance::Finished { section }
        } else {
            self.position = FlowPosition::new(section + 1, 0);
            Advance::SectionCompleted {
                section,
                resumed_at: self.position,
            }
        }
    }

    /// Step back one question. Refused (no-op) at the very first question,
    /// in the terminal state, and when the previous section is
    /// forward-locked; returns the resulting position either way.
    pub fn retreat_question(&mut self) -> FlowPosition {
        if self.finished {
            // The final section is completed; stepping back inside it would
            // bypass the forward lock
            return self.position;
        }

        if self.position.question > 0 {
            self.position.question -= 1;
            return self.position;
        }

        if self.position.section == 0 {
            return self.position;
        }

        let target = self.position.section - 1;
        if self.is_locked(target) {
            // Forward lock: completed sections are append-only downstream
            return self.position;
        }

        let last_question = self.sections[target].question_count.saturating_sub(1);
        self.position = FlowPosition::new(target, last_question);
        self.position
    }

    /// Jump to the first question of a section by id, remembering the
    /// current pointer for a later restore.
    pub fn jump_to_section(&mut self, id: &str) -> Result<FlowPosition, ProgressError> {
        let index = self
            .sections
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ProgressError::UnknownSection(id.to_string()))?;

        self.saved_position = Some(self.position);
        self.position = FlowPosition::new(index, 0);
        self.finished = false;
        Ok(self.position)
    }

    /// Restore the pointer saved by the last jump and clear it.
    /// Returns `None` (no-op) if no jump is outstanding.
    pub fn restore_previous_position(&mut self) -> Option<FlowPosition> {
        let saved = self.saved_position.take()?;
        self.position = saved;
        Some(saved)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn three_sections() -> Vec<SectionDef> {
        vec![
            SectionDef::new("contact", "Contact", 2),
            SectionDef::new("education", "Education", 3),
            SectionDef::new("experience", "Experience", 2),
        ]
    }

    #[test]
    fn test_starts_at_origin() {
        let tracker = ProgressTracker::new(three_sections()).unwrap();
        assert_eq!(tracker.position(), FlowPosition::new(0, 0));
        assert_eq!(tracker.last_completed_index(), None);
        assert!(!tracker.is_finished());
    }

    #[test]
    fn test_advance_within_section() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        let outcome = tracker.advance_question();
        assert_eq!(outcome, Advance::Question(FlowPosition::new(0, 1)));
    }

    #[test]
    fn test_advance_completes_section() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        tracker.advance_question();
        let outcome = tracker.advance_question();

        assert_eq!(
            outcome,
            Advance::SectionCompleted {
                section: 0,
                resumed_at: FlowPosition::new(1, 0),
            }
        );
        assert_eq!(tracker.last_completed_index(), Some(0));
        assert_eq!(tracker.completed_sections().len(), 1);
        assert_eq!(tracker.completed_sections()[0].id, "contact");
        assert!(!tracker.completed_sections()[0].skipped);
    }

    #[test]
    fn test_full_walk_completes_all_sections() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();

        let mut finished = false;
        for _ in 0..7 {
            if let Advance::Finished { section } = tracker.advance_question() {
                assert_eq!(section, 2);
                finished = true;
            }
        }

        assert!(finished);
        assert!(tracker.is_finished());
        assert_eq!(tracker.last_completed_index(), Some(2));
        assert_eq!(tracker.completed_sections().len(), 3);
        assert_eq!(tracker.advance_question(), Advance::NoOp);
    }

    #[test]
    fn test_retreat_within_section() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        tracker.advance_question();

        assert_eq!(tracker.retreat_question(), FlowPosition::new(0, 0));
    }

    #[test]
    fn test_retreat_at_origin_is_noop() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        assert_eq!(tracker.retreat_question(), FlowPosition::new(0, 0));
    }

    #[test]
    fn test_forward_lock_denies_retreat_into_completed() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();

        // complete contact (2 questions), then education (3 questions)
        for _ in 0..5 {
            tracker.advance_question();
        }
        assert_eq!(tracker.position(), FlowPosition::new(2, 0));
        assert_eq!(tracker.last_completed_index(), Some(1));

        // target index 1 <= last completed 1: denied, state unchanged
        assert_eq!(tracker.retreat_question(), FlowPosition::new(2, 0));
    }

    #[test]
    fn test_retreat_into_uncompleted_section() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();

        // skip ahead without completing: jump to education, back up
        tracker.jump_to_section("education").unwrap();
        let pos = tracker.retreat_question();

        // contact is not completed, so the retreat lands on its last question
        assert_eq!(pos, FlowPosition::new(0, 1));
    }

    #[test]
    fn test_skip_section_marks_skipped() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        let outcome = tracker.skip_section();

        assert_eq!(
            outcome,
            Advance::SectionCompleted {
                section: 0,
                resumed_at: FlowPosition::new(1, 0),
            }
        );
        assert!(tracker.completed_sections()[0].skipped);
        assert_eq!(tracker.last_completed_index(), Some(0));
    }

    #[test]
    fn test_last_completed_is_monotonic() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();

        // complete contact and education
        for _ in 0..5 {
            tracker.advance_question();
        }
        assert_eq!(tracker.last_completed_index(), Some(1));

        // completing the final section raises the high-water mark further
        tracker.skip_section();
        assert_eq!(tracker.last_completed_index(), Some(2));
    }

    #[test]
    fn test_jump_and_restore() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        tracker.advance_question(); // (0, 1)

        let jumped = tracker.jump_to_section("experience").unwrap();
        assert_eq!(jumped, FlowPosition::new(2, 0));

        let restored = tracker.restore_previous_position().unwrap();
        assert_eq!(restored, FlowPosition::new(0, 1));
        assert_eq!(tracker.position(), FlowPosition::new(0, 1));

        // Restore is one-shot
        assert!(tracker.restore_previous_position().is_none());
    }

    #[test]
    fn test_jump_unknown_section() {
        let mut tracker = ProgressTracker::new(three_sections()).unwrap();
        let result = tracker.jump_to_section("payment");

        assert!(matches!(result, Err(ProgressError::UnknownSection(_))));
        // Failed jump leaves the pointer and the saved slot untouched
        assert_eq!(tracker.position(), FlowPosition::new(0, 0));
        assert!(tracker.restore_previous_position().is_none());
    }

    #[test]
    fn test_empty_section_list_rejected() {
        let result = ProgressTracker::new(Vec::new());
        assert!(matches!(result, Err(ProgressError::NoSections)));
    }

    #[test]
    fn test_retreat_refused_in_terminal_state() {
        let mut tracker =
            ProgressTracker::new(vec![SectionDef::new("only", "Only", 2)]).unwrap();

        tracker.advance_question();
        assert_eq!(tracker.advance_question(), Advance::Finished { section: 0 });
        assert!(tracker.is_finished());

        // The final section is completed; the pointer must not move back
        // inside it
        let before = tracker.position();
        assert_eq!(before, FlowPosition::new(0, 1));
        assert_eq!(tracker.retreat_question(), before);
        assert_eq!(tracker.position(), before);
    }
}
