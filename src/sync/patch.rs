//! Response Patch - Typed Partial Updates
//!
//! A `ResponsePatch` carries the fields of one edit burst for a single
//! entity. Patches are shallow: one level of named fields, each holding a
//! JSON value. Merging two patches is field-level last-write-wins, which is
//! the contract the coalescer relies on when it folds rapid edits into a
//! single outgoing write.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Partial update for a single entity.
///
/// Field order is stable (BTreeMap) so serialized payloads are
/// deterministic, which keeps backend diffs and test assertions sane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsePatch {
    fields: BTreeMap<String, Value>,
}

impl ResponsePatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Insert or overwrite a single field
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Shallow-merge `later` into this patch. Fields present in `later`
    /// overwrite fields already present here (last write wins).
    pub fn merge(&mut self, later: ResponsePatch) {
        for (field, value) in later.fields {
            self.fields.insert(field, value);
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Number of fields in the patch
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the patch carries no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over `(field, value)` pairs
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_set() {
        let patch = ResponsePatch::new()
            .set("first_name", "Max")
            .set("age", 34);

        assert_eq!(patch.len(), 2);
        assert_eq!(patch.get("first_name"), Some(&json!("Max")));
        assert_eq!(patch.get("age"), Some(&json!(34)));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut base = ResponsePatch::new()
            .set("first_name", "Max")
            .set("city", "Zurich");
        let later = ResponsePatch::new()
            .set("city", "Bern")
            .set("last_name", "Muster");

        base.merge(later);

        assert_eq!(base.len(), 3);
        assert_eq!(base.get("first_name"), Some(&json!("Max")));
        assert_eq!(base.get("city"), Some(&json!("Bern")));
        assert_eq!(base.get("last_name"), Some(&json!("Muster")));
    }

    #[test]
    fn test_merge_empty_is_noop() {
        let mut base = ResponsePatch::new().set("a", 1);
        base.merge(ResponsePatch::new());

        assert_eq!(base.len(), 1);
        assert_eq!(base.get("a"), Some(&json!(1)));
    }

    #[test]
    fn test_serialization_is_flat() {
        let patch = ResponsePatch::new()
            .set("b", 2)
            .set("a", 1);

        let serialized = serde_json::to_string(&patch).unwrap();
        // BTreeMap keeps field order stable
        assert_eq!(serialized, r#"{"a":1,"b":2}"#);

        let back: ResponsePatch = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, patch);
    }
}
