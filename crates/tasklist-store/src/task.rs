//! The task record, the canonical collection payload.
//!
//! Stored as a JSON array of objects:
//!
//! ```json
//! [{"id": "1", "text": "buy milk", "completed": false, "createdAt": 1700000000000}]
//! ```
//!
//! Timestamps are integer milliseconds.

use serde::{Deserialize, Serialize};

use crate::prune::{Entity, Prunable};
use crate::shape::{RecordShape, Shape, ValueKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    pub completed: bool,
    /// Creation time; `0` for records written before it was tracked.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

impl Task {
    pub fn new(id: impl Into<String>, text: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            completed: false,
            created_at,
            completed_at: None,
        }
    }

    /// Flip completion, stamping or clearing `completed_at`.
    pub fn toggle(&mut self, now: u64) {
        self.completed = !self.completed;
        self.completed_at = self.completed.then_some(now);
    }

    /// Shape of a stored task list.
    pub fn shape() -> Shape {
        Shape::Collection(Self::record_shape())
    }

    pub fn record_shape() -> RecordShape {
        RecordShape::new()
            .required("id", ValueKind::String)
            .required("text", ValueKind::String)
            .required("completed", ValueKind::Bool)
            .optional("createdAt", ValueKind::Unsigned)
            .optional("completedAt", ValueKind::Unsigned)
            .identified_by("id")
    }
}

impl Entity for Task {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Incomplete tasks are protected; completed ones are pruned oldest
/// completion first.
impl Prunable for Task {
    fn is_protected(&self) -> bool {
        !self.completed
    }

    fn age_key(&self) -> u64 {
        self.completed_at.unwrap_or(self.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::validate;

    #[test]
    fn serializes_camel_case_without_empty_completion() {
        let task = Task::new("1", "write docs", 42);
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "1", "text": "write docs", "completed": false, "createdAt": 42})
        );
    }

    #[test]
    fn toggle_stamps_completion_time() {
        let mut task = Task::new("1", "a", 10);
        task.toggle(20);
        assert!(task.completed);
        assert_eq!(task.completed_at, Some(20));
        assert_eq!(task.age_key(), 20);

        task.toggle(30);
        assert!(!task.completed);
        assert_eq!(task.completed_at, None);
        assert!(task.is_protected());
    }

    #[test]
    fn every_serialized_task_passes_its_shape() {
        let mut done = Task::new("2", "b", 1);
        done.toggle(5);
        let json = serde_json::to_value(vec![Task::new("1", "a", 0), done]).unwrap();
        assert!(validate(&json, &Task::shape()).is_clean());
    }
}
