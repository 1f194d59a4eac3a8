//! Property tests for repair and pruning.

use proptest::prelude::*;
use serde_json::{json, Value};
use tasklist_store::*;

fn arb_task() -> impl Strategy<Value = Task> {
    (
        "[a-z0-9]{1,6}",
        "\\PC{0,24}",
        any::<bool>(),
        0u64..1_000_000,
        0u64..1_000_000,
    )
        .prop_map(|(id, text, completed, created_at, done_at)| Task {
            id,
            text,
            completed,
            created_at,
            completed_at: completed.then_some(done_at),
        })
}

/// A stored entry: either a well-formed task or junk.
fn arb_entry() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => arb_task().prop_map(|t| serde_json::to_value(t).unwrap()),
        1 => Just(json!({"notATask": true})),
        1 => Just(json!({"id": 7, "text": "numeric id", "completed": false})),
        1 => Just(json!("just a string")),
        1 => Just(Value::Null),
    ]
}

proptest! {
    #[test]
    fn tasks_survive_encoding(items in prop::collection::vec(arb_task(), 0..20)) {
        let raw = encode(&items).unwrap();
        let back: Vec<Task> = decode(&raw).unwrap();
        prop_assert_eq!(back, items);
    }

    #[test]
    fn repair_is_idempotent(entries in prop::collection::vec(arb_entry(), 0..20)) {
        let shape = Task::shape();
        let first = validate(&Value::Array(entries.clone()), &shape);
        let cleaned = first.value.clone().unwrap();

        let second = validate(&cleaned, &shape);
        prop_assert!(second.is_clean());
        prop_assert_eq!(second.value, Some(cleaned.clone()));

        let kept = cleaned.as_array().unwrap().len();
        prop_assert_eq!(kept + first.dropped, entries.len());

        // Whatever survives converts into tasks with unique ids.
        let tasks: Vec<Task> = from_value(cleaned).unwrap();
        let mut ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        prop_assert_eq!(ids.len(), tasks.len());
    }

    #[test]
    fn pruning_removes_ceil_of_the_prunable_share(
        items in prop::collection::vec(arb_task(), 0..40),
        eighths in 0u32..=8,
    ) {
        let fraction = f64::from(eighths) / 8.0;
        let protected = items.iter().filter(|t| t.is_protected()).count();
        let prunable = items.len() - protected;
        let expected = (prunable * eighths as usize + 7) / 8;

        let pruned = prune(items.clone(), fraction);

        prop_assert_eq!(pruned.removed, expected);
        prop_assert_eq!(pruned.kept.len(), items.len() - expected);
        prop_assert_eq!(
            pruned.kept.iter().filter(|t| t.is_protected()).count(),
            protected
        );

        // Survivors keep their relative order.
        let mut source = items.iter();
        for kept in &pruned.kept {
            prop_assert!(source.any(|t| t == kept));
        }
    }
}
