//! Signature stagnation and convergence across repeated batches.

use mergegate_core::{EvidenceRecord, SignatureTracker};
use serde_json::{json, Map, Value};

fn batch(result: &str) -> Vec<Value> {
    vec![json!({ "result": result })]
}

#[test]
fn repeated_batch_counts_stagnation_until_converged() {
    let mut tracker = SignatureTracker::default();

    assert!(tracker.check_novelty(&batch("A")));
    assert_eq!(tracker.stagnation_count(), 0);

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push((
            tracker.check_novelty(&batch("A")),
            tracker.stagnation_count(),
            tracker.is_converged(3),
        ));
    }
    assert_eq!(
        seen,
        vec![(false, 1, false), (false, 2, false), (false, 3, true)]
    );
    assert_eq!(tracker.history().len(), 1);
}

#[test]
fn novel_batch_resets_stagnation() {
    let mut tracker = SignatureTracker::default();
    for _ in 0..4 {
        tracker.check_novelty(&batch("A"));
    }
    assert!(tracker.is_converged(3));

    assert!(tracker.check_novelty(&batch("B")));
    assert_eq!(tracker.stagnation_count(), 0);
    assert!(!tracker.is_converged(3));
    assert_eq!(tracker.history().len(), 2);
}

#[test]
fn returning_to_an_older_signature_is_novel() {
    // Only the most recent signature counts as "seen".
    let mut tracker = SignatureTracker::default();
    assert!(tracker.check_novelty(&batch("A")));
    assert!(tracker.check_novelty(&batch("B")));
    assert!(tracker.check_novelty(&batch("A")));
    assert_eq!(tracker.history().len(), 3);
}

#[test]
fn signature_is_deterministic_across_trackers() {
    let a = SignatureTracker::default();
    let b = SignatureTracker::default();
    let records = vec![
        json!({ "result": "ok", "findings": ["x", "y"] }),
        json!({ "summary": "second" }),
    ];
    assert_eq!(a.compute_signature(&records), b.compute_signature(&records));
}

#[test]
fn only_configured_keys_affect_signature() {
    let tracker = SignatureTracker::new(["result"]);
    let a = tracker.compute_signature(&[json!({ "result": "A", "noise": 1 })]);
    let b = tracker.compute_signature(&[json!({ "result": "A", "noise": 2 })]);
    assert_eq!(a, b);
}

#[test]
fn nested_metadata_is_order_insensitive() {
    let tracker = SignatureTracker::new(["output"]);
    let mut first = Map::new();
    first.insert("output".into(), json!({ "b": [3, 1, 2], "a": { "y": 1, "x": 0 } }));
    let mut second = Map::new();
    second.insert("output".into(), json!({ "a": { "x": 0, "y": 1 }, "b": [3, 1, 2] }));

    assert_eq!(
        tracker.compute_signature(&[EvidenceRecord::with_metadata(first)]),
        tracker.compute_signature(&[EvidenceRecord::with_metadata(second)]),
    );
}

#[test]
fn reset_forgets_history() {
    let mut tracker = SignatureTracker::default();
    tracker.check_novelty(&batch("A"));
    tracker.check_novelty(&batch("A"));
    tracker.reset();

    assert!(tracker.history().is_empty());
    assert_eq!(tracker.stagnation_count(), 0);
    assert!(tracker.check_novelty(&batch("A")));
}

#[test]
fn zero_threshold_is_converged_immediately() {
    let tracker = SignatureTracker::default();
    assert!(tracker.is_converged(0));
}
