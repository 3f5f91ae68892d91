//! Tests for split-to-worker assignment.

use splitflow::split::{SplitId, assign_all, assign_splits};
use std::collections::HashSet;

fn splits(n: usize) -> Vec<SplitId> {
    (0..n).map(|i| SplitId::new(format!("s{i}"))).collect()
}

#[test]
fn test_union_covers_every_split_exactly_once() {
    for n in 0..12 {
        for p in 1..7 {
            let all = splits(n);
            let mut seen = Vec::new();
            for i in 0..p {
                seen.extend(assign_splits(&all, p, i));
            }
            assert_eq!(seen.len(), n, "n={n} p={p}");
            let unique: HashSet<_> = seen.iter().collect();
            assert_eq!(unique.len(), n, "n={n} p={p}");
            assert!(all.iter().all(|s| unique.contains(s)), "n={n} p={p}");
        }
    }
}

#[test]
fn test_round_robin_striping() {
    let all = splits(5);
    let w0: Vec<_> = assign_splits(&all, 2, 0).iter().map(|s| s.to_string()).collect();
    let w1: Vec<_> = assign_splits(&all, 2, 1).iter().map(|s| s.to_string()).collect();
    assert_eq!(w0, vec!["s0", "s2", "s4"]);
    assert_eq!(w1, vec!["s1", "s3"]);
}

#[test]
fn test_single_worker_gets_everything_in_order() {
    let all = splits(4);
    assert_eq!(assign_splits(&all, 1, 0), all);
}

#[test]
fn test_fewer_splits_than_workers() {
    let all = splits(2);
    let assignments = assign_all(&all, 4);
    assert_eq!(assignments.len(), 4);
    assert_eq!(assignments[0].splits, vec![SplitId::from("s0")]);
    assert_eq!(assignments[1].splits, vec![SplitId::from("s1")]);
    assert!(assignments[2].is_empty());
    assert!(assignments[3].is_empty());
}

#[test]
fn test_no_splits() {
    let assignments = assign_all(&[], 3);
    assert_eq!(assignments.len(), 3);
    assert!(assignments.iter().all(|a| a.is_empty()));
}

#[test]
fn test_assignment_is_deterministic() {
    let all = splits(9);
    assert_eq!(assign_all(&all, 4), assign_all(&all, 4));
    for (i, a) in assign_all(&all, 4).iter().enumerate() {
        assert_eq!(a.worker, i);
        assert_eq!(a.splits, assign_splits(&all, 4, i));
    }
}
