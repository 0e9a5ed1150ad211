// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the used-range set
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic. Checks the run-length set against a
//!   naive per-page model under arbitrary insert/remove interleavings.
//!
//! TEST_SCOPE:
//!   - Accepted operations match a bit-set model exactly
//!   - Rejected operations leave the set untouched
//!   - Structural invariants (sorted, disjoint, non-adjacent) always hold

use std::collections::BTreeSet;

use proptest::prelude::*;

use super::used_range::UsedRange;

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, usize),
    Remove(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    let range = (0usize..64, 1usize..8);
    prop_oneof![
        range.clone().prop_map(|(p, c)| Op::Insert(p, c)),
        range.prop_map(|(p, c)| Op::Remove(p, c)),
    ]
}

/// The model accepts an insert iff no page is already present, and a
/// remove iff the interval is covered by one maximal run.
fn model_insert(model: &mut BTreeSet<usize>, page: usize, count: usize) -> bool {
    if (page..page + count).any(|p| model.contains(&p)) {
        return false;
    }
    model.extend(page..page + count);
    true
}

fn model_remove(model: &mut BTreeSet<usize>, page: usize, count: usize) -> bool {
    if !(page..page + count).all(|p| model.contains(&p)) {
        return false;
    }
    for p in page..page + count {
        model.remove(&p);
    }
    true
}

fn pages_of(set: &UsedRange) -> BTreeSet<usize> {
    set.iter().flat_map(|(p, c)| p..p + c).collect()
}

proptest! {
    #[test]
    fn matches_bitset_model(ops in proptest::collection::vec(arb_op(), 1..64)) {
        let mut set = UsedRange::new();
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                Op::Insert(page, count) => {
                    let accepted = set.insert(page, count).is_ok();
                    prop_assert_eq!(accepted, model_insert(&mut model, page, count));
                }
                Op::Remove(page, count) => {
                    let accepted = set.remove(page, count).is_ok();
                    // The set only removes intervals covered by a single
                    // run; since runs are maximal, model coverage is
                    // equivalent.
                    prop_assert_eq!(accepted, model_remove(&mut model, page, count));
                }
            }

            set.check();
            prop_assert_eq!(pages_of(&set), model.clone());
            prop_assert_eq!(set.page_count(), model.len());
        }
    }

    #[test]
    fn failed_operations_are_noops(page in 0usize..32, count in 1usize..8) {
        let mut set = UsedRange::new();
        set.insert(10, 4).unwrap();
        let before: Vec<_> = set.iter().collect();

        if set.insert(page, count).is_err() {
            prop_assert_eq!(set.iter().collect::<Vec<_>>(), before.clone());
        }
        let mut set2 = UsedRange::new();
        set2.insert(10, 4).unwrap();
        if set2.remove(page, count).is_err() {
            prop_assert_eq!(set2.iter().collect::<Vec<_>>(), before);
        }
    }
}
