// Copyright 2025 Oriel OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Run-length set of resident pages inside an area
//! OWNERS: @kernel-mm-team
//! PUBLIC API: UsedRange (insert/remove/first_run/last_run/iter)
//! INVARIANTS: Runs are sorted, disjoint and never touching; failed
//!   operations leave the set untouched
//!
//! Keys are page numbers, not addresses. The ordered index gives the two
//! neighbouring runs in O(log n); the adjacency and containment logic only
//! ever consults the immediate left and right neighbour.

use alloc::collections::BTreeMap;

/// Errors reported by used-range bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "a rejected update means the caller's accounting is off"]
pub enum UsedRangeError {
    /// The inserted interval intersects an existing run.
    Overlaps,
    /// The removed interval is not covered by a single existing run.
    NotContained,
}

/// Ordered set of disjoint (first_page, count) runs.
#[derive(Default)]
pub struct UsedRange {
    runs: BTreeMap<usize, usize>,
}

impl UsedRange {
    pub const fn new() -> Self {
        Self { runs: BTreeMap::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Number of runs (not pages).
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Total number of resident pages.
    pub fn page_count(&self) -> usize {
        self.runs.values().sum()
    }

    /// Lowest run, if any.
    pub fn first_run(&self) -> Option<(usize, usize)> {
        self.runs.iter().next().map(|(&p, &c)| (p, c))
    }

    /// Highest run, if any.
    pub fn last_run(&self) -> Option<(usize, usize)> {
        self.runs.iter().next_back().map(|(&p, &c)| (p, c))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.runs.iter().map(|(&p, &c)| (p, c))
    }

    /// Marks pages `[page, page + count)` as resident.
    ///
    /// Merges with the left and/or right neighbour when the new interval
    /// touches them exactly; rejects any intersection.
    pub fn insert(&mut self, page: usize, count: usize) -> Result<(), UsedRangeError> {
        debug_assert!(count > 0);

        if self.runs.contains_key(&page) {
            return Err(UsedRangeError::Overlaps);
        }

        let left = self
            .runs
            .range(..page)
            .next_back()
            .map(|(&p, &c)| (p, c));
        let right = self.runs.range(page..).next().map(|(&p, &c)| (p, c));

        if let Some((left_pg, left_cnt)) = left {
            if left_pg + left_cnt > page {
                return Err(UsedRangeError::Overlaps);
            }
        }
        if let Some((right_pg, _)) = right {
            if page + count > right_pg {
                return Err(UsedRangeError::Overlaps);
            }
        }

        match (left, right) {
            (Some((left_pg, left_cnt)), Some((right_pg, right_cnt)))
                if left_pg + left_cnt == page && page + count == right_pg =>
            {
                // Bridges the two neighbours: collapse into the left run.
                self.runs.remove(&right_pg);
                if let Some(cnt) = self.runs.get_mut(&left_pg) {
                    *cnt += count + right_cnt;
                }
            }
            (Some((left_pg, left_cnt)), _) if left_pg + left_cnt == page => {
                if let Some(cnt) = self.runs.get_mut(&left_pg) {
                    *cnt += count;
                }
            }
            (_, Some((right_pg, right_cnt))) if page + count == right_pg => {
                self.runs.remove(&right_pg);
                self.runs.insert(page, count + right_cnt);
            }
            _ => {
                self.runs.insert(page, count);
            }
        }

        Ok(())
    }

    /// Marks pages `[page, page + count)` as no longer resident.
    ///
    /// The whole interval must lie within a single existing run; the run is
    /// deleted, trimmed, or split depending on where the interval sits.
    pub fn remove(&mut self, page: usize, count: usize) -> Result<(), UsedRangeError> {
        debug_assert!(count > 0);

        if let Some(&run_cnt) = self.runs.get(&page) {
            // Interval starts exactly at a run: full match or prefix.
            if count > run_cnt {
                return Err(UsedRangeError::NotContained);
            }
            self.runs.remove(&page);
            if count < run_cnt {
                self.runs.insert(page + count, run_cnt - count);
            }
            return Ok(());
        }

        let (left_pg, left_cnt) = match self.runs.range(..page).next_back() {
            Some((&p, &c)) => (p, c),
            None => return Err(UsedRangeError::NotContained),
        };

        let left_end = left_pg + left_cnt;
        let end = page + count;
        if end > left_end {
            return Err(UsedRangeError::NotContained);
        }

        if end == left_end {
            // Suffix of the containing run.
            if let Some(cnt) = self.runs.get_mut(&left_pg) {
                *cnt -= count;
            }
        } else {
            // Middle of the containing run: trim and insert the upper part.
            if let Some(cnt) = self.runs.get_mut(&left_pg) {
                *cnt = page - left_pg;
            }
            self.runs.insert(end, left_end - end);
        }

        Ok(())
    }

    /// Verifies the structural invariants. Debug builds call this from the
    /// area operations; tests call it after every mutation.
    pub fn check(&self) {
        let mut prev_end: Option<usize> = None;
        for (&page, &count) in &self.runs {
            debug_assert!(count > 0, "empty run at {page}");
            if let Some(end) = prev_end {
                debug_assert!(end < page, "touching or overlapping runs at {page}");
            }
            prev_end = Some(page + count);
        }
    }
}
