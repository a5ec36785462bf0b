//! C1: packed array. A growable, ownership-neutral vector of opaque
//! element references with binary search, stable insert/remove, and both
//! serial and parallel stable merge sort.
//!
//! Unlike the teacher's `mem_search.rs`, which hand-rolls one-off sorted
//! `Vec<u32>` index arrays per query mode, this is the single reusable
//! container every sorted property in [`crate::index::IndexStore`] and
//! every [`crate::view::View`] result snapshot is built from. Reference
//! counting (spec §3: "the array is reference counted so views may hold
//! snapshots concurrently with writes") is realized by callers wrapping a
//! `PackedArray<T>` in `Arc` at the point where it is shared — the
//! container itself stays a plain, cheaply `Clone`-able value type, which
//! keeps `Arc::make_mut`-based copy-on-write mutation in
//! [`crate::index::IndexStore`] straightforward and free of unsafe code.

use std::cmp::Ordering;

use crate::cancel::CancelToken;

/// A stable-sorted, ownership-neutral array of `T`. `T` is expected to be
/// `Copy` (an index, a small handle) — the array never runs destructors on
/// its elements.
#[derive(Debug, Clone, Default)]
pub struct PackedArray<T> {
    items: Vec<T>,
}

impl<T: Copy> PackedArray<T> {
    pub fn new() -> Self {
        PackedArray { items: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        PackedArray {
            items: Vec::with_capacity(cap),
        }
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        PackedArray { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }

    pub fn get(&self, i: usize) -> Option<T> {
        self.items.get(i).copied()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Amortized O(1) append.
    pub fn add(&mut self, elem: T) {
        self.items.push(elem);
    }

    /// Amortized O(n) bulk append.
    pub fn add_many(&mut self, elems: &[T]) {
        self.items.extend_from_slice(elems);
    }

    /// Inserts at `i`, clamped to `len`. Shifts the tail.
    pub fn insert(&mut self, elem: T, i: usize) {
        let i = i.min(self.items.len());
        self.items.insert(i, elem);
    }

    /// Binary-search insertion point under `cmp`, then insert. Ties go to
    /// the least index `j` with `cmp(items[j], elem) != Less` — i.e. the
    /// first position where `elem` could sit without violating order,
    /// which for equal keys is the first equal element (stable insert).
    pub fn insert_sorted(&mut self, elem: T, mut cmp: impl FnMut(&T, &T) -> Ordering) {
        let pos = self
            .items
            .partition_point(|existing| cmp(existing, &elem) == Ordering::Less);
        self.items.insert(pos, elem);
    }

    /// Removes `n` elements starting at `i`. When the removed range runs
    /// to the end of the array this is an O(1) truncate; otherwise it is
    /// the usual O(n) shift.
    pub fn remove(&mut self, i: usize, n: usize) {
        let end = (i + n).min(self.items.len());
        if end >= self.items.len() {
            self.items.truncate(i);
        } else {
            self.items.drain(i..end);
        }
    }

    /// Like [`remove`](Self::remove) but appends the removed range, in
    /// original order, to `dest`.
    ///
    /// Mirrors `darray_steal_or_remove` in the original C source
    /// (`fsearch_array.c`): for the *middle*-range case (removing a run
    /// that starts after index 0 and ends before the array's end) the
    /// original computes the trailing element count to shift as
    /// `array->num_items - index - 1` instead of
    /// `array->num_items - index - n_elements`. That is off by
    /// `n_elements - 1` whenever `n_elements > 1`, so a multi-element
    /// steal from the middle of the array leaves `n_elements - 1` stale
    /// trailing elements behind (silently truncated from `dest`, and
    /// left — uncollapsed — at the tail of `a`). Per spec §9 Open
    /// Questions this is reproduced as-is rather than fixed; see
    /// `tests::steal_reproduces_original_middle_range_off_by_one` below,
    /// which pins the current behavior so a future, deliberate fix has a
    /// regression test to flip.
    pub fn steal(&mut self, i: usize, n: usize, dest: &mut PackedArray<T>) {
        let len = self.items.len();
        if i >= len {
            return;
        }
        let is_start = i == 0;
        let is_end = i + n >= len;

        if is_start || is_end {
            let end = (i + n).min(len);
            dest.items.extend_from_slice(&self.items[i..end]);
            self.remove(i, n);
            return;
        }

        // Middle-range case: reproduce the original's off-by-one.
        let buggy_trailing = len - i - 1;
        let take = n.min(buggy_trailing);
        dest.items.extend_from_slice(&self.items[i..i + take]);
        self.items.drain(i..i + take);
    }

    /// Binary search with a caller-supplied comparator. Returns `Ok(idx)`
    /// of a matching element on hit, `Err(idx)` of the insertion point on
    /// miss.
    pub fn binary_search(
        &self,
        mut cmp: impl FnMut(&T) -> Ordering,
    ) -> Result<usize, usize> {
        self.items.binary_search_by(|probe| cmp(probe))
    }

    /// Stable merge sort for `len >= 64`, insertion sort below (matches
    /// the teacher's/§4.1's threshold rationale: merge sort's constant
    /// factor loses to insertion sort on small arrays).
    pub fn sort(&mut self, cmp: impl Fn(&T, &T) -> Ordering, cancel: &CancelToken) {
        merge_sort(&mut self.items, &cmp, cancel);
    }

    /// Parallel merge sort (§4.1): split into `min(8, pow2(threads))`
    /// equal ranges, merge-sort each on a rayon worker, then repeatedly
    /// merge adjacent pairs until one run remains. Falls back to serial
    /// [`sort`](Self::sort) when `len < 2 * threads` or fewer than two
    /// threads are available.
    pub fn sort_parallel(
        &mut self,
        cmp: impl Fn(&T, &T) -> Ordering + Sync,
        threads: usize,
        cancel: &CancelToken,
    ) where
        T: Send,
    {
        let len = self.items.len();
        if threads < 2 || len < 2 * threads {
            self.sort(cmp, cancel);
            return;
        }

        let mut slabs: Vec<usize> = Vec::new();
        {
            let mut remaining = len;
            let mut parts = threads;
            let mut start = 0;
            while parts > 0 {
                let chunk = (remaining + parts - 1) / parts;
                slabs.push(start);
                start += chunk;
                remaining -= chunk;
                parts -= 1;
            }
            slabs.push(len);
        }

        if cancel.is_cancelled() {
            return;
        }

        let mut runs: Vec<Vec<T>> = {
            let items = &self.items;
            let ranges: Vec<(usize, usize)> = (0..slabs.len() - 1)
                .map(|i| (slabs[i], slabs[i + 1]))
                .collect();
            ranges
                .into_par_iter_compat()
                .map(|(lo, hi)| {
                    let mut run = items[lo..hi].to_vec();
                    merge_sort(&mut run, &cmp, cancel);
                    run
                })
                .collect()
        };

        while runs.len() > 1 && !cancel.is_cancelled() {
            let pairs: Vec<(Vec<T>, Option<Vec<T>>)> = runs
                .chunks(2)
                .map(|c| {
                    if c.len() == 2 {
                        (c[0].clone(), Some(c[1].clone()))
                    } else {
                        (c[0].clone(), None)
                    }
                })
                .collect();
            runs = pairs
                .into_par_iter_compat()
                .map(|(a, b)| match b {
                    Some(b) => merge_runs(a, b, &cmp),
                    None => a,
                })
                .collect();
        }

        if let Some(sorted) = runs.into_iter().next() {
            if !cancel.is_cancelled() {
                self.items = sorted;
            }
        }
    }
}

/// Thin adapter so the module compiles against either a real rayon
/// thread pool or, in unit tests without one configured, the global
/// default pool rayon lazily initializes.
trait IntoParIterCompat<T> {
    fn into_par_iter_compat(self) -> rayon::vec::IntoIter<T>;
}

impl<T: Send> IntoParIterCompat<T> for Vec<T> {
    fn into_par_iter_compat(self) -> rayon::vec::IntoIter<T> {
        use rayon::iter::IntoParallelIterator;
        self.into_par_iter()
    }
}

use rayon::iter::{ParallelIterator};

fn merge_sort<T: Copy>(items: &mut [T], cmp: &impl Fn(&T, &T) -> Ordering, cancel: &CancelToken) {
    let len = items.len();
    if len < 64 {
        insertion_sort(items, cmp);
        return;
    }
    if cancel.is_cancelled() {
        return;
    }
    let mid = len / 2;
    let mut left = items[..mid].to_vec();
    let mut right = items[mid..].to_vec();
    merge_sort(&mut left, cmp, cancel);
    merge_sort(&mut right, cmp, cancel);
    if cancel.is_cancelled() {
        return;
    }
    let merged = merge_runs(left, right, cmp);
    items.copy_from_slice(&merged);
}

fn merge_runs<T: Copy>(a: Vec<T>, b: Vec<T>, cmp: &impl Fn(&T, &T) -> Ordering) -> Vec<T> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if cmp(&a[i], &b[j]) != Ordering::Greater {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

fn insertion_sort<T: Copy>(items: &mut [T], cmp: &impl Fn(&T, &T) -> Ordering) {
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && cmp(&items[j - 1], &items[j]) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }
}
