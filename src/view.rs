//! C11 (part 1): view. One registered query against a database: its
//! current result snapshot, active sort, and selection (spec §4.11,
//! §4.12, §3.5).

use std::collections::HashSet;
use std::sync::Arc;

use crate::array::PackedArray;
use crate::cancel::CancelToken;
use crate::config::DatabaseConfig;
use crate::entry::EntryRef;
use crate::index::{IndexStore, SortProperty};
use crate::query::Query;
use crate::search;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOp {
    Set,
    Add,
    Remove,
    Toggle,
}

/// Read-only snapshot of a single entry, handed back across the API
/// boundary instead of an [`EntryRef`] (spec §3.5): nothing in it
/// changes out from under the caller after it's returned.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub mtime: i64,
    pub is_folder: bool,
    pub child_files: u32,
    pub child_folders: u32,
}

pub struct View {
    pub id: u64,
    pub query_text: String,
    pub files: Arc<PackedArray<EntryRef>>,
    pub folders: Arc<PackedArray<EntryRef>>,
    pub sort_order: SortProperty,
    pub sort_direction: SortDirection,
    pub selection: HashSet<EntryRef>,
    is_empty_query: bool,
}

impl View {
    pub fn new(id: u64) -> Self {
        View {
            id,
            query_text: String::new(),
            files: Arc::new(PackedArray::new()),
            folders: Arc::new(PackedArray::new()),
            sort_order: SortProperty::Name,
            sort_direction: SortDirection::Ascending,
            selection: HashSet::new(),
            is_empty_query: true,
        }
    }

    pub fn is_empty_query(&self) -> bool {
        self.is_empty_query
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_folders(&self) -> usize {
        self.folders.len()
    }

    /// Runs `query` against `store` and replaces this view's result
    /// snapshot (spec §4.11 step 1-3, the search path; distinct from
    /// [`Self::apply_sort`], the re-sort-only path).
    pub fn apply_search(
        &mut self,
        store: &mut IndexStore,
        query: &Query,
        sort_order: SortProperty,
        direction: SortDirection,
        cancel: &CancelToken,
        cfg: &DatabaseConfig,
    ) {
        let result = search::search(
            store,
            query,
            sort_order,
            cancel,
            cfg.search_chunk_size,
            cfg.worker_threads,
        );
        // A cancelled search must leave the previous snapshot intact
        // (spec §5 "Cancellation", §4.11): don't publish a partial or
        // stale-query result into the view.
        if cancel.is_cancelled() {
            return;
        }
        self.files = result.files;
        self.folders = result.folders;
        self.sort_order = sort_order;
        self.sort_direction = direction;
        self.query_text = query.text.clone();
        self.is_empty_query = query.is_empty();
    }

    /// Re-orders this view's existing result set onto a new sort
    /// property without re-running the query (spec §4.11 step "sort
    /// transitions"):
    ///
    /// 1. Same property, direction only changes: a no-op here — display
    ///    order is derived at read time by [`Self::files_in_order`].
    /// 2. Different property, unfiltered view (`is_empty_query`): take
    ///    the store's arrays for the new property directly — same
    ///    references, no walk.
    /// 3. Different property, filtered view: mark every entry currently
    ///    in this view's result with the scratch bit, walk the store's
    ///    new-property-sorted array in order, and collect the marked
    ///    ones, clearing the bit as each is consumed.
    ///
    /// The index store always rebuilds a missing sorted array lazily on
    /// request (§4.4), so unlike the literal "does the store already
    /// hold this order" branch, here every request satisfies that
    /// condition by the time it returns — case "sort a fresh copy of
    /// just this view's entries" collapses into the store's own lazy
    /// build. See `DESIGN.md` for this simplification's rationale.
    pub fn apply_sort(&mut self, store: &mut IndexStore, new_order: SortProperty, direction: SortDirection) {
        if new_order == self.sort_order {
            self.sort_direction = direction;
            return;
        }

        if self.is_empty_query {
            self.files = store.files_sorted_by(new_order);
            self.folders = store.folders_sorted_by(new_order);
        } else {
            self.files = reorder_via_store(store, &self.files, new_order, false);
            self.folders = reorder_via_store(store, &self.folders, new_order, true);
        }
        self.sort_order = new_order;
        self.sort_direction = direction;
    }

    /// This view's files in display order — forward for ascending,
    /// reversed for descending. Direction is a read-time concern so the
    /// stored arrays themselves stay in a single canonical (ascending)
    /// order and are never copied just to flip direction.
    pub fn files_in_order(&self) -> Vec<EntryRef> {
        in_order(&self.files, self.sort_direction)
    }

    pub fn folders_in_order(&self) -> Vec<EntryRef> {
        in_order(&self.folders, self.sort_direction)
    }

    /// Index into the conceptual combined listing a UI would show:
    /// folders first, then files, each in this view's display order
    /// (spec §4.12 "modify selection" indices address this combined
    /// sequence).
    pub fn entry_at(&self, idx: usize) -> Option<EntryRef> {
        let folders = self.folders_in_order();
        if idx < folders.len() {
            return folders.get(idx).copied();
        }
        let files = self.files_in_order();
        files.get(idx - folders.len()).copied()
    }

    pub fn total_len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    /// Applies a selection operation over the inclusive index range
    /// `[idx1, idx2]` (order-independent; the smaller bound is treated
    /// as the start) against [`Self::entry_at`]'s combined listing.
    pub fn modify_selection(&mut self, op: SelectionOp, idx1: usize, idx2: usize) {
        let (lo, hi) = if idx1 <= idx2 { (idx1, idx2) } else { (idx2, idx1) };
        if op == SelectionOp::Set {
            self.selection.clear();
        }
        for i in lo..=hi {
            let Some(r) = self.entry_at(i) else { break };
            match op {
                SelectionOp::Set | SelectionOp::Add => {
                    self.selection.insert(r);
                }
                SelectionOp::Remove => {
                    self.selection.remove(&r);
                }
                SelectionOp::Toggle => {
                    if !self.selection.insert(r) {
                        self.selection.remove(&r);
                    }
                }
            }
        }
    }

    /// Carries this view's selection across a reload that replaced
    /// `old_store`'s entries with `new_store`'s (spec §4.12): since
    /// `EntryRef`s from the old arena are meaningless against the new
    /// one, each selected entry's full path is binary-searched against
    /// the new store's path-sorted order, and the match (if any) is
    /// re-selected.
    pub fn migrate_selection(&mut self, old_store: &IndexStore, new_store: &mut IndexStore) {
        let new_files_by_path = new_store.files_sorted_by(SortProperty::Path);
        let new_folders_by_path = new_store.folders_sorted_by(SortProperty::Path);
        let mut migrated = HashSet::with_capacity(self.selection.len());

        for &old_ref in &self.selection {
            let is_folder = old_store.arena.get(old_ref).is_folder();
            let path = old_store.arena.full_path(old_ref);
            let candidates = if is_folder { &new_folders_by_path } else { &new_files_by_path };
            if let Ok(idx) = candidates.binary_search(|r| new_store.arena.full_path(*r).cmp(&path)) {
                if let Some(r) = candidates.get(idx) {
                    migrated.insert(r);
                }
            }
        }
        self.selection = migrated;
    }

    pub fn entry_info(store: &IndexStore, r: EntryRef) -> EntryInfo {
        let entry = store.arena.get(r);
        EntryInfo {
            name: entry.name.clone(),
            path: store.arena.full_path(r),
            size: entry.size,
            mtime: entry.mtime,
            is_folder: entry.is_folder(),
            child_files: entry.child_files,
            child_folders: entry.child_folders,
        }
    }
}

fn in_order(arr: &PackedArray<EntryRef>, direction: SortDirection) -> Vec<EntryRef> {
    match direction {
        SortDirection::Ascending => arr.iter().copied().collect(),
        SortDirection::Descending => arr.iter().rev().copied().collect(),
    }
}

fn reorder_via_store(
    store: &mut IndexStore,
    current: &PackedArray<EntryRef>,
    new_order: SortProperty,
    is_folder: bool,
) -> Arc<PackedArray<EntryRef>> {
    for &r in current.as_slice() {
        store.arena.get_mut(r).mark = true;
    }
    let full = if is_folder {
        store.folders_sorted_by(new_order)
    } else {
        store.files_sorted_by(new_order)
    };
    let mut out = Vec::with_capacity(current.len());
    for &r in full.as_slice() {
        if store.arena.get(r).mark {
            out.push(r);
            store.arena.get_mut(r).mark = false;
        }
    }
    Arc::new(PackedArray::from_vec(out))
}
