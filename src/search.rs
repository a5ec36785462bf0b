//! C10: search/sort engine. Parallel filter over the index store's
//! sorted arrays (spec §4.11).

use std::sync::Arc;

use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::array::PackedArray;
use crate::cancel::CancelToken;
use crate::entry::{EntryArena, EntryRef};
use crate::index::{IndexStore, SortProperty};
use crate::query::Query;

pub struct SearchResult {
    pub files: Arc<PackedArray<EntryRef>>,
    pub folders: Arc<PackedArray<EntryRef>>,
}

/// Runs `query` over the store's `sort_prop`-ordered arrays. An empty
/// query short-circuits to the store's existing arrays — same
/// references, no reallocation (spec §4.11, §8 property 5).
pub fn search(
    store: &mut IndexStore,
    query: &Query,
    sort_prop: SortProperty,
    cancel: &CancelToken,
    chunk_size: usize,
    threads: usize,
) -> SearchResult {
    let files_sorted = store.files_sorted_by(sort_prop);
    let folders_sorted = store.folders_sorted_by(sort_prop);

    if query.is_empty() {
        return SearchResult {
            files: files_sorted,
            folders: folders_sorted,
        };
    }

    let files = filter_parallel(&files_sorted, &store.arena, query, cancel, chunk_size, threads);
    let folders = filter_parallel(&folders_sorted, &store.arena, query, cancel, chunk_size, threads);
    SearchResult {
        files: Arc::new(PackedArray::from_vec(files)),
        folders: Arc::new(PackedArray::from_vec(folders)),
    }
}

/// Partitions `sorted` into `N = min(threads, ceil(len/chunk_size))`
/// contiguous chunks, evaluates `query` against each chunk on a rayon
/// worker, and concatenates the local results in chunk order — which
/// preserves `sorted`'s order (spec §4.11, §5: "result vectors are
/// concatenated in chunk order"). Cancellation is polled at each chunk
/// boundary; a cancelled chunk contributes nothing, matching "a
/// cancelled task leaves the view's previous snapshot intact" at the
/// caller (the caller simply discards this result rather than publish
/// it).
fn filter_parallel(
    sorted: &PackedArray<EntryRef>,
    arena: &EntryArena,
    query: &Query,
    cancel: &CancelToken,
    chunk_size: usize,
    threads: usize,
) -> Vec<EntryRef> {
    let items = sorted.as_slice();
    if items.is_empty() {
        return Vec::new();
    }

    let n_chunks = threads
        .max(1)
        .min(((items.len() + chunk_size.max(1) - 1) / chunk_size.max(1)).max(1));

    if n_chunks <= 1 {
        return items
            .iter()
            .copied()
            .filter(|&r| query.matches(arena, r))
            .collect();
    }

    let chunk_len = (items.len() + n_chunks - 1) / n_chunks;
    let chunks: Vec<&[EntryRef]> = items.chunks(chunk_len).collect();
    let results: Vec<Vec<EntryRef>> = chunks
        .into_par_iter()
        .map(|chunk| {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            chunk
                .iter()
                .copied()
                .filter(|&r| query.matches(arena, r))
                .collect()
        })
        .collect();
    results.into_iter().flatten().collect()
}
