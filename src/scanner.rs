//! C5: scanner. Depth-first directory walk honoring excludes,
//! one-filesystem, and hidden-file rules (spec §4.5).
//!
//! `walkdir` already does the `openat`/`fstatat`-style resolution and
//! `st_dev` fencing the source hand-rolls: `same_file_system` refuses to
//! descend across a device boundary, and the iterator never yields `.`
//! or `..`. What's left to this module is the policy spec §4.5 adds on
//! top — the hidden/exclude/name-length checks, the status callback
//! cadence, cooperative cancellation, and building entries into an
//! [`IndexStore`] with the parent-pointer tree spec §3 requires.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::entry::{Entry, EntryRef, NAME_MAX_LEN};
use crate::error::Error;
use crate::exclude::ExcludeManager;
use crate::index::IndexStore;

/// One include directive (spec §4.5).
#[derive(Debug, Clone)]
pub struct Include {
    pub path: PathBuf,
    pub one_filesystem: bool,
    pub scan_after_load: bool,
    pub id: u16,
}

#[derive(Debug, Default)]
pub struct ScanStats {
    pub num_files: usize,
    pub num_folders: usize,
    pub errors: Vec<Error>,
}

/// Scans every include into a fresh [`IndexStore`]. `status` is called
/// at most every `status_interval` (spec: "at most every 100ms") with
/// the directory currently being walked.
pub fn scan(
    includes: &[Include],
    excludes: &ExcludeManager,
    cancel: &CancelToken,
    mut status: impl FnMut(&Path),
    status_interval: Duration,
    items_per_block: usize,
) -> (IndexStore, ScanStats) {
    let mut store = IndexStore::new(items_per_block);
    let mut stats = ScanStats::default();
    let mut last_status = Instant::now()
        .checked_sub(status_interval)
        .unwrap_or_else(Instant::now);

    for include in includes {
        if cancel.is_cancelled() {
            break;
        }
        let root_name = root_display_name(&include.path);
        let root_ref = store.add_folder(Entry::new_folder(root_name, include.id, None));
        stats.num_folders += 1;
        walk_into(
            &include.path,
            include,
            root_ref,
            excludes,
            cancel,
            &mut store,
            &mut stats,
            &mut status,
            status_interval,
            &mut last_status,
        );
    }
    (store, stats)
}

/// Walks `path`'s contents directly into `store` under the already
/// existing folder `parent_ref`, without creating a new root entry.
/// Used both by [`scan`] (where `parent_ref` names the include's own
/// freshly created root folder) and by the watcher's synthesized
/// recursive sub-scan of a newly created directory (spec §4.6: "the
/// notify API may not deliver interior contents").
pub fn walk_into(
    path: &Path,
    include: &Include,
    parent_ref: EntryRef,
    excludes: &ExcludeManager,
    cancel: &CancelToken,
    store: &mut IndexStore,
    stats: &mut ScanStats,
    status: &mut impl FnMut(&Path),
    status_interval: Duration,
    last_status: &mut Instant,
) {
    let mut stack: Vec<(usize, EntryRef)> = vec![(0, parent_ref)];

    let walker = WalkDir::new(path)
        .follow_links(false)
        .same_file_system(include.one_filesystem)
        .min_depth(1)
        .into_iter();

    for entry in walker {
        if cancel.is_cancelled() {
            return;
        }
        if last_status.elapsed() >= status_interval {
            status(path);
            *last_status = Instant::now();
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let err_path = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
                log::warn!("scan error at {}: {e}", err_path.display());
                stats.errors.push(Error::scan_io(err_path, e.to_string()));
                continue;
            }
        };

        let depth = entry.depth();
        while stack.last().is_some_and(|&(d, _)| d >= depth) {
            stack.pop();
        }
        let Some(&(_, parent)) = stack.last() else {
            continue;
        };

        let name = entry.file_name().to_string_lossy().into_owned();
        let is_dir = entry.file_type().is_dir();

        // Spec §4.5 step 2: hidden check precedes the excludes lookup
        // here (the watcher applies them in the opposite order — an
        // intentional discrepancy the spec's Open Questions preserve).
        if excludes.exclude_hidden && name.starts_with('.') {
            continue;
        }
        if name.as_bytes().len() > NAME_MAX_LEN {
            log::debug!(
                "skipping {}: name exceeds {NAME_MAX_LEN} bytes",
                entry.path().display()
            );
            continue;
        }
        if excludes.excludes(entry.path(), &name, is_dir) {
            if is_dir {
                // Do not descend into an excluded directory's contents.
                continue;
            }
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                log::warn!("stat failed for {}: {e}", entry.path().display());
                stats.errors.push(Error::scan_io(entry.path(), e.to_string()));
                continue;
            }
        };

        if is_dir {
            let folder_ref = store.add_folder(Entry::new_folder(name, include.id, Some(parent)));
            stats.num_folders += 1;
            stack.push((depth, folder_ref));
        } else {
            let file = Entry {
                size: metadata.len(),
                mtime: mtime_secs(&metadata),
                ..Entry::new_file(name, include.id, Some(parent))
            };
            store.add_file(file);
            stats.num_files += 1;
        }
    }
}

fn root_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn mtime_secs(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SortProperty;
    use std::fs;
    use tempfile::tempdir;

    fn empty_excludes() -> ExcludeManager {
        ExcludeManager::new(false)
    }

    #[test]
    fn scans_a_trivial_tree() {
        // Mirrors scenario S1 of spec §8.
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), [0u8; 10]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.bin"), []).unwrap();

        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        let (mut store, stats) = scan(
            &includes,
            &empty_excludes(),
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        assert_eq!(stats.num_files, 2);
        assert_eq!(stats.num_folders, 2);
        assert_eq!(store.num_files(), 2);
        assert_eq!(store.num_folders(), 2);

        let names: Vec<String> = store
            .files_sorted_by(SortProperty::Name)
            .iter()
            .map(|r| store.arena.get(*r).name.clone())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.bin"]);
    }

    #[test]
    fn hidden_files_are_skipped_when_flag_set() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".hidden"), b"x").unwrap();
        fs::write(dir.path().join("visible.txt"), b"y").unwrap();

        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        let (_store, stats) = scan(
            &includes,
            &ExcludeManager::new(true),
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        assert_eq!(stats.num_files, 1);
    }

    #[test]
    fn excluded_glob_pattern_skips_matching_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.txt"), b"x").unwrap();
        fs::write(dir.path().join("skip.tmp"), b"y").unwrap();

        let mut excludes = ExcludeManager::new(false);
        excludes.add_file_pattern("*.tmp").unwrap();

        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        let (_store, stats) = scan(
            &includes,
            &excludes,
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        assert_eq!(stats.num_files, 1);
    }

    #[test]
    fn folder_size_aggregates_nested_file_sizes() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("f.bin"), [0u8; 25]).unwrap();

        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        let (store, _stats) = scan(
            &includes,
            &empty_excludes(),
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        let root = store.folders_canonical()[0];
        assert_eq!(store.arena.get(root).size, 25);
    }

    #[test]
    fn cancellation_stops_the_walk_early() {
        let dir = tempdir().unwrap();
        for i in 0..50 {
            fs::write(dir.path().join(format!("f{i}.txt")), b"x").unwrap();
        }
        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        cancel.cancel();
        let (_store, stats) = scan(
            &includes,
            &empty_excludes(),
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        assert_eq!(stats.num_files, 0);
    }
}
