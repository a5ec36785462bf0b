//! C6: folder watcher. Translates a filesystem-event stream into the
//! mutation events spec §4.6 enumerates, then applies them to an
//! [`IndexStore`] (spec §4.6, §4.7).
//!
//! The syscall-level notify transport (inotify/FSEvents/
//! ReadDirectoryChangesW) is out of scope (spec §1); `notify` is the
//! cross-platform crate that stands in for it, matching SPEC_FULL §1's
//! call to standardize on it. This module's own job starts at
//! `translate`, which turns a `notify::Event` into zero or more of this
//! crate's `WatchEventKind`s, and `apply_event`, which is the part spec
//! §4.6 actually specifies the semantics of.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};

use crate::cancel::CancelToken;
use crate::entry::{Entry, EntryRef};
use crate::error::Result;
use crate::exclude::ExcludeManager;
use crate::index::IndexStore;
use crate::scanner::{self, Include};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Deleted,
    MovedFrom,
    MovedTo,
    Attrib,
    CloseWrite,
    DeleteSelf,
    MoveSelf,
    Unmount,
    Rescan,
}

/// One mutation to apply, already resolved to a parent [`EntryRef`] and
/// a name — the part of §4.6 this crate actually implements (see module
/// docs on the notify-translation boundary).
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub parent: EntryRef,
    pub name: Option<String>,
    pub is_dir: bool,
}

/// Maps a folder's full path to its `EntryRef` so watch events — which
/// arrive as filesystem paths — can be resolved to the entry they
/// mutate. Entries themselves store no full path (spec §3); this index
/// is watcher-local bookkeeping, not a store invariant.
#[derive(Default)]
pub struct FolderPathIndex {
    by_path: HashMap<PathBuf, EntryRef>,
}

impl FolderPathIndex {
    pub fn rebuild(&mut self, store: &IndexStore) {
        self.by_path.clear();
        for &r in store.folders_canonical() {
            self.by_path.insert(PathBuf::from(store.arena.full_path(r)), r);
        }
    }

    pub fn insert(&mut self, path: PathBuf, r: EntryRef) {
        self.by_path.insert(path, r);
    }

    pub fn remove(&mut self, path: &Path) {
        self.by_path.remove(path);
    }

    pub fn get(&self, path: &Path) -> Option<EntryRef> {
        self.by_path.get(path).copied()
    }
}

/// Thin wrapper over a `notify::RecommendedWatcher` plus the channel it
/// forwards raw events on. Watching multiple include roots is just
/// calling `watch` once per root.
pub struct Watcher {
    inner: RecommendedWatcher,
    rx: Receiver<notify::Result<notify::Event>>,
    roots: HashSet<PathBuf>,
}

impl Watcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = unbounded();
        let inner = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| crate::error::Error::ScanIo {
            path: PathBuf::new(),
            message: format!("failed to start watcher: {e}"),
        })?;
        Ok(Watcher {
            inner,
            rx,
            roots: HashSet::new(),
        })
    }

    pub fn watch(&mut self, root: &Path) -> Result<()> {
        self.inner
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| crate::error::Error::scan_io(root, e.to_string()))?;
        self.roots.insert(root.to_path_buf());
        Ok(())
    }

    pub fn unwatch(&mut self, root: &Path) -> Result<()> {
        self.inner
            .unwatch(root)
            .map_err(|e| crate::error::Error::scan_io(root, e.to_string()))?;
        self.roots.remove(root);
        Ok(())
    }

    /// Drains whatever raw events are currently buffered, translated
    /// into `(kind, path)` pairs. Non-blocking.
    pub fn drain_raw(&self) -> Vec<(WatchEventKind, PathBuf)> {
        let mut out = Vec::new();
        while let Ok(res) = self.rx.try_recv() {
            match res {
                Ok(event) => out.extend(translate(&event, &self.roots)),
                Err(e) => log::warn!("watcher error: {e}"),
            }
        }
        out
    }
}

/// Translates one raw `notify::Event` into zero or more
/// `(WatchEventKind, path)` pairs. Pure and independently testable —
/// the host-specific plumbing lives entirely inside `notify` itself.
pub fn translate(event: &notify::Event, roots: &HashSet<PathBuf>) -> Vec<(WatchEventKind, PathBuf)> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| (WatchEventKind::Created, p.clone()))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| {
                if roots.contains(p) {
                    (WatchEventKind::DeleteSelf, p.clone())
                } else {
                    (WatchEventKind::Deleted, p.clone())
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => event
                .paths
                .first()
                .map(|p| {
                    if roots.contains(p) {
                        vec![(WatchEventKind::MoveSelf, p.clone())]
                    } else {
                        vec![(WatchEventKind::MovedFrom, p.clone())]
                    }
                })
                .unwrap_or_default(),
            RenameMode::To => event
                .paths
                .first()
                .map(|p| vec![(WatchEventKind::MovedTo, p.clone())])
                .unwrap_or_default(),
            RenameMode::Both => {
                let mut out = Vec::new();
                if let Some(from) = event.paths.first() {
                    out.push((WatchEventKind::MovedFrom, from.clone()));
                }
                if let Some(to) = event.paths.get(1) {
                    out.push((WatchEventKind::MovedTo, to.clone()));
                }
                out
            }
            // Ambiguous rename batch the host couldn't fully order.
            RenameMode::Any | RenameMode::Other => event
                .paths
                .iter()
                .map(|p| (WatchEventKind::Rescan, p.clone()))
                .collect(),
        },
        EventKind::Modify(ModifyKind::Data(_)) => event
            .paths
            .iter()
            .map(|p| (WatchEventKind::CloseWrite, p.clone()))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| (WatchEventKind::Attrib, p.clone()))
            .collect(),
        EventKind::Other => event
            .paths
            .iter()
            .map(|p| (WatchEventKind::Rescan, p.clone()))
            .collect(),
        EventKind::Access(_) | EventKind::Any => Vec::new(),
    }
}

/// Resolves a raw `(kind, path)` pair into a [`WatchEvent`] by looking
/// up the parent folder in `paths`. Returns `None` when the parent
/// folder isn't indexed (the event is for a path outside any tracked
/// root, or arrived before the parent itself was observed).
pub fn resolve(
    store: &IndexStore,
    paths: &FolderPathIndex,
    kind: WatchEventKind,
    path: &Path,
) -> Option<WatchEvent> {
    if matches!(kind, WatchEventKind::DeleteSelf | WatchEventKind::MoveSelf) {
        let parent = paths.get(path)?;
        return Some(WatchEvent {
            kind,
            parent,
            name: None,
            is_dir: true,
        });
    }
    let parent_path = path.parent()?;
    let parent = paths.get(parent_path)?;
    let name = path.file_name()?.to_string_lossy().into_owned();
    let is_dir = find_child(store, parent, &name, true).is_some()
        || path.is_dir()
        || matches!(kind, WatchEventKind::Rescan);
    Some(WatchEvent {
        kind,
        parent,
        name: Some(name),
        is_dir,
    })
}

fn find_child(store: &IndexStore, parent: EntryRef, name: &str, is_dir: bool) -> Option<EntryRef> {
    let candidates: &[EntryRef] = if is_dir {
        store.folders_canonical()
    } else {
        store.files_canonical()
    };
    candidates.iter().copied().find(|&r| {
        let e = store.arena.get(r);
        e.parent == Some(parent) && e.name == name
    })
}

fn is_descendant(store: &IndexStore, candidate: EntryRef, ancestor: EntryRef) -> bool {
    let mut cur = store.arena.get(candidate).parent;
    while let Some(p) = cur {
        if p == ancestor {
            return true;
        }
        cur = store.arena.get(p).parent;
    }
    false
}

/// Removes `root` and every descendant folder/file beneath it. This is
/// the "per-entry is-descendant-of-F linear pass" spec §4.7 names as
/// the fallback when the path-sorted array isn't used to find a
/// contiguous range — the simpler of the two strategies and the one
/// this crate implements throughout.
fn remove_folder_subtree(store: &mut IndexStore, paths: &mut FolderPathIndex, root: EntryRef) {
    let mut doomed_folders: Vec<EntryRef> = store
        .folders_canonical()
        .iter()
        .copied()
        .filter(|&r| r == root || is_descendant(store, r, root))
        .collect();
    let doomed_set: HashSet<EntryRef> = doomed_folders.iter().copied().collect();

    let doomed_files: Vec<EntryRef> = store
        .files_canonical()
        .iter()
        .copied()
        .filter(|&r| matches!(store.arena.get(r).parent, Some(p) if doomed_set.contains(&p)))
        .collect();
    for r in doomed_files {
        store.remove_file(r);
    }

    for &r in &doomed_folders {
        paths.remove(Path::new(&store.arena.full_path(r)));
    }
    // Deepest-first: a folder's `parent` must stay valid until every
    // descendant referencing it as an ancestor has been freed.
    doomed_folders.sort_by_key(|&r| std::cmp::Reverse(store.arena.depth(r)));
    for r in doomed_folders {
        store.remove_folder(r);
    }
}

/// Applies one resolved [`WatchEvent`] to `store` (spec §4.6).
/// `full_path` is the absolute filesystem path the event names.
pub fn apply_event(
    store: &mut IndexStore,
    paths: &mut FolderPathIndex,
    excludes: &ExcludeManager,
    root: &Include,
    event: &WatchEvent,
    full_path: &Path,
) {
    match event.kind {
        WatchEventKind::Created | WatchEventKind::MovedTo => {
            handle_created(store, paths, excludes, root, event, full_path)
        }
        WatchEventKind::Deleted | WatchEventKind::MovedFrom => {
            handle_deleted(store, paths, event, full_path)
        }
        WatchEventKind::DeleteSelf | WatchEventKind::MoveSelf | WatchEventKind::Unmount => {
            remove_folder_subtree(store, paths, event.parent);
        }
        WatchEventKind::Attrib | WatchEventKind::CloseWrite => {
            handle_attrib(store, event, full_path)
        }
        WatchEventKind::Rescan => handle_rescan(store, paths, excludes, root, event, full_path),
    }
}

fn handle_created(
    store: &mut IndexStore,
    paths: &mut FolderPathIndex,
    excludes: &ExcludeManager,
    root: &Include,
    event: &WatchEvent,
    full_path: &Path,
) {
    let Some(name) = &event.name else { return };
    let metadata = match std::fs::symlink_metadata(full_path) {
        Ok(m) => m,
        Err(_) => return, // gone again before we could stat it
    };
    if excludes.excludes(full_path, name, metadata.is_dir()) {
        return;
    }

    if metadata.is_dir() {
        let folder_ref = store.add_folder(Entry::new_folder(name.clone(), root.id, Some(event.parent)));
        paths.insert(full_path.to_path_buf(), folder_ref);
        let cancel = CancelToken::new();
        let mut stats = scanner::ScanStats::default();
        let mut last_status = std::time::Instant::now();
        // The notify API may not deliver interior contents of a newly
        // created directory tree (spec §4.6) — synthesize a recursive
        // sub-scan rooted here.
        scanner::walk_into(
            full_path,
            root,
            folder_ref,
            excludes,
            &cancel,
            store,
            &mut stats,
            &mut |_| {},
            Duration::from_millis(100),
            &mut last_status,
        );
        paths.rebuild(store);
    } else {
        let entry = Entry {
            size: metadata.len(),
            mtime: mtime_secs(&metadata),
            ..Entry::new_file(name.clone(), root.id, Some(event.parent))
        };
        store.add_file(entry);
    }
}

fn handle_deleted(store: &mut IndexStore, paths: &mut FolderPathIndex, event: &WatchEvent, full_path: &Path) {
    let Some(name) = &event.name else { return };
    if let Some(r) = find_child(store, event.parent, name, true) {
        remove_folder_subtree(store, paths, r);
        return;
    }
    if let Some(r) = find_child(store, event.parent, name, false) {
        store.remove_file(r);
    }
    let _ = full_path;
}

fn handle_attrib(store: &mut IndexStore, event: &WatchEvent, full_path: &Path) {
    let Some(name) = &event.name else { return };
    let Some(r) = find_child(store, event.parent, name, event.is_dir) else {
        return;
    };
    let metadata = match std::fs::symlink_metadata(full_path) {
        Ok(m) => m,
        Err(_) => return,
    };
    if !event.is_dir {
        let old_size = store.arena.get(r).size as i64;
        let new_size = metadata.len() as i64;
        store.arena.update_parent_size(r, new_size - old_size);
        store.arena.get_mut(r).size = metadata.len();
    }
    store.arena.get_mut(r).mtime = mtime_secs(&metadata);
    store.invalidate_caches();
}

fn handle_rescan(
    store: &mut IndexStore,
    paths: &mut FolderPathIndex,
    excludes: &ExcludeManager,
    root: &Include,
    event: &WatchEvent,
    full_path: &Path,
) {
    // Multiple conflicting events in one batch that can't be ordered:
    // drop the subtree and rescan it (spec §4.6).
    if let Some(name) = &event.name {
        if let Some(r) = find_child(store, event.parent, name, true) {
            remove_folder_subtree(store, paths, r);
        }
    }
    handle_created(
        store,
        paths,
        excludes,
        root,
        &WatchEvent {
            kind: WatchEventKind::Created,
            ..event.clone()
        },
        full_path,
    );
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
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

    fn sample_root() -> (tempfile::TempDir, IndexStore, FolderPathIndex, Include) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), [0u8; 10]).unwrap();
        let includes = vec![Include {
            path: dir.path().to_path_buf(),
            one_filesystem: false,
            scan_after_load: false,
            id: 0,
        }];
        let cancel = CancelToken::new();
        let (store, _stats) = scanner::scan(
            &includes,
            &ExcludeManager::new(false),
            &cancel,
            |_| {},
            Duration::from_millis(100),
            64,
        );
        let mut paths = FolderPathIndex::default();
        paths.rebuild(&store);
        (dir, store, paths, includes.into_iter().next().unwrap())
    }

    #[test]
    fn created_file_event_adds_an_entry() {
        let (dir, mut store, mut paths, include) = sample_root();
        fs::write(dir.path().join("b.txt"), [0u8; 5]).unwrap();
        let root_ref = store.folders_canonical()[0];
        let event = WatchEvent {
            kind: WatchEventKind::Created,
            parent: root_ref,
            name: Some("b.txt".into()),
            is_dir: false,
        };
        apply_event(
            &mut store,
            &mut paths,
            &ExcludeManager::new(false),
            &include,
            &event,
            &dir.path().join("b.txt"),
        );
        assert_eq!(store.num_files(), 2);
    }

    #[test]
    fn deleted_file_event_removes_entry() {
        let (dir, mut store, mut paths, include) = sample_root();
        let root_ref = store.folders_canonical()[0];
        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let event = WatchEvent {
            kind: WatchEventKind::Deleted,
            parent: root_ref,
            name: Some("a.txt".into()),
            is_dir: false,
        };
        apply_event(
            &mut store,
            &mut paths,
            &ExcludeManager::new(false),
            &include,
            &event,
            &dir.path().join("a.txt"),
        );
        assert_eq!(store.num_files(), 0);
    }

    #[test]
    fn deleted_folder_event_removes_whole_subtree() {
        let (dir, mut store, mut paths, include) = sample_root();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.txt"), [0u8; 1]).unwrap();
        let root_ref = store.folders_canonical()[0];
        let cancel = CancelToken::new();
        let mut stats = scanner::ScanStats::default();
        let mut last_status = std::time::Instant::now();
        scanner::walk_into(
            &dir.path().join("sub"),
            &include,
            store.add_folder(Entry::new_folder("sub".into(), 0, Some(root_ref))),
            &ExcludeManager::new(false),
            &cancel,
            &mut store,
            &mut stats,
            &mut |_| {},
            Duration::from_millis(100),
            &mut last_status,
        );
        paths.rebuild(&store);
        assert_eq!(store.num_files(), 2);
        assert_eq!(store.num_folders(), 2);

        fs::remove_dir_all(dir.path().join("sub")).unwrap();
        let event = WatchEvent {
            kind: WatchEventKind::Deleted,
            parent: root_ref,
            name: Some("sub".into()),
            is_dir: true,
        };
        apply_event(
            &mut store,
            &mut paths,
            &ExcludeManager::new(false),
            &include,
            &event,
            &dir.path().join("sub"),
        );
        assert_eq!(store.num_folders(), 1);
        assert_eq!(store.num_files(), 1);
    }

    #[test]
    fn attrib_event_updates_size_and_mtime() {
        let (dir, mut store, mut paths, include) = sample_root();
        let root_ref = store.folders_canonical()[0];
        fs::write(dir.path().join("a.txt"), [0u8; 99]).unwrap();
        let event = WatchEvent {
            kind: WatchEventKind::Attrib,
            parent: root_ref,
            name: Some("a.txt".into()),
            is_dir: false,
        };
        apply_event(
            &mut store,
            &mut paths,
            &ExcludeManager::new(false),
            &include,
            &event,
            &dir.path().join("a.txt"),
        );
        let sizes: Vec<u64> = store
            .files_sorted_by(SortProperty::Size)
            .iter()
            .map(|r| store.arena.get(*r).size)
            .collect();
        assert_eq!(sizes, vec![99]);
        assert_eq!(store.arena.get(root_ref).size, 99);
    }

    #[test]
    fn translate_create_event_to_created_kind() {
        let event = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/tmp/x/new.txt"));
        let out = translate(&event, &HashSet::new());
        assert_eq!(out, vec![(WatchEventKind::Created, PathBuf::from("/tmp/x/new.txt"))]);
    }

    #[test]
    fn translate_remove_of_a_watched_root_is_delete_self() {
        let root = PathBuf::from("/tmp/watched");
        let mut roots = HashSet::new();
        roots.insert(root.clone());
        let event = notify::Event::new(EventKind::Remove(notify::event::RemoveKind::Folder))
            .add_path(root.clone());
        let out = translate(&event, &roots);
        assert_eq!(out, vec![(WatchEventKind::DeleteSelf, root)]);
    }
}
