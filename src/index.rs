//! C4: index store. Holds every entry for one or more scanned roots and
//! lazily-built, reference-counted sorted views over them (spec §4.4).
//!
//! Mutations (`add_file`/`add_folder`/`remove_file`/`remove_folder`)
//! happen against a single canonical insertion-order list per kind;
//! sorted views are derived on demand and cached until the next
//! mutation invalidates them. Callers serialize access to one
//! `IndexStore` behind a lock (§5) — this type does no locking of its
//! own, mirroring how the teacher's `mem_search.rs` built one flat `Vec`
//! per query rather than maintaining a concurrent structure.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::array::PackedArray;
use crate::entry::{Entry, EntryArena, EntryRef, Kind};

/// Bitmask of which sorted properties a snapshot persists (§6.1
/// `index_flags`).
pub const INDEX_NAME: u32 = 1 << 0;
pub const INDEX_PATH: u32 = 1 << 1;
pub const INDEX_SIZE: u32 = 1 << 2;
pub const INDEX_MTIME: u32 = 1 << 3;
pub const INDEX_EXTENSION: u32 = 1 << 4;
pub const INDEX_FILE_TYPE: u32 = 1 << 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortProperty {
    Name,
    Path,
    Size,
    Mtime,
    Extension,
    FileType,
    Depth,
    ChildCount,
}

/// Coarse file-type bucket used only for the file-type sort property;
/// not exposed to queries (those match on extension directly, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum FileTypeBucket {
    Folder,
    Image,
    Audio,
    Video,
    Document,
    Archive,
    Other,
}

fn file_type_bucket(entry: &Entry) -> FileTypeBucket {
    if entry.kind == Kind::Folder {
        return FileTypeBucket::Folder;
    }
    match entry.extension().map(|e| e.to_ascii_lowercase()) {
        Some(ext) => match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "svg" | "tiff" => FileTypeBucket::Image,
            "mp3" | "flac" | "wav" | "ogg" | "m4a" | "aac" => FileTypeBucket::Audio,
            "mp4" | "mkv" | "mov" | "avi" | "webm" => FileTypeBucket::Video,
            "pdf" | "doc" | "docx" | "txt" | "md" | "odt" | "rtf" => FileTypeBucket::Document,
            "zip" | "tar" | "gz" | "xz" | "7z" | "rar" | "bz2" => FileTypeBucket::Archive,
            _ => FileTypeBucket::Other,
        },
        None => FileTypeBucket::Other,
    }
}

fn cmp_name(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    arena.get(a).name.cmp(&arena.get(b).name)
}

fn cmp_path(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    arena.full_path(a).cmp(&arena.full_path(b))
}

/// Every non-name/path comparator breaks ties by name then path (spec
/// §4.4) so results are always in a total, deterministic order.
fn with_tiebreak(arena: &EntryArena, a: EntryRef, b: EntryRef, primary: Ordering) -> Ordering {
    primary.then_with(|| cmp_name(arena, a, b)).then_with(|| cmp_path(arena, a, b))
}

fn cmp_size(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let primary = arena.get(a).size.cmp(&arena.get(b).size);
    with_tiebreak(arena, a, b, primary)
}

fn cmp_mtime(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let primary = arena.get(a).mtime.cmp(&arena.get(b).mtime);
    with_tiebreak(arena, a, b, primary)
}

fn cmp_extension(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let primary = arena.get(a).extension().cmp(&arena.get(b).extension());
    with_tiebreak(arena, a, b, primary)
}

fn cmp_file_type(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let primary = file_type_bucket(arena.get(a)).cmp(&file_type_bucket(arena.get(b)));
    with_tiebreak(arena, a, b, primary)
}

fn cmp_depth(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let primary = arena.depth(a).cmp(&arena.depth(b));
    with_tiebreak(arena, a, b, primary)
}

fn cmp_child_count(arena: &EntryArena, a: EntryRef, b: EntryRef) -> Ordering {
    let count = |r: EntryRef| {
        let e = arena.get(r);
        e.child_files as u64 + e.child_folders as u64
    };
    let primary = count(a).cmp(&count(b));
    with_tiebreak(arena, a, b, primary)
}

pub fn comparator_for(prop: SortProperty) -> fn(&EntryArena, EntryRef, EntryRef) -> Ordering {
    match prop {
        SortProperty::Name => cmp_name,
        SortProperty::Path => cmp_path,
        SortProperty::Size => cmp_size,
        SortProperty::Mtime => cmp_mtime,
        SortProperty::Extension => cmp_extension,
        SortProperty::FileType => cmp_file_type,
        SortProperty::Depth => cmp_depth,
        SortProperty::ChildCount => cmp_child_count,
    }
}

#[derive(Default)]
struct Cache {
    by_prop: HashMap<SortProperty, Arc<PackedArray<EntryRef>>>,
}

impl Cache {
    fn get_or_build(
        &mut self,
        prop: SortProperty,
        canonical: &[EntryRef],
        arena: &EntryArena,
    ) -> Arc<PackedArray<EntryRef>> {
        if let Some(existing) = self.by_prop.get(&prop) {
            return Arc::clone(existing);
        }
        let cmp = comparator_for(prop);
        let mut sorted = PackedArray::from_vec(canonical.to_vec());
        sorted.sort(|a, b| cmp(arena, *a, *b), &crate::cancel::CancelToken::new());
        let arc = Arc::new(sorted);
        self.by_prop.insert(prop, Arc::clone(&arc));
        arc
    }

    fn invalidate(&mut self) {
        self.by_prop.clear();
    }
}

pub struct IndexStore {
    pub arena: EntryArena,
    files: Vec<EntryRef>,
    folders: Vec<EntryRef>,
    file_cache: Cache,
    folder_cache: Cache,
    flags: u32,
}

impl IndexStore {
    pub fn new(items_per_block: usize) -> Self {
        IndexStore {
            arena: EntryArena::new(items_per_block),
            files: Vec::new(),
            folders: Vec::new(),
            file_cache: Cache::default(),
            folder_cache: Cache::default(),
            flags: INDEX_NAME | INDEX_PATH | INDEX_SIZE | INDEX_MTIME | INDEX_EXTENSION | INDEX_FILE_TYPE,
        }
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn add_file(&mut self, entry: Entry) -> EntryRef {
        debug_assert_eq!(entry.kind, Kind::File);
        let size = entry.size as i64;
        let parent = entry.parent;
        let r = self.arena.alloc(entry);
        self.files.push(r);
        if let Some(p) = parent {
            self.arena.get_mut(p).child_files += 1;
        }
        self.arena.update_parent_size(r, size);
        self.file_cache.invalidate();
        r
    }

    pub fn add_folder(&mut self, entry: Entry) -> EntryRef {
        debug_assert_eq!(entry.kind, Kind::Folder);
        let parent = entry.parent;
        let r = self.arena.alloc(entry);
        self.folders.push(r);
        if let Some(p) = parent {
            self.arena.get_mut(p).child_folders += 1;
        }
        self.folder_cache.invalidate();
        r
    }

    pub fn remove_file(&mut self, r: EntryRef) {
        if let Some(pos) = self.files.iter().position(|&x| x == r) {
            self.files.swap_remove(pos);
        }
        let size = self.arena.get(r).size as i64;
        let parent = self.arena.get(r).parent;
        self.arena.update_parent_size(r, -size);
        if let Some(p) = parent {
            self.arena.get_mut(p).child_files = self.arena.get(p).child_files.saturating_sub(1);
        }
        self.arena.free(r);
        self.file_cache.invalidate();
    }

    pub fn remove_folder(&mut self, r: EntryRef) {
        if let Some(pos) = self.folders.iter().position(|&x| x == r) {
            self.folders.swap_remove(pos);
        }
        let parent = self.arena.get(r).parent;
        if let Some(p) = parent {
            self.arena.get_mut(p).child_folders = self.arena.get(p).child_folders.saturating_sub(1);
        }
        self.arena.free(r);
        self.folder_cache.invalidate();
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_folders(&self) -> usize {
        self.folders.len()
    }

    pub fn files_canonical(&self) -> &[EntryRef] {
        &self.files
    }

    pub fn folders_canonical(&self) -> &[EntryRef] {
        &self.folders
    }

    /// Invalidates both sorted-array caches without adding/removing an
    /// entry — used after an in-place mutation (watcher `Attrib`/
    /// `CloseWrite`, §4.6) that changes a property an existing sorted
    /// array orders by.
    pub fn invalidate_caches(&mut self) {
        self.file_cache.invalidate();
        self.folder_cache.invalidate();
    }

    pub fn files_sorted_by(&mut self, prop: SortProperty) -> Arc<PackedArray<EntryRef>> {
        self.file_cache.get_or_build(prop, &self.files, &self.arena)
    }

    pub fn folders_sorted_by(&mut self, prop: SortProperty) -> Arc<PackedArray<EntryRef>> {
        self.folder_cache.get_or_build(prop, &self.folders, &self.arena)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn store_with_sample() -> (IndexStore, EntryRef) {
        let mut store = IndexStore::new(8);
        let root = store.add_folder(Entry::new_folder("root".into(), 0, None));
        store.add_file(Entry {
            size: 30,
            name: "b.txt".into(),
            ..Entry::new_file("b.txt".into(), 0, Some(root))
        });
        store.add_file(Entry {
            size: 10,
            name: "a.txt".into(),
            ..Entry::new_file("a.txt".into(), 0, Some(root))
        });
        (store, root)
    }

    #[test]
    fn files_sorted_by_name_is_alphabetical() {
        let (mut store, _root) = store_with_sample();
        let sorted = store.files_sorted_by(SortProperty::Name);
        let names: Vec<_> = sorted
            .iter()
            .map(|r| store.arena.get(*r).name.clone())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn files_sorted_by_size_is_ascending() {
        let (mut store, _root) = store_with_sample();
        let sorted = store.files_sorted_by(SortProperty::Size);
        let sizes: Vec<_> = sorted.iter().map(|r| store.arena.get(*r).size).collect();
        assert_eq!(sizes, vec![10, 30]);
    }

    #[test]
    fn adding_a_file_invalidates_the_cache() {
        let (mut store, root) = store_with_sample();
        let _ = store.files_sorted_by(SortProperty::Name);
        store.add_file(Entry::new_file("c.txt".into(), 0, Some(root)));
        let sorted = store.files_sorted_by(SortProperty::Name);
        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn folder_size_aggregates_child_file_sizes() {
        let (store, root) = store_with_sample();
        assert_eq!(store.arena.get(root).size, 40);
        assert_eq!(store.arena.get(root).child_files, 2);
    }

    #[test]
    fn removing_a_file_decrements_parent_size_and_count() {
        let (mut store, root) = store_with_sample();
        let victim = store.files_canonical()[0];
        store.remove_file(victim);
        assert_eq!(store.num_files(), 1);
        assert_eq!(store.arena.get(root).child_files, 1);
    }
}
