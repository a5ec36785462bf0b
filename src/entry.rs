//! C3: entry record. File/folder nodes sharing a common prefix of fields,
//! allocated from the [`crate::slab::Pool`] so sorted arrays can hold
//! stable, non-owning [`EntryRef`]s (spec §3).

use crate::error::abort_on_invariant_violation;
use crate::slab::{Pool, Slot};

/// Maximum encoded name length (spec §3, §4.5 step 3).
pub const NAME_MAX_LEN: usize = 255;

pub type EntryRef = Slot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    File,
    Folder,
}

/// A file or folder record. Folders additionally use `child_files` /
/// `child_folders`; files leave them at zero.
#[derive(Debug, Clone)]
pub struct Entry {
    pub kind: Kind,
    pub name: String,
    pub parent: Option<EntryRef>,
    pub size: u64,
    pub mtime: i64,
    /// Position of this entry in the name-sorted array for its kind.
    /// Transient — recomputed on save (spec §3), not meaningful between
    /// a mutation and the next full re-sort/save.
    pub idx: u32,
    /// Scratch bit used during the scratch-bit re-sort walk of §4.11
    /// step 2(b). Must be cleared by whoever sets it once the walk
    /// finishes.
    pub mark: bool,
    pub db_index: u16,
    pub child_files: u32,
    pub child_folders: u32,
}

impl Default for Entry {
    fn default() -> Self {
        Entry {
            kind: Kind::File,
            name: String::new(),
            parent: None,
            size: 0,
            mtime: 0,
            idx: 0,
            mark: false,
            db_index: 0,
            child_files: 0,
            child_folders: 0,
        }
    }
}

impl Entry {
    pub fn new_file(name: String, db_index: u16, parent: Option<EntryRef>) -> Self {
        debug_assert!(!name.contains('/'), "name must not contain '/'");
        Entry {
            kind: Kind::File,
            name,
            parent,
            db_index,
            ..Entry::default()
        }
    }

    pub fn new_folder(name: String, db_index: u16, parent: Option<EntryRef>) -> Self {
        debug_assert!(!name.contains('/'), "name must not contain '/'");
        Entry {
            kind: Kind::Folder,
            name,
            parent,
            db_index,
            ..Entry::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, Kind::Folder)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// File extension substring (without the dot, case preserved), or
    /// `None` for folders and extensionless files. Case folding happens
    /// at comparison time (C9), not here.
    pub fn extension(&self) -> Option<&str> {
        if self.kind == Kind::Folder {
            return None;
        }
        let dot = self.name.rfind('.')?;
        if dot == 0 {
            // leading dot ("`.bashrc`") is not an extension
            return None;
        }
        Some(&self.name[dot + 1..])
    }
}

/// Arena owning every [`Entry`] for one or more index roots. Allocation
/// is block-based (see [`crate::slab`]); freeing an entry invalidates its
/// `EntryRef` immediately — callers must have already removed that ref
/// from every sorted array before calling [`free`](Self::free).
pub struct EntryArena {
    pool: Pool<Entry>,
}

impl EntryArena {
    pub fn new(items_per_block: usize) -> Self {
        EntryArena {
            pool: Pool::new(items_per_block, Entry::default),
        }
    }

    pub fn alloc(&mut self, entry: Entry) -> EntryRef {
        let slot = self.pool.alloc();
        *self.pool.get_mut(slot) = entry;
        slot
    }

    pub fn free(&mut self, r: EntryRef) {
        self.pool.free(r);
    }

    pub fn get(&self, r: EntryRef) -> &Entry {
        self.pool.get(r)
    }

    pub fn get_mut(&mut self, r: EntryRef) -> &mut Entry {
        self.pool.get_mut(r)
    }

    pub fn len_allocated(&self) -> usize {
        self.pool.len_allocated()
    }

    /// Appends the full path of `r` to `buf`: every ancestor name,
    /// separated by `/`, followed by `r`'s own name. No entry stores its
    /// full path (spec §3) — this is the only way to reconstruct one.
    pub fn append_path(&self, r: EntryRef, buf: &mut String) {
        let entry = self.get(r);
        if let Some(parent) = entry.parent {
            self.append_path(parent, buf);
            if !buf.is_empty() && !buf.ends_with('/') {
                buf.push('/');
            }
        }
        buf.push_str(&entry.name);
    }

    pub fn full_path(&self, r: EntryRef) -> String {
        let mut buf = String::new();
        self.append_path(r, &mut buf);
        buf
    }

    /// Propagates a file's size delta to every ancestor folder, exactly
    /// once each (spec §3 invariant: "a file's size contributes to every
    /// ancestor folder's size exactly once").
    pub fn update_parent_size(&mut self, r: EntryRef, delta: i64) {
        let mut cur = self.get(r).parent;
        let mut hops = 0usize;
        while let Some(folder_ref) = cur {
            hops += 1;
            if hops > MAX_DEPTH_GUARD {
                abort_on_invariant_violation(format!(
                    "parent chain exceeds {MAX_DEPTH_GUARD} hops while propagating size; \
                     likely a cycle at {}",
                    self.full_path(folder_ref)
                ));
            }
            let folder = self.get_mut(folder_ref);
            folder.size = apply_delta(folder.size, delta);
            cur = folder.parent;
        }
    }

    /// Walks from `r` to the index root, returning the chain length
    /// (spec §8 property 4: terminates at a root, no cycles, length
    /// bounded by filesystem depth).
    pub fn depth(&self, r: EntryRef) -> usize {
        let mut cur = Some(r);
        let mut depth = 0usize;
        while let Some(cur_ref) = cur {
            depth += 1;
            if depth > MAX_DEPTH_GUARD {
                abort_on_invariant_violation(format!(
                    "parent chain exceeds {MAX_DEPTH_GUARD} hops; likely a cycle at {}",
                    self.full_path(cur_ref)
                ));
            }
            cur = self.get(cur_ref).parent;
        }
        depth
    }
}

/// Generous bound on filesystem depth used only to detect accidental
/// cycles during debugging; a real filesystem never nests this deep.
const MAX_DEPTH_GUARD: usize = 10_000;

fn apply_delta(size: u64, delta: i64) -> u64 {
    if delta >= 0 {
        size + delta as u64
    } else {
        size.saturating_sub((-delta) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased_and_none_for_folders() {
        let mut arena = EntryArena::new(8);
        let folder = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let file = arena.alloc(Entry::new_file("Photo.JPG".into(), 0, Some(folder)));
        assert_eq!(arena.get(file).extension(), Some("JPG"));
    }

    #[test]
    fn dotfile_has_no_extension() {
        let mut arena = EntryArena::new(8);
        let folder = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let file = arena.alloc(Entry::new_file(".bashrc".into(), 0, Some(folder)));
        assert_eq!(arena.get(file).extension(), None);
    }

    #[test]
    fn full_path_concatenates_ancestors() {
        let mut arena = EntryArena::new(8);
        let root = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let sub = arena.alloc(Entry::new_folder("sub".into(), 0, Some(root)));
        let file = arena.alloc(Entry::new_file("b.bin".into(), 0, Some(sub)));
        assert_eq!(arena.full_path(file), "root/sub/b.bin");
    }

    #[test]
    fn update_parent_size_propagates_to_every_ancestor() {
        let mut arena = EntryArena::new(8);
        let root = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let sub = arena.alloc(Entry::new_folder("sub".into(), 0, Some(root)));
        let file = arena.alloc(Entry::new_file("b.bin".into(), 0, Some(sub)));
        arena.update_parent_size(file, 10);
        assert_eq!(arena.get(sub).size, 10);
        assert_eq!(arena.get(root).size, 10);
    }

    #[test]
    fn depth_terminates_at_root() {
        let mut arena = EntryArena::new(8);
        let root = arena.alloc(Entry::new_folder("root".into(), 0, None));
        let sub = arena.alloc(Entry::new_folder("sub".into(), 0, Some(root)));
        let file = arena.alloc(Entry::new_file("b.bin".into(), 0, Some(sub)));
        assert_eq!(arena.depth(root), 1);
        assert_eq!(arena.depth(sub), 2);
        assert_eq!(arena.depth(file), 3);
    }
}
