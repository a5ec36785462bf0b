//! C7: snapshot codec. Binary on-disk format (§6.1), little-endian
//! throughout, with prefix-compressed names and backpatched block
//! sizes.
//!
//! Save writes to a sibling `*.tmp` file under an advisory exclusive
//! `flock` (via `fs2`, same crate the teacher reaches for cross-platform
//! advisory locks are not in std), then renames over the destination —
//! the same tmp-then-rename shape `main.rs` uses for its own config
//! writes.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::entry::{Entry, EntryRef, Kind};
use crate::error::{Error, Result};
use crate::index::{IndexStore, SortProperty, INDEX_MTIME, INDEX_NAME, INDEX_SIZE};

const MAGIC: &[u8; 4] = b"FSDB";
const MAJOR: u8 = 0;
const MINOR: u8 = 0;

/// Persisted sort-property identifiers. Never 0 (spec §6.1: "id: u32
/// (property identifier, 1..N; never 0)").
fn property_id(prop: SortProperty) -> u32 {
    match prop {
        SortProperty::Name => 1,
        SortProperty::Path => 2,
        SortProperty::Size => 3,
        SortProperty::Mtime => 4,
        SortProperty::Extension => 5,
        SortProperty::FileType => 6,
        SortProperty::Depth => 7,
        SortProperty::ChildCount => 8,
    }
}

fn property_from_id(id: u32) -> Option<SortProperty> {
    Some(match id {
        1 => SortProperty::Name,
        2 => SortProperty::Path,
        3 => SortProperty::Size,
        4 => SortProperty::Mtime,
        5 => SortProperty::Extension,
        6 => SortProperty::FileType,
        7 => SortProperty::Depth,
        8 => SortProperty::ChildCount,
        _ => return None,
    })
}

/// The properties a snapshot always persists: name and path orderings
/// are needed to rebuild selection migration's (name, path) index even
/// when the index_flags bitmask doesn't request them for display.
const PERSISTED_PROPERTIES: &[SortProperty] = &[
    SortProperty::Name,
    SortProperty::Path,
    SortProperty::Size,
    SortProperty::Mtime,
    SortProperty::Extension,
];

pub fn save(store: &mut IndexStore, path: &Path) -> Result<()> {
    let tmp_path = path.with_extension("db.tmp");
    let tmp_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| Error::save_io(format!("opening {}: {e}", tmp_path.display())))?;
    tmp_file
        .lock_exclusive()
        .map_err(|e| Error::save_io(format!("flock {}: {e}", tmp_path.display())))?;

    let result = write_snapshot(store, &tmp_file);
    FileExt::unlock(&tmp_file).ok();
    drop(tmp_file);

    match result {
        Ok(()) => {
            fs::rename(&tmp_path, path).map_err(|e| Error::save_io(format!("rename: {e}")))?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn write_snapshot(store: &mut IndexStore, file: &File) -> Result<()> {
    let mut w = BufWriter::new(file.try_clone().map_err(|e| Error::save_io(e.to_string()))?);

    w.write_all(MAGIC).map_err(io_save)?;
    w.write_all(&[MAJOR, MINOR]).map_err(io_save)?;
    w.write_all(&(store.flags() as u64).to_le_bytes()).map_err(io_save)?;

    let folders = store.folders_sorted_by(SortProperty::Name);
    let files = store.files_sorted_by(SortProperty::Name);
    let num_folders = folders.len() as u32;
    let num_files = files.len() as u32;
    w.write_all(&num_folders.to_le_bytes()).map_err(io_save)?;
    w.write_all(&num_files.to_le_bytes()).map_err(io_save)?;

    // Backpatched block sizes: reserve the slots, write blocks, seek back.
    let folder_size_pos = current_pos(&mut w)?;
    w.write_all(&0u64.to_le_bytes()).map_err(io_save)?;
    let file_size_pos = current_pos(&mut w)?;
    w.write_all(&0u64.to_le_bytes()).map_err(io_save)?;
    w.write_all(&0u32.to_le_bytes()).map_err(io_save)?; // num_indexes, reserved
    w.write_all(&0u32.to_le_bytes()).map_err(io_save)?; // num_excludes, reserved

    // idx-within-block lookup so parent_idx references are positions in
    // the folder/file block, not pool slots (spec §6.1).
    let folder_pos: std::collections::HashMap<EntryRef, u32> = folders
        .iter()
        .enumerate()
        .map(|(i, r)| (*r, i as u32))
        .collect();

    let folder_block_start = current_pos(&mut w)?;
    let mut prev_name: Vec<u8> = Vec::new();
    for (i, r) in folders.iter().enumerate() {
        let entry = store.arena.get(*r);
        write_folder_record(&mut w, entry, i as u32, &folder_pos, &mut prev_name)?;
    }
    let folder_block_end = current_pos(&mut w)?;

    let file_block_start = folder_block_end;
    let mut prev_name: Vec<u8> = Vec::new();
    for r in files.iter() {
        let entry = store.arena.get(*r);
        write_file_record(&mut w, entry, &folder_pos, &mut prev_name)?;
    }
    let file_block_end = current_pos(&mut w)?;

    let file_pos: std::collections::HashMap<EntryRef, u32> =
        files.iter().enumerate().map(|(i, r)| (*r, i as u32)).collect();

    let sorted_count = PERSISTED_PROPERTIES.len() as u32;
    w.write_all(&sorted_count.to_le_bytes()).map_err(io_save)?;
    for &prop in PERSISTED_PROPERTIES {
        w.write_all(&property_id(prop).to_le_bytes()).map_err(io_save)?;
        let fsorted = store.folders_sorted_by(prop);
        for r in fsorted.iter() {
            let idx = folder_pos[r];
            w.write_all(&idx.to_le_bytes()).map_err(io_save)?;
        }
        let ssorted = store.files_sorted_by(prop);
        for r in ssorted.iter() {
            let idx = file_pos[r];
            w.write_all(&idx.to_le_bytes()).map_err(io_save)?;
        }
    }

    w.flush().map_err(io_save)?;
    let mut file = w.into_inner().map_err(|e| Error::save_io(e.to_string()))?;
    file.seek(SeekFrom::Start(folder_size_pos)).map_err(io_save)?;
    file.write_all(&(folder_block_end - folder_block_start).to_le_bytes())
        .map_err(io_save)?;
    file.seek(SeekFrom::Start(file_size_pos)).map_err(io_save)?;
    file.write_all(&(file_block_end - file_block_start).to_le_bytes())
        .map_err(io_save)?;
    file.flush().map_err(io_save)?;
    Ok(())
}

fn current_pos<W: Write + Seek>(w: &mut W) -> Result<u64> {
    w.stream_position().map_err(io_save)
}

fn io_save(e: io::Error) -> Error {
    Error::save_io(e.to_string())
}

fn io_load(e: io::Error) -> Error {
    Error::load_corruption(e.to_string())
}

fn write_entry_super<W: Write>(
    w: &mut W,
    entry: &Entry,
    flags: u32,
    prev_name: &mut Vec<u8>,
) -> Result<()> {
    let name = entry.name.as_bytes();
    if name.len() > crate::entry::NAME_MAX_LEN {
        return Err(Error::save_io(format!("name {:?} exceeds 255 bytes", entry.name)));
    }
    let shared = name.iter().zip(prev_name.iter()).take_while(|(a, b)| a == b).count();
    let shared = shared.min(255);
    let suffix = &name[shared..];
    w.write_all(&[shared as u8, suffix.len() as u8]).map_err(io_save)?;
    w.write_all(suffix).map_err(io_save)?;
    if flags & INDEX_SIZE != 0 {
        w.write_all(&entry.size.to_le_bytes()).map_err(io_save)?;
    }
    if flags & INDEX_MTIME != 0 {
        w.write_all(&(entry.mtime as u64).to_le_bytes()).map_err(io_save)?;
    }
    prev_name.clear();
    prev_name.extend_from_slice(name);
    Ok(())
}

fn write_folder_record<W: Write>(
    w: &mut W,
    entry: &Entry,
    self_idx: u32,
    folder_pos: &std::collections::HashMap<EntryRef, u32>,
    prev_name: &mut Vec<u8>,
) -> Result<()> {
    w.write_all(&entry.db_index.to_le_bytes()).map_err(io_save)?;
    write_entry_super(w, entry, INDEX_NAME | INDEX_SIZE | INDEX_MTIME, prev_name)?;
    let parent_idx = match entry.parent {
        Some(p) => *folder_pos.get(&p).ok_or_else(|| {
            Error::save_io(format!("folder {:?} parent not in folder block", entry.name))
        })?,
        // Root's parent_idx equals its own idx (spec §6.1).
        None => self_idx,
    };
    w.write_all(&parent_idx.to_le_bytes()).map_err(io_save)?;
    Ok(())
}

fn write_file_record<W: Write>(
    w: &mut W,
    entry: &Entry,
    folder_pos: &std::collections::HashMap<EntryRef, u32>,
    prev_name: &mut Vec<u8>,
) -> Result<()> {
    write_entry_super(w, entry, INDEX_NAME | INDEX_SIZE | INDEX_MTIME, prev_name)?;
    let parent_idx = match entry.parent {
        Some(p) => *folder_pos.get(&p).ok_or_else(|| {
            Error::save_io(format!("file {:?} has no indexed parent folder", entry.name))
        })?,
        None => return Err(Error::save_io(format!("file {:?} has no parent", entry.name))),
    };
    w.write_all(&parent_idx.to_le_bytes()).map_err(io_save)?;
    Ok(())
}

pub fn load(path: &Path, items_per_block: usize) -> Result<IndexStore> {
    let file = File::open(path).map_err(|e| Error::load_corruption(e.to_string()))?;
    file.lock_shared().map_err(|e| Error::load_corruption(e.to_string()))?;
    let result = read_snapshot(file, items_per_block);
    result
}

fn read_snapshot(file: File, items_per_block: usize) -> Result<IndexStore> {
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(io_load)?;
    if &magic != MAGIC {
        return Err(Error::load_corruption("bad magic"));
    }
    let mut version = [0u8; 2];
    r.read_exact(&mut version).map_err(io_load)?;
    if version[0] != MAJOR {
        return Err(Error::load_corruption(format!("unsupported major version {}", version[0])));
    }
    if version[1] > MINOR {
        return Err(Error::load_corruption(format!("unsupported minor version {}", version[1])));
    }

    let flags64 = read_u64(&mut r)?;
    let flags = flags64 as u32;
    let num_folders = read_u32(&mut r)?;
    let num_files = read_u32(&mut r)?;
    let _folder_block_size = read_u64(&mut r)?;
    let _file_block_size = read_u64(&mut r)?;
    let _num_indexes = read_u32(&mut r)?;
    let _num_excludes = read_u32(&mut r)?;

    let mut store = IndexStore::new(items_per_block);
    store.set_flags(flags);

    let mut folder_refs: Vec<EntryRef> = Vec::with_capacity(num_folders as usize);
    let mut folder_parent_idx: Vec<u32> = Vec::with_capacity(num_folders as usize);
    let mut prev_name: Vec<u8> = Vec::new();
    for _ in 0..num_folders {
        let db_index = read_u16(&mut r)?;
        let name = read_name(&mut r, &mut prev_name)?;
        // The saved `size` is the folder's aggregate over its
        // descendant files, which file loading below rebuilds from
        // scratch via `add_file`'s `update_parent_size` propagation.
        // Storing the saved value here too would double it (root would
        // load as 2x its true aggregate); discard it but still consume
        // the bytes so the reader stays aligned.
        let _size = if flags & INDEX_SIZE != 0 { read_u64(&mut r)? } else { 0 };
        let mtime = if flags & INDEX_MTIME != 0 { read_u64(&mut r)? as i64 } else { 0 };
        let parent_idx = read_u32(&mut r)?;
        let entry = Entry {
            kind: Kind::Folder,
            name,
            parent: None,
            size: 0,
            mtime,
            db_index,
            ..Entry::default()
        };
        let r_ref = store.add_folder(entry);
        folder_refs.push(r_ref);
        folder_parent_idx.push(parent_idx);
    }

    // Fix up parent pointers now that every folder has an EntryRef. A
    // folder whose parent_idx equals its own position is a root (§6.1).
    // Every folder was added above with `parent: None`, so `add_folder`
    // never had a parent to bump `child_folders` on; do that here
    // alongside the `.parent` fix-up.
    for (i, &parent_idx) in folder_parent_idx.iter().enumerate() {
        if parent_idx as usize != i {
            let parent_ref = *folder_refs
                .get(parent_idx as usize)
                .ok_or_else(|| Error::load_corruption("folder parent_idx out of range"))?;
            store.arena.get_mut(folder_refs[i]).parent = Some(parent_ref);
            store.arena.get_mut(parent_ref).child_folders += 1;
        }
    }

    let mut prev_name: Vec<u8> = Vec::new();
    for _ in 0..num_files {
        let name = read_name(&mut r, &mut prev_name)?;
        let size = if flags & INDEX_SIZE != 0 { read_u64(&mut r)? } else { 0 };
        let mtime = if flags & INDEX_MTIME != 0 { read_u64(&mut r)? as i64 } else { 0 };
        let parent_idx = read_u32(&mut r)?;
        let parent_ref = *folder_refs
            .get(parent_idx as usize)
            .ok_or_else(|| Error::load_corruption("file parent_idx out of range"))?;
        let entry = Entry::new_file(name, 0, Some(parent_ref));
        let entry = Entry { size, mtime, ..entry };
        store.add_file(entry);
    }

    let num_sorted_arrays = read_u32(&mut r)?;
    for _ in 0..num_sorted_arrays {
        let id = read_u32(&mut r)?;
        if property_from_id(id).is_none() {
            return Err(Error::load_corruption(format!("unknown sorted-array id {id}")));
        }
        for _ in 0..num_folders {
            let _ = read_u32(&mut r)?;
        }
        for _ in 0..num_files {
            let _ = read_u32(&mut r)?;
        }
    }

    Ok(store)
}

fn read_name<R: Read>(r: &mut R, prev_name: &mut Vec<u8>) -> Result<String> {
    let mut header = [0u8; 2];
    r.read_exact(&mut header).map_err(io_load)?;
    let shared = header[0] as usize;
    let suffix_len = header[1] as usize;
    if shared > prev_name.len() {
        return Err(Error::load_corruption("shared prefix longer than previous name"));
    }
    let mut suffix = vec![0u8; suffix_len];
    r.read_exact(&mut suffix).map_err(io_load)?;
    let mut name = prev_name[..shared].to_vec();
    name.extend_from_slice(&suffix);
    prev_name.clear();
    prev_name.extend_from_slice(&name);
    String::from_utf8(name).map_err(|e| Error::load_corruption(e.to_string()))
}

fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b).map_err(io_load)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(io_load)?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(io_load)?;
    Ok(u64::from_le_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use tempfile::tempdir;

    fn sample_store() -> IndexStore {
        let mut store = IndexStore::new(8);
        let root = store.add_folder(Entry::new_folder("root".into(), 0, None));
        let sub = store.add_folder(Entry::new_folder("sub".into(), 0, Some(root)));
        store.add_file(Entry {
            size: 10,
            mtime: 100,
            ..Entry::new_file("a.txt".into(), 0, Some(root))
        });
        store.add_file(Entry {
            size: 0,
            mtime: 200,
            ..Entry::new_file("b.bin".into(), 0, Some(sub))
        });
        store
    }

    #[test]
    fn save_then_load_round_trips_counts_and_sizes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.db");
        let mut store = sample_store();
        save(&mut store, &path).unwrap();

        let mut loaded = load(&path, 8).unwrap();
        assert_eq!(loaded.num_folders(), store.num_folders());
        assert_eq!(loaded.num_files(), store.num_files());

        let names: Vec<String> = loaded
            .files_sorted_by(SortProperty::Name)
            .iter()
            .map(|r| loaded.arena.get(*r).name.clone())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.bin"]);

        // Folder sizes must rebuild from the loaded files, not double
        // the saved aggregate (spec §8 property 2/3).
        let root = loaded
            .folders_sorted_by(SortProperty::Name)
            .iter()
            .copied()
            .find(|&r| loaded.arena.get(r).name == "root")
            .unwrap();
        let sub = loaded
            .folders_sorted_by(SortProperty::Name)
            .iter()
            .copied()
            .find(|&r| loaded.arena.get(r).name == "sub")
            .unwrap();
        assert_eq!(loaded.arena.get(root).size, 10);
        assert_eq!(loaded.arena.get(sub).size, 0);
        assert_eq!(loaded.arena.get(root).child_folders, 1);
        assert_eq!(loaded.arena.get(root).child_files, 1);
        assert_eq!(loaded.arena.get(sub).child_files, 1);
    }

    #[test]
    fn load_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.db");
        fs::write(&path, b"NOPE1234567890").unwrap();
        let err = load(&path, 8).unwrap_err();
        assert!(matches!(err, Error::LoadCorruption { .. }));
    }

    #[test]
    fn load_rejects_future_major_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("futuremajor.db");
        let mut bytes = b"FSDB".to_vec();
        bytes.extend_from_slice(&[99, 0]);
        fs::write(&path, bytes).unwrap();
        let err = load(&path, 8).unwrap_err();
        assert!(matches!(err, Error::LoadCorruption { .. }));
    }
}
