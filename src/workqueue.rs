//! C11 (part 2): work queue. The database facade — one background
//! worker thread draining [`WorkItem`]s off a channel, one notifier
//! thread fanning completion [`Event`]s out to subscribers on its own
//! thread (spec §4.12, §5, §6.3).
//!
//! Mirrors the teacher's split between the Tauri command handlers that
//! kick off a `std::thread::spawn` for a scan/search and the
//! `emit_index_state`/`emit_index_updated`/`emit_index_progress` family
//! in `main.rs` that reports progress back to the UI thread — except
//! here there is no UI thread to hop onto, so a dedicated notifier
//! thread plays that role and subscribers are plain closures instead of
//! a Tauri `AppHandle::emit`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::config::DatabaseConfig;
use crate::entry::Kind;
use crate::exclude::ExcludeManager;
use crate::index::{IndexStore, SortProperty};
use crate::query::{Query, SearchFlags};
use crate::scanner::{self, Include};
use crate::snapshot;
use crate::view::{EntryInfo, SelectionOp, SortDirection, View};

/// Snapshot of store-wide counts, posted with `load-finished` /
/// `scan-finished` (spec §6.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct DbInfo {
    pub num_files: usize,
    pub num_folders: usize,
}

/// Snapshot of one view's result set, posted with `search-finished` /
/// `sort-finished` (spec §6.3).
#[derive(Debug, Clone)]
pub struct SearchInfo {
    pub query: String,
    pub num_files: usize,
    pub num_folders: usize,
    pub num_selected_files: usize,
    pub num_selected_folders: usize,
    pub sort_order: SortProperty,
    pub sort_direction: SortDirection,
}

/// Completion events delivered on the notifier thread, in the order the
/// worker produced them (spec §6.3, §5: "subscribers never observe two
/// events from the same view out of order").
#[derive(Debug, Clone)]
pub enum Event {
    LoadStarted,
    LoadFinished(DbInfo),
    SaveStarted,
    SaveFinished { ok: bool },
    ScanStarted,
    ScanFinished(DbInfo),
    SearchStarted { view_id: u64 },
    SearchFinished { view_id: u64, info: SearchInfo },
    SortStarted { view_id: u64 },
    SortFinished { view_id: u64, info: SearchInfo },
    ItemInfoReady { view_id: u64, info: Option<EntryInfo> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SupersedeKind {
    Search,
    Sort,
    GetItemInfo,
    ModifySelection,
}

pub enum WorkKind {
    LoadFromFile(PathBuf),
    SaveToFile(PathBuf),
    Scan {
        includes: Vec<Include>,
        excludes: ExcludeManager,
        flags: u32,
    },
    Rescan,
    Search {
        view_id: u64,
        query_text: String,
        flags: SearchFlags,
        sort_order: SortProperty,
        direction: SortDirection,
    },
    Sort {
        view_id: u64,
        sort_order: SortProperty,
        direction: SortDirection,
    },
    /// `field_mask` is accepted for wire-compatibility with spec §4.12's
    /// signature; this crate has no partial-field fetch path, so it is
    /// unused and `GetItemInfo` always returns a fully populated
    /// [`EntryInfo`].
    GetItemInfo {
        view_id: u64,
        row_idx: usize,
        field_mask: u32,
    },
    ModifySelection {
        view_id: u64,
        op: SelectionOp,
        idx1: usize,
        idx2: usize,
    },
    Shutdown,
}

struct WorkItem {
    kind: WorkKind,
    cancel: CancelToken,
}

struct Inner {
    store: Mutex<IndexStore>,
    views: Mutex<HashMap<u64, View>>,
    next_view_id: AtomicU64,
    cfg: DatabaseConfig,
    last_scan: Mutex<Option<(Vec<Include>, ExcludeManager, u32)>>,
    backlog: Mutex<HashMap<(SupersedeKind, u64), CancelToken>>,
}

impl Inner {
    fn new(cfg: DatabaseConfig) -> Self {
        Inner {
            store: Mutex::new(IndexStore::new(4096)),
            views: Mutex::new(HashMap::new()),
            next_view_id: AtomicU64::new(1),
            cfg,
            last_scan: Mutex::new(None),
            backlog: Mutex::new(HashMap::new()),
        }
    }
}

fn supersede_key(kind: &WorkKind) -> Option<(SupersedeKind, u64)> {
    match kind {
        WorkKind::Search { view_id, .. } => Some((SupersedeKind::Search, *view_id)),
        WorkKind::Sort { view_id, .. } => Some((SupersedeKind::Sort, *view_id)),
        WorkKind::GetItemInfo { view_id, .. } => Some((SupersedeKind::GetItemInfo, *view_id)),
        WorkKind::ModifySelection { view_id, .. } => Some((SupersedeKind::ModifySelection, *view_id)),
        _ => None,
    }
}

/// One database: an [`IndexStore`] behind a single write lock, a view
/// registry, and the worker/notifier thread pair spec §5 calls for
/// ("exactly one database worker thread per database, exactly one
/// notifier thread per database").
pub struct Database {
    inner: Arc<Inner>,
    work_tx: Sender<WorkItem>,
    subscribers: Arc<Mutex<Vec<Box<dyn Fn(Event) + Send>>>>,
    worker_handle: Option<JoinHandle<()>>,
    notifier_handle: Option<JoinHandle<()>>,
}

impl Database {
    pub fn open(cfg: DatabaseConfig) -> Self {
        let (work_tx, work_rx) = unbounded::<WorkItem>();
        let (events_tx, events_rx) = unbounded::<Event>();
        let inner = Arc::new(Inner::new(cfg));

        let worker_inner = Arc::clone(&inner);
        let worker_handle = std::thread::spawn(move || worker_loop(worker_inner, work_rx, events_tx));

        let subscribers: Arc<Mutex<Vec<Box<dyn Fn(Event) + Send>>>> = Arc::new(Mutex::new(Vec::new()));
        let notifier_subs = Arc::clone(&subscribers);
        let notifier_handle = std::thread::spawn(move || {
            for event in events_rx {
                for f in notifier_subs.lock().iter() {
                    f(event.clone());
                }
            }
        });

        Database {
            inner,
            work_tx,
            subscribers,
            worker_handle: Some(worker_handle),
            notifier_handle: Some(notifier_handle),
        }
    }

    /// Registers a subscriber. Callbacks run on the notifier thread, in
    /// enqueue order, never concurrently with each other (spec §6.3).
    pub fn subscribe(&self, f: impl Fn(Event) + Send + 'static) {
        self.subscribers.lock().push(Box::new(f));
    }

    pub fn register_view(&self) -> u64 {
        let id = self.inner.next_view_id.fetch_add(1, AtomicOrdering::Relaxed);
        self.inner.views.lock().insert(id, View::new(id));
        id
    }

    pub fn unregister_view(&self, view_id: u64) {
        self.inner.views.lock().remove(&view_id);
    }

    pub fn num_files(&self) -> usize {
        self.inner.store.lock().num_files()
    }

    pub fn num_folders(&self) -> usize {
        self.inner.store.lock().num_folders()
    }

    fn enqueue(&self, kind: WorkKind) -> CancelToken {
        let cancel = CancelToken::new();
        if let Some(key) = supersede_key(&kind) {
            let superseded = self.inner.backlog.lock().insert(key, cancel.clone());
            if let Some(prior) = superseded {
                prior.cancel();
            }
        }
        let item = WorkItem { kind, cancel: cancel.clone() };
        // The channel is unbounded and the worker is the sole consumer;
        // a send error only happens after the worker thread has already
        // exited, which only `shutdown` triggers.
        let _ = self.work_tx.send(item);
        cancel
    }

    pub fn load_from_file(&self, path: impl Into<PathBuf>) -> CancelToken {
        self.enqueue(WorkKind::LoadFromFile(path.into()))
    }

    pub fn save_to_file(&self, path: impl Into<PathBuf>) -> CancelToken {
        self.enqueue(WorkKind::SaveToFile(path.into()))
    }

    pub fn scan(&self, includes: Vec<Include>, excludes: ExcludeManager, flags: u32) -> CancelToken {
        self.enqueue(WorkKind::Scan { includes, excludes, flags })
    }

    pub fn rescan(&self) -> CancelToken {
        self.enqueue(WorkKind::Rescan)
    }

    pub fn search(
        &self,
        view_id: u64,
        query_text: impl Into<String>,
        flags: SearchFlags,
        sort_order: SortProperty,
        direction: SortDirection,
    ) -> CancelToken {
        self.enqueue(WorkKind::Search {
            view_id,
            query_text: query_text.into(),
            flags,
            sort_order,
            direction,
        })
    }

    pub fn sort(&self, view_id: u64, sort_order: SortProperty, direction: SortDirection) -> CancelToken {
        self.enqueue(WorkKind::Sort { view_id, sort_order, direction })
    }

    pub fn get_item_info(&self, view_id: u64, row_idx: usize, field_mask: u32) -> CancelToken {
        self.enqueue(WorkKind::GetItemInfo { view_id, row_idx, field_mask })
    }

    pub fn modify_selection(&self, view_id: u64, op: SelectionOp, idx1: usize, idx2: usize) -> CancelToken {
        self.enqueue(WorkKind::ModifySelection { view_id, op, idx1, idx2 })
    }

    /// Stops the worker and notifier threads. Outstanding work items
    /// already queued are drained (run to completion or observed
    /// cancel) before the worker exits; no new events are posted after
    /// this returns.
    pub fn shutdown(&mut self) {
        let _ = self.work_tx.send(WorkItem {
            kind: WorkKind::Shutdown,
            cancel: CancelToken::new(),
        });
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.notifier_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.worker_handle.is_some() {
            self.shutdown();
        }
    }
}

fn db_info(store: &IndexStore) -> DbInfo {
    DbInfo {
        num_files: store.num_files(),
        num_folders: store.num_folders(),
    }
}

fn selected_counts(store: &IndexStore, view: &View) -> (usize, usize) {
    let mut files = 0;
    let mut folders = 0;
    for &r in &view.selection {
        match store.arena.get(r).kind {
            Kind::File => files += 1,
            Kind::Folder => folders += 1,
        }
    }
    (files, folders)
}

fn search_info(store: &IndexStore, view: &View) -> SearchInfo {
    let (sel_files, sel_folders) = selected_counts(store, view);
    SearchInfo {
        query: view.query_text.clone(),
        num_files: view.num_files(),
        num_folders: view.num_folders(),
        num_selected_files: sel_files,
        num_selected_folders: sel_folders,
        sort_order: view.sort_order,
        sort_direction: view.sort_direction,
    }
}

/// Cancels every currently-tracked `Search`/`Sort` work item (spec §5:
/// "the worker enforces a strict serial order between a Scan and any
/// subsequent Search: all prior searches against the old store are
/// cancelled before the scan begins").
fn cancel_pending_searches(inner: &Inner) {
    for (key, token) in inner.backlog.lock().iter() {
        if matches!(key.0, SupersedeKind::Search | SupersedeKind::Sort) {
            token.cancel();
        }
    }
}

fn worker_loop(inner: Arc<Inner>, rx: Receiver<WorkItem>, events_tx: Sender<Event>) {
    for item in rx {
        if item.cancel.is_cancelled() && !matches!(item.kind, WorkKind::Shutdown) {
            continue;
        }
        match item.kind {
            WorkKind::Shutdown => break,
            WorkKind::LoadFromFile(path) => handle_load(&inner, &events_tx, &path),
            WorkKind::SaveToFile(path) => handle_save(&inner, &events_tx, &path),
            WorkKind::Scan { includes, excludes, flags } => {
                handle_scan(&inner, &events_tx, includes, excludes, flags, &item.cancel)
            }
            WorkKind::Rescan => handle_rescan(&inner, &events_tx, &item.cancel),
            WorkKind::Search { view_id, query_text, flags, sort_order, direction } => {
                handle_search(&inner, &events_tx, view_id, query_text, flags, sort_order, direction, &item.cancel)
            }
            WorkKind::Sort { view_id, sort_order, direction } => {
                handle_sort(&inner, &events_tx, view_id, sort_order, direction)
            }
            WorkKind::GetItemInfo { view_id, row_idx, .. } => handle_item_info(&inner, &events_tx, view_id, row_idx),
            WorkKind::ModifySelection { view_id, op, idx1, idx2 } => {
                handle_modify_selection(&inner, view_id, op, idx1, idx2)
            }
        }
    }
}

fn handle_load(inner: &Inner, events_tx: &Sender<Event>, path: &std::path::Path) {
    log::info!("loading snapshot from {}", path.display());
    let _ = events_tx.send(Event::LoadStarted);
    match snapshot::load(path, inner.cfg.scan_batch_size) {
        Ok(new_store) => {
            let info = db_info(&new_store);
            let mut store = inner.store.lock();
            *store = new_store;
            let _ = events_tx.send(Event::LoadFinished(info));
        }
        Err(e) => {
            log::error!("snapshot load failed: {e}");
            let _ = events_tx.send(Event::LoadFinished(DbInfo::default()));
        }
    }
}

fn handle_save(inner: &Inner, events_tx: &Sender<Event>, path: &std::path::Path) {
    log::info!("saving snapshot to {}", path.display());
    let _ = events_tx.send(Event::SaveStarted);
    let ok = {
        let mut store = inner.store.lock();
        match snapshot::save(&mut store, path) {
            Ok(()) => true,
            Err(e) => {
                log::error!("snapshot save failed: {e}");
                false
            }
        }
    };
    let _ = events_tx.send(Event::SaveFinished { ok });
}

fn handle_scan(
    inner: &Inner,
    events_tx: &Sender<Event>,
    includes: Vec<Include>,
    excludes: ExcludeManager,
    flags: u32,
    cancel: &CancelToken,
) {
    cancel_pending_searches(inner);
    log::info!("scan starting over {} include(s)", includes.len());
    let _ = events_tx.send(Event::ScanStarted);

    let (mut new_store, stats) = scanner::scan(
        &includes,
        &excludes,
        cancel,
        |dir| log::trace!("scanning {}", dir.display()),
        inner.cfg.scan_status_interval,
        inner.cfg.scan_batch_size,
    );
    if !stats.errors.is_empty() {
        log::warn!("scan hit {} recoverable error(s)", stats.errors.len());
    }
    if cancel.is_cancelled() {
        log::debug!("scan cancelled, keeping previous store");
        return;
    }
    new_store.set_flags(flags);
    let info = db_info(&new_store);

    {
        let mut store = inner.store.lock();
        let old_store = std::mem::replace(&mut *store, new_store);
        let mut views = inner.views.lock();
        for view in views.values_mut() {
            view.migrate_selection(&old_store, &mut store);
        }
    }
    *inner.last_scan.lock() = Some((includes, excludes, flags));
    log::info!("scan finished: {} files, {} folders", info.num_files, info.num_folders);
    let _ = events_tx.send(Event::ScanFinished(info));
}

fn handle_rescan(inner: &Inner, events_tx: &Sender<Event>, cancel: &CancelToken) {
    let last = inner.last_scan.lock().clone();
    match last {
        Some((includes, excludes, flags)) => handle_scan(inner, events_tx, includes, excludes, flags, cancel),
        None => log::warn!("rescan requested before any scan has run; ignoring"),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_search(
    inner: &Inner,
    events_tx: &Sender<Event>,
    view_id: u64,
    query_text: String,
    flags: SearchFlags,
    sort_order: SortProperty,
    direction: SortDirection,
    cancel: &CancelToken,
) {
    let _ = events_tx.send(Event::SearchStarted { view_id });
    let query = match Query::parse(&query_text, flags) {
        Ok(q) => q,
        Err(e) => {
            log::warn!("query parse failed for view {view_id}: {e}");
            return;
        }
    };
    for diag in &query.diagnostics {
        log::warn!("query diagnostic: {} ({})", diag.message, diag.token);
    }

    let mut store = inner.store.lock();
    let mut views = inner.views.lock();
    let Some(view) = views.get_mut(&view_id) else {
        log::debug!("search for unknown view {view_id}, dropping");
        return;
    };
    view.apply_search(&mut store, &query, sort_order, direction, cancel, &inner.cfg);
    if cancel.is_cancelled() {
        log::debug!("search cancelled for view {view_id}");
        return;
    }
    let info = search_info(&store, view);
    let _ = events_tx.send(Event::SearchFinished { view_id, info });
}

fn handle_sort(inner: &Inner, events_tx: &Sender<Event>, view_id: u64, sort_order: SortProperty, direction: SortDirection) {
    let _ = events_tx.send(Event::SortStarted { view_id });
    let mut store = inner.store.lock();
    let mut views = inner.views.lock();
    let Some(view) = views.get_mut(&view_id) else {
        log::debug!("sort for unknown view {view_id}, dropping");
        return;
    };
    view.apply_sort(&mut store, sort_order, direction);
    let info = search_info(&store, view);
    let _ = events_tx.send(Event::SortFinished { view_id, info });
}

fn handle_item_info(inner: &Inner, events_tx: &Sender<Event>, view_id: u64, row_idx: usize) {
    let store = inner.store.lock();
    let views = inner.views.lock();
    let info = views
        .get(&view_id)
        .and_then(|view| view.entry_at(row_idx))
        .map(|r| View::entry_info(&store, r));
    let _ = events_tx.send(Event::ItemInfoReady { view_id, info });
}

fn handle_modify_selection(inner: &Inner, view_id: u64, op: SelectionOp, idx1: usize, idx2: usize) {
    if let Some(view) = inner.views.lock().get_mut(&view_id) {
        view.modify_selection(op, idx1, idx2);
    }
}
