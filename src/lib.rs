//! `fsdb`: an in-memory filesystem index and query engine for a desktop
//! file-search tool (spec §1).
//!
//! A [`Database`] owns one [`index::IndexStore`] and a background
//! worker/notifier thread pair; callers submit work (scan, search,
//! sort, …) through it and observe completion via
//! [`Database::subscribe`]. Everything below the database facade —
//! the packed array, slab pool, entry record, index store, scanner,
//! watcher, snapshot codec and query engine — is usable on its own for
//! callers that want to build the store synchronously without the
//! work-queue machinery (see the integration tests under `tests/` for
//! both styles).
//!
//! Out of scope, per spec §1: GUI widgets, clipboard integration, icon
//! lookup, desktop file-type resolution, the preferences dialog, CLI
//! entry points, config persistence and translation plumbing, and the
//! notify-API syscall plumbing underneath [`watcher`].

pub mod array;
pub mod cancel;
pub mod config;
pub mod entry;
pub mod error;
pub mod exclude;
pub mod index;
pub mod query;
pub mod scanner;
pub mod search;
pub mod slab;
pub mod snapshot;
pub mod view;
pub mod watcher;
pub mod workqueue;

pub use cancel::CancelToken;
pub use config::DatabaseConfig;
pub use entry::{Entry, EntryRef, Kind};
pub use error::{Error, QueryDiagnostic, Result};
pub use exclude::ExcludeManager;
pub use index::{IndexStore, SortProperty};
pub use query::{Query, SearchFlags};
pub use scanner::Include;
pub use view::{EntryInfo, SelectionOp, SortDirection, View};
pub use workqueue::{Database, DbInfo, Event, SearchInfo};
