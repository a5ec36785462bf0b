//! Tunables for the database. Defaults follow the teacher's constants
//! (`BATCH_SIZE`, `WATCH_DEBOUNCE`); each can be overridden by an
//! environment variable, read once per process via `OnceLock`, mirroring
//! `main.rs`'s `env_truthy`/`OnceLock` pattern.

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

/// Upper bound on CPU worker threads used for parallel sort/search (§5):
/// previous power of two <= logical cpus, capped at 8.
fn worker_thread_cap() -> usize {
    static CAP: OnceLock<usize> = OnceLock::new();
    *CAP.get_or_init(|| {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut pow = 1usize;
        while pow * 2 <= cpus && pow < 8 {
            pow *= 2;
        }
        pow.max(1)
    })
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default_ms))
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Number of CPU worker threads for `sort_parallel`/parallel search.
    pub worker_threads: usize,
    /// Rows batched per scan status callback / bulk `index::add` flush.
    pub scan_batch_size: usize,
    /// Watcher event debounce window (§4.6).
    pub watch_debounce: Duration,
    /// Target chunk size for partitioning a search (`N = min(pool_threads,
    /// items / chunk_size)`, §4.11).
    pub search_chunk_size: usize,
    /// Status callback interval during a scan (§4.5: "at most every 100ms").
    pub scan_status_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            worker_threads: env_usize("FSDB_WORKER_THREADS", worker_thread_cap()),
            scan_batch_size: env_usize("FSDB_SCAN_BATCH_SIZE", 10_000),
            watch_debounce: env_millis("FSDB_WATCH_DEBOUNCE_MS", 300),
            search_chunk_size: env_usize("FSDB_SEARCH_CHUNK_SIZE", 1_000),
            scan_status_interval: env_millis("FSDB_SCAN_STATUS_INTERVAL_MS", 100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_at_least_one_worker() {
        let cfg = DatabaseConfig::default();
        assert!(cfg.worker_threads >= 1);
        assert!(cfg.worker_threads <= 8);
    }
}
