//! Per-run memoization of remote fetches.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error};

use crate::stats::StatTables;

/// Default delay slept before every uncached fetch.
pub const DEFAULT_PACING: Duration = Duration::from_millis(600);

/// In-memory fetch cache shared by the collection workers of one run.
///
/// Keys combine the stage, entity id and parameters, e.g.
/// `player_info_2544` or `league_leaders_2023-24_PTS`. Nothing is persisted.
pub struct FetchCache {
    entries: Mutex<HashMap<String, StatTables>>,
    pacing: Duration,
    sleep: fn(Duration),
}

impl FetchCache {
    /// Creates an empty cache that sleeps `pacing` before each remote fetch.
    pub fn new(pacing: Duration) -> Self {
        Self::with_sleep(pacing, thread::sleep)
    }

    /// Same as [`FetchCache::new`] with an injectable sleep function.
    pub fn with_sleep(pacing: Duration, sleep: fn(Duration)) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            pacing,
            sleep,
        }
    }

    /// Returns the cached value for `key`, or paces, fetches and stores it.
    ///
    /// The lock is released while sleeping and fetching, so two workers racing
    /// on the same key may both fetch; the later insert wins.
    pub fn get_or_fetch<F>(&self, key: &str, fetch: F) -> Result<StatTables>
    where
        F: FnOnce() -> Result<StatTables>,
    {
        if let Some(hit) = self.lookup(key) {
            debug!(key, "cache hit");
            return Ok(hit);
        }

        if !self.pacing.is_zero() {
            (self.sleep)(self.pacing);
        }

        match fetch() {
            Ok(value) => {
                self.entries
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(key.to_string(), value.clone());
                Ok(value)
            }
            Err(err) => {
                error!(key, "error fetching data: {err:#}");
                Err(err)
            }
        }
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// True when nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<StatTables> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }
}

impl Default for FetchCache {
    fn default() -> Self {
        Self::new(DEFAULT_PACING)
    }
}
