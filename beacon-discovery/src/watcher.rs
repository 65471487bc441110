//! Per-key background watcher
//!
//! A watcher long-polls the registry with blocking queries and feeds every
//! answer into the cache. Consecutive failures are retried after a fixed
//! delay with the same index; at the retry ceiling the watcher drops its
//! cache entry and exits, so the next lookup starts over.

use crate::cache::Cache;
use crate::config::WatchConfig;
use crate::key::ResolutionKey;
use crate::registry::RegistryQuery;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Watcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Running,
    /// Terminal: the retry ceiling was reached
    GivingUp,
}

/// Why a watcher task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    GaveUp,
    Cancelled,
}

/// Blocking-query position and failure streak of one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchCursor {
    pub wait_index: u64,
    pub consecutive_failures: u32,
}

impl WatchCursor {
    pub fn new(start_index: u64) -> Self {
        Self {
            wait_index: start_index.max(1),
            consecutive_failures: 0,
        }
    }

    /// Advance to `index` after a successful query.
    ///
    /// An index that moves backwards means the registry state was reset;
    /// restart from 1 so the next query returns at once. The index never
    /// drops to 0, which the registry answers without blocking.
    pub fn record_success(&mut self, index: u64) {
        self.consecutive_failures = 0;
        self.wait_index = if index < self.wait_index || index == 0 { 1 } else { index };
    }

    /// Count a failed query; the index is kept for the retry.
    pub fn record_failure(&mut self, retry_ceiling: u32) -> WatchState {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= retry_ceiling {
            WatchState::GivingUp
        } else {
            WatchState::Running
        }
    }
}

/// Long-poll loop for one resolution key
pub struct Watcher {
    key: ResolutionKey,
    query: RegistryQuery,
    cache: Arc<Cache>,
    config: WatchConfig,
    shutdown: CancellationToken,
}

impl Watcher {
    pub fn new(
        key: ResolutionKey,
        query: RegistryQuery,
        cache: Arc<Cache>,
        config: WatchConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key,
            query,
            cache,
            config,
            shutdown,
        }
    }

    /// Watch until the retry ceiling is hit or shutdown is requested.
    ///
    /// The caller must hold the key's watch claim in the cache; it is
    /// released, together with the cache entry, when this returns.
    pub async fn run(self, start_index: u64) -> WatchExit {
        let mut cursor = WatchCursor::new(start_index);
        info!(service = %self.key, index = start_index, "watching service");

        let exit = loop {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break WatchExit::Cancelled,
                result = self.query.blocking(&self.key, cursor.wait_index, self.config.wait_time) => result,
            };

            match result {
                Ok((set, index)) => {
                    cursor.record_success(index);
                    let changed = self.cache.update(&self.key, set);
                    debug!(service = %self.key, index, changed, "blocking query returned");
                }
                Err(e) => {
                    let state = cursor.record_failure(self.config.retry_ceiling);
                    warn!(
                        service = %self.key,
                        failures = cursor.consecutive_failures,
                        error = %e,
                        "blocking query failed"
                    );
                    if state == WatchState::GivingUp {
                        break WatchExit::GaveUp;
                    }

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break WatchExit::Cancelled,
                        _ = tokio::time::sleep(self.config.retry_delay) => {}
                    }
                }
            }
        };

        self.cache.release(&self.key);
        match exit {
            WatchExit::GaveUp => warn!(
                service = %self.key,
                failures = cursor.consecutive_failures,
                "giving up watching service, cache entry dropped"
            ),
            WatchExit::Cancelled => debug!(service = %self.key, "watcher cancelled"),
        }
        exit
    }
}
