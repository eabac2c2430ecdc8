//! User-curated set of instruments, persisted per exchange partition.

pub mod storage;

use crate::core::AppError;
use crate::gateway::types::Exchange;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{KeyValueStorage, MemoryStorage};
use tracing::{debug, info, warn};

const NSE_WATCHLIST_KEY: &str = "nseWatchlistTokens";
const BSE_WATCHLIST_KEY: &str = "bseWatchlistTokens";

fn storage_key(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::Nse => NSE_WATCHLIST_KEY,
        Exchange::Bse => BSE_WATCHLIST_KEY,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub exchange: Exchange,
    pub token: String,
}

impl WatchlistEntry {
    pub fn new(exchange: Exchange, token: impl Into<String>) -> Self {
        Self {
            exchange,
            token: token.into(),
        }
    }

    /// Validate user input: symbol tokens are non-empty ASCII digit strings.
    pub fn parse(exchange: Exchange, raw_token: &str) -> Result<Self, AppError> {
        let token = raw_token.trim();
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::InvalidToken(raw_token.to_string()));
        }
        Ok(Self::new(exchange, token))
    }
}

pub struct WatchlistStore {
    storage: Arc<dyn KeyValueStorage>,
    nse: Vec<String>,
    bse: Vec<String>,
    ready: bool,
    // Set after the first storage failure; from then on the set lives in memory only.
    degraded: bool,
}

impl WatchlistStore {
    /// Read both partitions once. Never fails: unreadable storage degrades
    /// the store to in-memory for the rest of the session.
    pub fn load(storage: Arc<dyn KeyValueStorage>) -> Self {
        let mut store = Self {
            storage,
            nse: Vec::new(),
            bse: Vec::new(),
            ready: false,
            degraded: false,
        };

        for exchange in Exchange::ALL {
            let tokens = store.read_partition(exchange);
            *store.partition_mut(exchange) = tokens;
        }
        store.ready = true;
        info!(
            nse = store.nse.len(),
            bse = store.bse.len(),
            degraded = store.degraded,
            "watchlist loaded"
        );
        store
    }

    pub fn in_memory() -> Self {
        Self::load(Arc::new(MemoryStorage::default()))
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Returns false (and writes nothing) when the entry is already present.
    pub fn add(&mut self, entry: WatchlistEntry) -> bool {
        let partition = self.partition_mut(entry.exchange);
        if partition.iter().any(|t| *t == entry.token) {
            return false;
        }
        partition.push(entry.token);
        self.persist(entry.exchange);
        true
    }

    pub fn remove(&mut self, entry: &WatchlistEntry) {
        let partition = self.partition_mut(entry.exchange);
        let before = partition.len();
        partition.retain(|t| *t != entry.token);
        if partition.len() != before {
            self.persist(entry.exchange);
        }
    }

    pub fn contains(&self, entry: &WatchlistEntry) -> bool {
        self.partition(entry.exchange).iter().any(|t| *t == entry.token)
    }

    /// NSE entries first, then BSE, each in insertion order.
    pub fn all(&self) -> Vec<WatchlistEntry> {
        Exchange::ALL
            .into_iter()
            .flat_map(|ex| {
                self.partition(ex)
                    .iter()
                    .map(move |t| WatchlistEntry::new(ex, t.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nse.len() + self.bse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition(&self, exchange: Exchange) -> &Vec<String> {
        match exchange {
            Exchange::Nse => &self.nse,
            Exchange::Bse => &self.bse,
        }
    }

    fn partition_mut(&mut self, exchange: Exchange) -> &mut Vec<String> {
        match exchange {
            Exchange::Nse => &mut self.nse,
            Exchange::Bse => &mut self.bse,
        }
    }

    fn read_partition(&mut self, exchange: Exchange) -> Vec<String> {
        let key = storage_key(exchange);
        let raw = match self.storage.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "watchlist storage unreadable; continuing in memory");
                self.degraded = true;
                return Vec::new();
            }
        };

        let parsed: Vec<String> = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "watchlist partition is not a JSON token list; ignoring");
                return Vec::new();
            }
        };

        // Drop duplicates a hand-edited file might carry, keeping first occurrence.
        let mut tokens: Vec<String> = Vec::with_capacity(parsed.len());
        for t in parsed {
            if !tokens.contains(&t) {
                tokens.push(t);
            }
        }
        tokens
    }

    /// Rewrite the whole partition. Failures are logged, never surfaced.
    fn persist(&mut self, exchange: Exchange) {
        if self.degraded {
            return;
        }
        let key = storage_key(exchange);
        let result = serde_json::to_string(self.partition(exchange))
            .map_err(AppError::from)
            .and_then(|json| self.storage.set(key, &json));
        match result {
            Ok(()) => debug!(key, count = self.partition(exchange).len(), "watchlist partition written"),
            Err(e) => {
                warn!(key, error = %e, "watchlist write failed; continuing in memory");
                self.degraded = true;
            }
        }
    }
}
