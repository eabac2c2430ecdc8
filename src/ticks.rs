use crate::core::{AppError, LtpBatching};
use crate::gateway::types::{Exchange, ExchangeTokens, FetchedData, LtpItem, MarketDataRequest};
use crate::gateway::MarketGateway;
use crate::poll::{self, PollHandle};
use crate::watchlist::WatchlistEntry;
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Price movement against the immediately preceding cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Unchanged,
}

impl Direction {
    pub fn between(previous: Option<f64>, current: f64) -> Self {
        match previous {
            Some(p) if current > p => Direction::Up,
            Some(p) if current < p => Direction::Down,
            _ => Direction::Unchanged,
        }
    }
}

/// Point-in-time price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub exchange: Exchange,
    pub token: String,
    pub display_symbol: Option<String>,
    pub last_price: f64,
}

impl Tick {
    fn from_ltp(item: LtpItem) -> Option<Self> {
        let exchange = Exchange::parse(&item.exchange)?;
        Some(Self {
            exchange,
            token: item.symbol_token,
            display_symbol: item.trading_symbol.filter(|s| !s.trim().is_empty()),
            last_price: item.ltp,
        })
    }

    pub fn key(&self) -> WatchlistEntry {
        WatchlistEntry::new(self.exchange, self.token.clone())
    }
}

/// Cached tick plus exactly one generation of history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerView {
    #[serde(flatten)]
    pub tick: Tick,
    pub previous_price: Option<f64>,
    pub direction: Direction,
}

impl TickerView {
    pub fn display_symbol(&self) -> &str {
        self.tick
            .display_symbol
            .as_deref()
            .unwrap_or(&self.tick.token)
    }

    pub fn change(&self) -> Option<f64> {
        self.previous_price.map(|p| self.tick.last_price - p)
    }

    pub fn change_pct(&self) -> Option<f64> {
        let p = self.previous_price.filter(|p| *p != 0.0)?;
        Some((self.tick.last_price - p) / p * 100.0)
    }
}

/// Immutable view of the cache, replaced wholesale on every applied refresh.
#[derive(Debug, Clone, Default)]
pub struct TickerSnapshot {
    pub views: HashMap<WatchlistEntry, TickerView>,
    /// Message of the last failed refresh; cleared by the next success.
    pub error: Option<String>,
    /// Generation of the refresh that produced this snapshot.
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TickerSnapshot {
    pub fn get(&self, entry: &WatchlistEntry) -> Option<&TickerView> {
        self.views.get(entry)
    }

    /// Views in `entries` order, skipping instruments with no tick yet.
    pub fn ordered<'a>(&'a self, entries: &'a [WatchlistEntry]) -> impl Iterator<Item = &'a TickerView> + 'a {
        entries.iter().filter_map(|e| self.views.get(e))
    }
}

/// Fold freshly fetched ticks into the previous cache state.
///
/// - fetched keys get a new view whose direction compares against the prior value
/// - requested but unfetched keys keep their last view
/// - keys no longer requested are evicted
pub fn merge_ticks(
    previous: &HashMap<WatchlistEntry, TickerView>,
    requested: &[WatchlistEntry],
    fetched: Vec<Tick>,
) -> HashMap<WatchlistEntry, TickerView> {
    let mut next = previous.clone();
    for tick in fetched {
        let key = tick.key();
        let previous_price = previous.get(&key).map(|v| v.tick.last_price);
        let direction = Direction::between(previous_price, tick.last_price);
        next.insert(
            key,
            TickerView {
                tick,
                previous_price,
                direction,
            },
        );
    }
    retain_requested(&mut next, requested);
    next
}

fn retain_requested(views: &mut HashMap<WatchlistEntry, TickerView>, requested: &[WatchlistEntry]) {
    views.retain(|k, _| requested.contains(k));
}

/// Group entries into per-exchange token lists, NSE first.
pub fn partition_entries(entries: &[WatchlistEntry]) -> Vec<ExchangeTokens> {
    Exchange::ALL
        .into_iter()
        .filter_map(|exchange| {
            let tokens: Vec<String> = entries
                .iter()
                .filter(|e| e.exchange == exchange)
                .map(|e| e.token.clone())
                .collect();
            (!tokens.is_empty()).then_some(ExchangeTokens { exchange, tokens })
        })
        .collect()
}

/// Last-known price per watched instrument, refreshed by batch LTP polls.
///
/// Observers read through `subscribe()`; every applied refresh publishes one
/// complete snapshot, so a half-updated tick set is never visible.
pub struct TickerCache {
    gateway: Arc<dyn MarketGateway>,
    batching: LtpBatching,
    issued: AtomicU64,
    // Generation of the last applied refresh. Held while a snapshot is built.
    applied: Mutex<u64>,
    tx: watch::Sender<TickerSnapshot>,
}

impl TickerCache {
    pub fn new(gateway: Arc<dyn MarketGateway>, batching: LtpBatching) -> Self {
        let (tx, _rx) = watch::channel(TickerSnapshot::default());
        Self {
            gateway,
            batching,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TickerSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TickerSnapshot {
        self.tx.borrow().clone()
    }

    /// Fetch prices for `entries` and fold them into the cache.
    ///
    /// Overlapping calls are allowed. A result is dropped if a refresh issued
    /// after it has already been applied. Failures never propagate: they are
    /// recorded on the snapshot and the previous ticks stay visible.
    pub async fn refresh(&self, entries: &[WatchlistEntry]) {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;

        if entries.is_empty() {
            self.apply(generation, |_| (HashMap::new(), None));
            return;
        }

        match self.fetch(entries).await {
            Ok(data) => {
                for miss in &data.unfetched {
                    debug!(
                        exchange = %miss.exchange,
                        token = %miss.symbol_token,
                        message = %miss.message,
                        "ltp unfetched; keeping last value"
                    );
                }
                let ticks: Vec<Tick> = data.fetched.into_iter().filter_map(Tick::from_ltp).collect();
                self.apply(generation, |prev| (merge_ticks(&prev.views, entries, ticks), None));
            }
            Err(e) => {
                let message = e.user_message();
                warn!(generation, error = %e, "ltp refresh failed; keeping last ticks");
                self.apply(generation, |prev| {
                    let mut views = prev.views.clone();
                    retain_requested(&mut views, entries);
                    (views, Some(message))
                });
            }
        }
    }

    async fn fetch(&self, entries: &[WatchlistEntry]) -> Result<FetchedData<LtpItem>, AppError> {
        let partitions = partition_entries(entries);
        match self.batching {
            LtpBatching::Combined => {
                let req = MarketDataRequest {
                    exchange_tokens: partitions,
                };
                self.gateway.ltp(&req).await
            }
            LtpBatching::PerExchange => {
                let requests: Vec<MarketDataRequest> = partitions
                    .into_iter()
                    .map(|p| MarketDataRequest {
                        exchange_tokens: vec![p],
                    })
                    .collect();
                let results = try_join_all(requests.iter().map(|r| self.gateway.ltp(r))).await?;
                let mut merged = FetchedData {
                    fetched: Vec::new(),
                    unfetched: Vec::new(),
                };
                for r in results {
                    merged.fetched.extend(r.fetched);
                    merged.unfetched.extend(r.unfetched);
                }
                Ok(merged)
            }
        }
    }

    fn apply<F>(&self, generation: u64, build: F) -> bool
    where
        F: FnOnce(&TickerSnapshot) -> (HashMap<WatchlistEntry, TickerView>, Option<String>),
    {
        let mut applied = match self.applied.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if generation < *applied {
            debug!(generation, applied = *applied, "discarding superseded ltp refresh");
            return false;
        }

        let (views, error) = build(&self.tx.borrow());
        self.tx.send_replace(TickerSnapshot {
            views,
            error,
            generation,
            updated_at: Some(Utc::now()),
        });
        *applied = generation;
        true
    }
}

/// Poll `entries()` through `cache` every `period` until the handle is stopped.
pub fn spawn_watchlist_poller<F>(cache: Arc<TickerCache>, entries: F, period: Duration) -> PollHandle
where
    F: Fn() -> Vec<WatchlistEntry> + Send + Sync + 'static,
{
    poll::spawn("watchlist-ltp", period, move |stop| {
        let cache = cache.clone();
        let entries = entries();
        async move {
            if !stop.is_stopped() {
                cache.refresh(&entries).await;
            }
        }
    })
}
