use crate::core::AppError;
use crate::gateway::types::{ExchangeTokens, MarketDataRequest, Quote};
use crate::gateway::MarketGateway;
use crate::poll::{self, PollHandle, StopSignal};
use crate::watchlist::WatchlistEntry;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// What the depth view renders: last good quote plus the latest failure, if any.
#[derive(Debug, Clone, Default)]
pub struct QuoteState {
    pub quote: Option<Quote>,
    pub error: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Starts per-instrument full-quote pollers for order dialogs.
#[derive(Clone)]
pub struct QuoteRefresher {
    gateway: Arc<dyn MarketGateway>,
    period: Duration,
}

impl QuoteRefresher {
    pub fn new(gateway: Arc<dyn MarketGateway>, period: Duration) -> Self {
        Self { gateway, period }
    }

    pub fn start(&self, instrument: WatchlistEntry) -> QuoteHandle {
        let (tx, rx) = watch::channel(QuoteState::default());
        let job = Arc::new(QuoteJob {
            gateway: self.gateway.clone(),
            target: instrument,
            tx,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        });

        let poll = poll::spawn("order-quote", self.period, move |stop| {
            let job = job.clone();
            let generation = job.issued.fetch_add(1, Ordering::SeqCst) + 1;
            async move { job.run(generation, &stop).await }
        });

        QuoteHandle { poll, rx }
    }
}

/// One instrument's polling state, shared by every run of its poller.
struct QuoteJob {
    gateway: Arc<dyn MarketGateway>,
    target: WatchlistEntry,
    tx: watch::Sender<QuoteState>,
    issued: AtomicU64,
    applied: Mutex<u64>,
}

impl QuoteJob {
    async fn run(&self, generation: u64, stop: &StopSignal) {
        // Runs already scheduled when the handle stops must not reach the gateway.
        if stop.is_stopped() {
            return;
        }
        let result = fetch_quote(self.gateway.as_ref(), &self.target).await;
        if stop.is_stopped() {
            return;
        }

        // Overlapping runs: never let an older response replace a newer one.
        let mut last = match self.applied.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if generation < *last {
            return;
        }
        *last = generation;

        match result {
            Ok(quote) => {
                debug!(token = %self.target.token, ltp = quote.ltp, "quote refreshed");
                self.tx.send_modify(|s| {
                    s.quote = Some(quote);
                    s.error = None;
                    s.fetched_at = Some(Utc::now());
                });
            }
            Err(e) => {
                warn!(token = %self.target.token, error = %e, "quote refresh failed; keeping last quote");
                let message = e.user_message();
                self.tx.send_modify(|s| s.error = Some(message));
            }
        }
    }
}

/// Fetch the full quote for exactly one instrument.
pub async fn fetch_quote(
    gateway: &dyn MarketGateway,
    instrument: &WatchlistEntry,
) -> Result<Quote, AppError> {
    let req = MarketDataRequest {
        exchange_tokens: vec![ExchangeTokens {
            exchange: instrument.exchange,
            tokens: vec![instrument.token.clone()],
        }],
    };
    let data = gateway.quote(&req).await?;
    data.fetched
        .into_iter()
        .find(|q| q.symbol_token == instrument.token)
        .ok_or_else(|| AppError::Api("No quote data received.".to_string()))
}

/// Live quote session for one instrument. Stops polling when dropped.
pub struct QuoteHandle {
    poll: PollHandle,
    rx: watch::Receiver<QuoteState>,
}

impl QuoteHandle {
    pub fn state(&self) -> QuoteState {
        self.rx.borrow().clone()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.rx.borrow().quote.as_ref().map(|q| q.ltp)
    }

    /// Receiver for the depth-rendering collaborator.
    pub fn subscribe(&self) -> watch::Receiver<QuoteState> {
        self.rx.clone()
    }

    pub fn stop(&mut self) {
        self.poll.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.poll.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{fetched, quote, FakeGateway, Scripted};
    use crate::gateway::types::Exchange;

    fn sbin() -> WatchlistEntry {
        WatchlistEntry::new(Exchange::Nse, "3045")
    }

    fn refresher(fake: &Arc<FakeGateway>) -> QuoteRefresher {
        QuoteRefresher::new(fake.clone(), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn replaces_quote_on_each_success() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 810.0)])));
        fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 812.5)])));
        let handle = refresher(&fake).start(sbin());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(fake.quote_calls(), 2);
        assert_eq!(handle.last_price(), Some(812.5));
        assert!(handle.state().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_last_good_quote() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 810.0)])));
        fake.push_quote(Scripted::err(AppError::Api("Rate limit exceeded".into())));
        let handle = refresher(&fake).start(sbin());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        let state = handle.state();
        assert_eq!(state.quote.map(|q| q.ltp), Some(810.0));
        assert_eq!(state.error.as_deref(), Some("Rate limit exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_fetch_is_an_error() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_quote(Scripted::ok(fetched(vec![])));
        let handle = refresher(&fake).start(sbin());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state().error.as_deref(), Some("No quote data received."));
    }

    #[tokio::test(start_paused = true)]
    async fn quote_for_another_token_is_ignored() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_quote(Scripted::ok(fetched(vec![quote("2885", 2950.0)])));
        let handle = refresher(&fake).start(sbin());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.last_price().is_none());
        assert_eq!(handle.state().error.as_deref(), Some("No quote data received."));
    }

    #[tokio::test]
    async fn stopped_run_never_calls_gateway() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 810.0)])));
        let (tx, rx) = watch::channel(QuoteState::default());
        let job = QuoteJob {
            gateway: fake.clone(),
            target: sbin(),
            tx,
            issued: AtomicU64::new(1),
            applied: Mutex::new(0),
        };

        job.run(1, &StopSignal::stopped()).await;
        assert_eq!(fake.quote_calls(), 0);
        assert!(rx.borrow().quote.is_none());

        job.run(1, &StopSignal::default()).await;
        assert_eq!(fake.quote_calls(), 1);
        assert_eq!(rx.borrow().quote.as_ref().map(|q| q.ltp), Some(810.0));
    }

    #[tokio::test(start_paused = true)]
    async fn no_fetches_after_stop() {
        let fake = Arc::new(FakeGateway::default());
        for p in 0..20 {
            fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 800.0 + p as f64)])));
        }
        let mut handle = refresher(&fake).start(sbin());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        handle.stop();
        let calls = fake.quote_calls();
        assert_eq!(calls, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.quote_calls(), calls);

        handle.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_stops_polling() {
        let fake = Arc::new(FakeGateway::default());
        for _ in 0..10 {
            fake.push_quote(Scripted::ok(fetched(vec![quote("3045", 800.0)])));
        }
        let handle = refresher(&fake).start(sbin());
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.quote_calls(), 1);
    }
}
