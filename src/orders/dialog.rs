use super::form::{OrderFormEngine, OrderInstrument, ValidationWarning};
use super::submission::OrderSubmission;
use crate::core::AppError;
use crate::gateway::types::PlaceOrderData;
use crate::quote::{QuoteHandle, QuoteRefresher, QuoteState};
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct Placed {
    pub order: PlaceOrderData,
    pub warnings: Vec<ValidationWarning>,
}

/// An open order dialog: the form plus the live quote feeding it.
///
/// The quote poller lives exactly as long as the dialog targets an
/// instrument. Closing, retargeting and dropping all stop it.
pub struct OrderDialog {
    form: OrderFormEngine,
    quotes: QuoteRefresher,
    live: Option<QuoteHandle>,
}

impl OrderDialog {
    pub fn open(instrument: OrderInstrument, quotes: QuoteRefresher) -> Self {
        info!(exchange = %instrument.exchange, token = %instrument.token, "order dialog opened");
        let live = quotes.start(instrument.entry());
        Self {
            form: OrderFormEngine::new(instrument),
            quotes,
            live: Some(live),
        }
    }

    pub fn is_open(&self) -> bool {
        self.live.as_ref().map_or(false, |h| !h.is_stopped())
    }

    pub fn form(&self) -> &OrderFormEngine {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut OrderFormEngine {
        &mut self.form
    }

    pub fn quote(&self) -> Option<QuoteState> {
        self.live.as_ref().map(QuoteHandle::state)
    }

    /// Change feed for the current target's quote. A retarget replaces it.
    pub fn subscribe_quote(&self) -> Option<watch::Receiver<QuoteState>> {
        self.live.as_ref().map(QuoteHandle::subscribe)
    }

    /// Push the latest live price into the form.
    pub fn sync_quote(&mut self) {
        if let Some(ltp) = self.live.as_ref().and_then(QuoteHandle::last_price) {
            self.form.on_last_price(ltp);
        }
    }

    /// Point the dialog at another instrument. The old quote poller is
    /// stopped before the new one starts.
    pub fn retarget(&mut self, instrument: OrderInstrument) {
        self.stop_quotes();
        info!(exchange = %instrument.exchange, token = %instrument.token, "order dialog retargeted");
        self.live = Some(self.quotes.start(instrument.entry()));
        self.form.reset(instrument);
    }

    pub fn close(&mut self) {
        if self.stop_quotes() {
            info!(token = %self.form.instrument().token, "order dialog closed");
        }
    }

    /// Validate and send the draft. The dialog closes only when the gateway
    /// accepts the order; on any error it stays open with the draft intact.
    pub async fn submit(&mut self, submission: &OrderSubmission) -> Result<Placed, AppError> {
        self.sync_quote();
        let (payload, warnings) = self.form.build_payload()?;
        let order = submission.submit(&payload).await?;
        self.close();
        Ok(Placed { order, warnings })
    }

    fn stop_quotes(&mut self) -> bool {
        match self.live.take() {
            Some(mut handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }
}

impl Drop for OrderDialog {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LtpBatching;
    use crate::gateway::testing::{fetched, ltp, quote, FakeGateway, Scripted};
    use crate::gateway::types::Exchange;
    use crate::orders::form::{OrderKind, OrderMode};
    use crate::ticks::TickerCache;
    use crate::watchlist::WatchlistEntry;
    use std::sync::Arc;
    use std::time::Duration;

    fn instrument(token: &str, ltp: f64) -> OrderInstrument {
        OrderInstrument {
            exchange: Exchange::Nse,
            token: token.to_string(),
            trading_symbol: Some(format!("SYM{token}-EQ")),
            last_price: Some(ltp),
        }
    }

    fn scripted_quotes(fake: &Arc<FakeGateway>, token: &str, prices: &[f64]) {
        for p in prices {
            fake.push_quote(Scripted::ok(fetched(vec![quote(token, *p)])));
        }
    }

    fn refresher(fake: &Arc<FakeGateway>) -> QuoteRefresher {
        QuoteRefresher::new(fake.clone(), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn live_quote_flows_into_market_price() {
        let fake = Arc::new(FakeGateway::default());
        scripted_quotes(&fake, "3045", &[811.0]);
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        assert_eq!(dialog.form().draft().price, "810.00");

        tokio::time::sleep(Duration::from_millis(10)).await;
        dialog.sync_quote();
        assert_eq!(dialog.form().draft().price, "811.00");
        assert_eq!(dialog.quote().and_then(|q| q.quote).map(|q| q.ltp), Some(811.0));
    }

    #[tokio::test(start_paused = true)]
    async fn dialog_opens_from_cached_ticker_row() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_ltp(Scripted::ok(fetched(vec![ltp("NSE", "3045", 812.0)])));
        scripted_quotes(&fake, "3045", &[812.5]);
        let tickers = TickerCache::new(fake.clone(), LtpBatching::Combined);
        let entry = WatchlistEntry::new(Exchange::Nse, "3045");
        tickers.refresh(&[entry.clone()]).await;

        let seed = OrderInstrument::from_snapshot(&tickers.snapshot(), &entry).unwrap();
        let mut dialog = OrderDialog::open(seed, refresher(&fake));
        assert_eq!(dialog.form().instrument().trading_symbol.as_deref(), Some("SYM3045-EQ"));
        assert_eq!(dialog.form().draft().price, "812.00");

        let mut rx = dialog.subscribe_quote().unwrap();
        rx.changed().await.unwrap();
        dialog.sync_quote();
        assert_eq!(dialog.form().draft().price, "812.50");
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_idempotent_and_stops_polling() {
        let fake = Arc::new(FakeGateway::default());
        scripted_quotes(&fake, "3045", &[811.0; 10]);
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        tokio::time::sleep(Duration::from_millis(10)).await;

        dialog.close();
        dialog.close();
        assert!(!dialog.is_open());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.quote_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_polling() {
        let fake = Arc::new(FakeGateway::default());
        scripted_quotes(&fake, "3045", &[811.0; 10]);
        let dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(dialog);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.quote_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retarget_reseeds_and_keeps_one_poller() {
        let fake = Arc::new(FakeGateway::default());
        scripted_quotes(&fake, "3045", &[811.0]);
        scripted_quotes(&fake, "2885", &[2951.0; 10]);
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        dialog.form_mut().set_quantity("40");
        tokio::time::sleep(Duration::from_millis(10)).await;

        dialog.retarget(instrument("2885", 2950.0));
        assert!(dialog.is_open());
        assert_eq!(dialog.form().instrument().token, "2885");
        assert_eq!(dialog.form().draft().quantity, "1");
        assert_eq!(dialog.form().draft().price, "2950.00");

        // one immediate fetch for each target, then one per second
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(fake.quote_calls(), 4);
        dialog.sync_quote();
        assert_eq!(dialog.form().draft().price, "2951.00");
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_draft_never_reaches_gateway() {
        let fake = Arc::new(FakeGateway::default());
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        dialog.form_mut().set_quantity("0");
        dialog.form_mut().set_mode(OrderMode::StopLoss);

        let submission = OrderSubmission::new(fake.clone());
        let err = dialog.submit(&submission).await.unwrap_err();
        assert_eq!(
            err.user_message(),
            "Quantity must be a positive number. SL Trigger price must be a positive number."
        );
        assert!(dialog.is_open());
        assert!(fake.placed.lock().unwrap().is_empty());
        assert_eq!(dialog.form().draft().kind, OrderKind::StopLossMarket);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_order_keeps_dialog_open() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_place(Scripted::err(AppError::Api("Insufficient funds".into())));
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));
        dialog.form_mut().set_quantity("10");

        let submission = OrderSubmission::new(fake.clone());
        let err = dialog.submit(&submission).await.unwrap_err();
        assert_eq!(err.user_message(), "Insufficient funds");
        assert!(dialog.is_open());
        assert_eq!(dialog.form().draft().quantity, "10");
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_order_closes_dialog() {
        let fake = Arc::new(FakeGateway::default());
        fake.push_place(Scripted::ok(PlaceOrderData {
            script: "SYM3045-EQ".into(),
            orderid: "1001".into(),
        }));
        let mut dialog = OrderDialog::open(instrument("3045", 810.0), refresher(&fake));

        let submission = OrderSubmission::new(fake.clone());
        let placed = dialog.submit(&submission).await.unwrap();
        assert_eq!(placed.order.orderid, "1001");
        assert!(placed.warnings.is_empty());
        assert!(!dialog.is_open());

        let sent = fake.placed.lock().unwrap();
        assert_eq!(sent[0].symboltoken, "3045");
        assert_eq!(sent[0].price, 0.0);
    }
}
