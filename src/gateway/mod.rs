//! Gateway access: the HTTP client and the seams the engine talks through.
//!
//! Pollers and the order workflow depend on the traits, not on
//! `GatewayClient`, so a push-based feed or a test double can stand in.

use crate::core::AppError;
use async_trait::async_trait;

pub mod client;
pub mod types;

use types::{
    CancelAck, CancelOrderRequest, FetchedData, LtpItem, MarketDataRequest, OrderBookItem,
    OrderPayload, PlaceOrderData, Quote,
};

#[async_trait]
pub trait MarketGateway: Send + Sync {
    async fn ltp(&self, req: &MarketDataRequest) -> Result<FetchedData<LtpItem>, AppError>;
    async fn quote(&self, req: &MarketDataRequest) -> Result<FetchedData<Quote>, AppError>;
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, payload: &OrderPayload) -> Result<PlaceOrderData, AppError>;
    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<CancelAck, AppError>;
    async fn order_book(&self) -> Result<Vec<OrderBookItem>, AppError>;
}

/// Scripted gateway for tests: responses are consumed in call order.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) struct Scripted<T> {
        pub delay: Duration,
        pub result: Result<T, AppError>,
    }

    impl<T> Scripted<T> {
        pub fn ok(value: T) -> Self {
            Self {
                delay: Duration::ZERO,
                result: Ok(value),
            }
        }

        pub fn err(e: AppError) -> Self {
            Self {
                delay: Duration::ZERO,
                result: Err(e),
            }
        }

        pub fn after(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeGateway {
        pub ltp_script: Mutex<VecDeque<Scripted<FetchedData<LtpItem>>>>,
        pub quote_script: Mutex<VecDeque<Scripted<FetchedData<Quote>>>>,
        pub place_script: Mutex<VecDeque<Scripted<PlaceOrderData>>>,
        pub cancel_script: Mutex<VecDeque<Scripted<CancelAck>>>,
        pub ltp_requests: Mutex<Vec<MarketDataRequest>>,
        pub quote_calls: AtomicUsize,
        pub placed: Mutex<Vec<OrderPayload>>,
        pub cancel_calls: AtomicUsize,
        pub book: Mutex<Vec<OrderBookItem>>,
    }

    impl FakeGateway {
        pub fn push_ltp(&self, s: Scripted<FetchedData<LtpItem>>) {
            self.ltp_script.lock().unwrap().push_back(s);
        }

        pub fn push_quote(&self, s: Scripted<FetchedData<Quote>>) {
            self.quote_script.lock().unwrap().push_back(s);
        }

        pub fn push_place(&self, s: Scripted<PlaceOrderData>) {
            self.place_script.lock().unwrap().push_back(s);
        }

        pub fn push_cancel(&self, s: Scripted<CancelAck>) {
            self.cancel_script.lock().unwrap().push_back(s);
        }

        pub fn quote_calls(&self) -> usize {
            self.quote_calls.load(Ordering::SeqCst)
        }
    }

    async fn play<T>(script: &Mutex<VecDeque<Scripted<T>>>, what: &str) -> Result<T, AppError> {
        let next = script.lock().unwrap().pop_front();
        match next {
            Some(s) => {
                if !s.delay.is_zero() {
                    tokio::time::sleep(s.delay).await;
                }
                s.result
            }
            None => Err(AppError::Api(format!("no scripted {what} response"))),
        }
    }

    pub(crate) fn ltp(exchange: &str, token: &str, ltp: f64) -> LtpItem {
        LtpItem {
            exchange: exchange.to_string(),
            trading_symbol: Some(format!("SYM{token}-EQ")),
            symbol_token: token.to_string(),
            ltp,
        }
    }

    pub(crate) fn fetched<T>(items: Vec<T>) -> FetchedData<T> {
        FetchedData {
            fetched: items,
            unfetched: Vec::new(),
        }
    }

    pub(crate) fn quote(token: &str, ltp: f64) -> Quote {
        Quote {
            exchange: "NSE".to_string(),
            trading_symbol: format!("SYM{token}-EQ"),
            symbol_token: token.to_string(),
            ltp,
            ..Quote::default()
        }
    }

    #[async_trait]
    impl MarketGateway for FakeGateway {
        async fn ltp(&self, req: &MarketDataRequest) -> Result<FetchedData<LtpItem>, AppError> {
            self.ltp_requests.lock().unwrap().push(req.clone());
            play(&self.ltp_script, "ltp").await
        }

        async fn quote(&self, _req: &MarketDataRequest) -> Result<FetchedData<Quote>, AppError> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            play(&self.quote_script, "quote").await
        }
    }

    #[async_trait]
    impl OrderGateway for FakeGateway {
        async fn place_order(&self, payload: &OrderPayload) -> Result<PlaceOrderData, AppError> {
            self.placed.lock().unwrap().push(payload.clone());
            play(&self.place_script, "place").await
        }

        async fn cancel_order(&self, _req: &CancelOrderRequest) -> Result<CancelAck, AppError> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            play(&self.cancel_script, "cancel").await
        }

        async fn order_book(&self) -> Result<Vec<OrderBookItem>, AppError> {
            Ok(self.book.lock().unwrap().clone())
        }
    }
}
