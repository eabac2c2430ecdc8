use crate::core::AppError;
use crate::gateway::types::{CancelAck, CancelOrderRequest, OrderBookItem, OrderPayload, PlaceOrderData};
use crate::gateway::OrderGateway;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Awaited after every successful placement, e.g. to re-poll tickers or the order book.
pub type RefreshHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

const CANCELLABLE_STATUSES: [&str; 8] = [
    "open",
    "open pending",
    "trigger pending",
    "validation pending",
    "put order req received",
    "modified",
    "modify pending",
    "after market order req received",
];

/// Whether an order in `status` may still be cancelled.
pub fn is_cancellable(status: &str) -> bool {
    let status = status.trim().to_ascii_lowercase();
    CANCELLABLE_STATUSES.contains(&status.as_str())
}

impl OrderBookItem {
    /// `status`, or `orderstatus` when the gateway left `status` blank.
    pub fn effective_status(&self) -> &str {
        if self.status.trim().is_empty() {
            &self.orderstatus
        } else {
            &self.status
        }
    }

    pub fn can_cancel(&self) -> bool {
        is_cancellable(self.effective_status())
    }
}

/// Sends orders and cancels to the gateway.
pub struct OrderSubmission {
    gateway: Arc<dyn OrderGateway>,
    on_placed: Option<RefreshHook>,
    cancelled: Mutex<HashMap<String, CancelAck>>,
}

impl OrderSubmission {
    pub fn new(gateway: Arc<dyn OrderGateway>) -> Self {
        Self {
            gateway,
            on_placed: None,
            cancelled: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_refresh(mut self, hook: RefreshHook) -> Self {
        self.on_placed = Some(hook);
        self
    }

    pub async fn submit(&self, payload: &OrderPayload) -> Result<PlaceOrderData, AppError> {
        match self.gateway.place_order(payload).await {
            Ok(placed) => {
                info!(
                    order_id = %placed.orderid,
                    symbol = %payload.tradingsymbol,
                    ordertype = payload.ordertype.as_str(),
                    quantity = payload.quantity,
                    "order placed"
                );
                if let Some(hook) = &self.on_placed {
                    hook().await;
                }
                Ok(placed)
            }
            Err(e) => {
                warn!(symbol = %payload.tradingsymbol, error = %e, "order placement failed");
                Err(e)
            }
        }
    }

    /// Cancel an order. Repeating a cancel that was already acknowledged
    /// returns the same ack without another remote call.
    pub async fn cancel(&self, variety: &str, order_id: &str) -> Result<CancelAck, AppError> {
        if let Some(ack) = self.cached_cancel(order_id) {
            info!(order_id, "order already cancelled");
            return Ok(ack);
        }

        let req = CancelOrderRequest {
            variety: variety.to_string(),
            orderid: order_id.to_string(),
        };
        let ack = match self.gateway.cancel_order(&req).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(order_id, error = %e, "order cancel failed");
                return Err(e);
            }
        };
        info!(order_id, message = %ack.message, "order cancelled");

        let mut cancelled = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        cancelled.insert(order_id.to_string(), ack.clone());
        Ok(ack)
    }

    pub async fn order_book(&self) -> Result<Vec<OrderBookItem>, AppError> {
        self.gateway.order_book().await
    }

    fn cached_cancel(&self, order_id: &str) -> Option<CancelAck> {
        let cancelled = self.cancelled.lock().unwrap_or_else(|p| p.into_inner());
        cancelled.get(order_id).cloned()
    }
}
