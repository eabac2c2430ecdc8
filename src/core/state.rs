use super::config::AppConfig;
use crate::gateway::client::GatewayClient;
use crate::ticks::TickerCache;
use crate::watchlist::WatchlistStore;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub gateway: Arc<GatewayClient>,
    pub watchlist: Arc<Mutex<WatchlistStore>>,
    pub tickers: Arc<TickerCache>,
}
