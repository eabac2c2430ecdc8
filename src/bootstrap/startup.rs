use crate::core::{AppConfig, AppError, AppState};
use crate::gateway::client::GatewayClient;
use crate::poll::PollHandle;
use crate::ticks::{spawn_watchlist_poller, TickerCache};
use crate::watchlist::storage::FileStorage;
use crate::watchlist::WatchlistStore;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Wire the gateway client, the persisted watchlist and the ticker cache.
pub fn build_state(config: AppConfig) -> Result<AppState, AppError> {
    let gateway = Arc::new(GatewayClient::new(&config)?);
    if config.session_cookie.is_none() {
        warn!("SESSION_COOKIE not set; authenticated gateway calls will fail");
    }

    let storage = Arc::new(FileStorage::new(&config.watchlist_dir));
    let watchlist = WatchlistStore::load(storage);
    let tickers = Arc::new(TickerCache::new(gateway.clone(), config.ltp_batching));

    Ok(AppState {
        config: Arc::new(config),
        gateway,
        watchlist: Arc::new(Mutex::new(watchlist)),
        tickers,
    })
}

/// Start background work for a long-running session. The watchlist is
/// re-read every period so adds and removes take effect on the next poll.
pub fn initialize_on_startup(state: &AppState) -> PollHandle {
    let watchlist = state.watchlist.clone();
    {
        let store = watchlist.lock().unwrap_or_else(|p| p.into_inner());
        info!(
            api = %state.config.api_base_url,
            instruments = store.len(),
            degraded = store.is_degraded(),
            "startup"
        );
    }

    spawn_watchlist_poller(
        state.tickers.clone(),
        move || watchlist.lock().unwrap_or_else(|p| p.into_inner()).all(),
        state.config.ltp_poll_interval,
    )
}
