use axum::{
    routing::{delete, get},
    Router,
};

pub fn router() -> Router<crate::core::AppState> {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/tickers", get(tickers::snapshot))
        .route("/api/watchlist", get(watchlist::list).post(watchlist::add))
        .route("/api/watchlist/:exchange/:token", delete(watchlist::remove))
}

mod health {
    use axum::{extract::State, Json};
    use serde_json::json;

    use crate::core::AppState;

    pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
        let store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
        Json(json!({
            "status": "ok",
            "watchlist_ready": store.is_ready(),
            "storage_degraded": store.is_degraded(),
        }))
    }
}

mod tickers {
    use axum::{extract::State, Json};
    use serde_json::json;

    use crate::core::AppState;

    /// Current snapshot, in watchlist order.
    pub async fn snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
        let entries = state
            .watchlist
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .all();
        let snap = state.tickers.snapshot();
        let views: Vec<_> = snap.ordered(&entries).collect();
        Json(json!({
            "tickers": views,
            "error": snap.error,
            "generation": snap.generation,
            "updated_at": snap.updated_at.map(|t| t.to_rfc3339()),
        }))
    }
}

pub(super) mod watchlist {
    use axum::{
        extract::{Path, State},
        http::StatusCode,
        Json,
    };
    use serde::Deserialize;
    use serde_json::json;

    use crate::core::AppState;
    use crate::gateway::types::Exchange;
    use crate::watchlist::WatchlistEntry;

    #[derive(Debug, Deserialize)]
    pub struct AddRequest {
        pub exchange: String,
        pub token: String,
    }

    fn parse_entry(exchange: &str, token: &str) -> Result<WatchlistEntry, (StatusCode, String)> {
        let exchange = Exchange::parse(exchange)
            .ok_or((StatusCode::BAD_REQUEST, format!("Unknown exchange: {exchange}")))?;
        WatchlistEntry::parse(exchange, token).map_err(|e| (StatusCode::BAD_REQUEST, e.user_message()))
    }

    pub async fn list(State(state): State<AppState>) -> Json<Vec<WatchlistEntry>> {
        let store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
        Json(store.all())
    }

    pub async fn add(
        State(state): State<AppState>,
        Json(req): Json<AddRequest>,
    ) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
        let entry = parse_entry(&req.exchange, &req.token)?;
        let mut store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
        let added = store.add(entry);
        Ok(Json(json!({ "added": added })))
    }

    pub async fn remove(
        State(state): State<AppState>,
        Path((exchange, token)): Path<(String, String)>,
    ) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
        let entry = parse_entry(&exchange, &token)?;
        let mut store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
        let removed = store.contains(&entry);
        store.remove(&entry);
        Ok(Json(json!({ "removed": removed })))
    }
}
