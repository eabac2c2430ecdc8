mod api;
mod bootstrap;
mod core;
mod gateway;
mod orders;
mod poll;
mod quote;
mod ticks;
mod watchlist;

use crate::core::{AppConfig, AppError, AppState};
use crate::gateway::types::{Exchange, Product, Side, Validity};
use crate::orders::{OrderDialog, OrderInstrument, OrderMode, OrderSubmission, PriceKind, RefreshHook};
use crate::quote::{fetch_quote, QuoteRefresher};
use crate::watchlist::WatchlistEntry;
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn usage() -> &'static str {
    r#"Usage:
    angeltwo-desk server
    angeltwo-desk watch
    angeltwo-desk list
    angeltwo-desk add <NSE|BSE> <TOKEN>
    angeltwo-desk remove <NSE|BSE> <TOKEN>
    angeltwo-desk quote <NSE|BSE> <TOKEN> [SECONDS] [--next <NSE|BSE> <TOKEN>]...
    angeltwo-desk place <NSE|BSE> <TOKEN> <BUY|SELL> <QTY> [--limit P] [--trigger T] [--disclosed N] [--intraday] [--ioc] [--symbol S]
    angeltwo-desk orders
    angeltwo-desk cancel <VARIETY> <ORDER_ID>
    angeltwo-desk holdings
    angeltwo-desk profile
    angeltwo-desk logout

Env:
    API_BASE_URL (default http://localhost:8080)
    SESSION_COOKIE (Cookie header forwarded to the gateway)
    HTTP_TIMEOUT_MS (default 15000)
    WATCHLIST_DIR (default .angeltwo)
    LTP_POLL_INTERVAL_MS / QUOTE_POLL_INTERVAL_MS (default 1000)
    LTP_BATCHING (combined | per_exchange)
    SERVER_ADDR (default 127.0.0.1:3000)
    LOG_FORMAT (json for JSON logs), RUST_LOG
"#
}

fn bail(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}\n\n{}", usage());
    std::process::exit(2);
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing already initialized: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    let mut args = std::env::args().skip(1);
    let cmd = args.next().unwrap_or_else(|| "server".to_string());
    let rest: Vec<String> = args.collect();

    if matches!(cmd.as_str(), "help" | "-h" | "--help") {
        println!("{}", usage());
        return Ok(());
    }

    let state = bootstrap::build_state(config)?;
    let result = run(&cmd, &rest, state).await;
    if let Err(e) = &result {
        eprintln!("{}", e.user_message());
    }
    result
}

async fn run(cmd: &str, rest: &[String], state: AppState) -> Result<(), AppError> {
    match cmd {
        "server" => run_server(state).await,
        "watch" => run_watch(state).await,
        "list" => {
            print_watchlist(&state);
            Ok(())
        }
        "add" | "remove" => {
            let entry = entry_arg(rest);
            let mut store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
            if cmd == "add" {
                let added = store.add(entry.clone());
                println!("{} {}: {}", entry.exchange, entry.token, if added { "added" } else { "already present" });
            } else {
                store.remove(&entry);
                println!("{} {}: removed", entry.exchange, entry.token);
            }
            Ok(())
        }
        "quote" => {
            let (targets, secs) = quote_args(rest);
            run_quote(&state, targets, Duration::from_secs(secs)).await
        }
        "place" => run_place(&state, rest).await,
        "orders" => {
            let submission = OrderSubmission::new(state.gateway.clone());
            let book = submission.order_book().await?;
            for o in &book {
                println!(
                    "{:<18} {:<8} {:<20} {:<5} {:>6} {:<24} {}",
                    o.orderid,
                    o.variety,
                    o.tradingsymbol,
                    o.transactiontype,
                    o.quantity,
                    o.effective_status(),
                    if o.can_cancel() { "cancellable" } else { "" }
                );
            }
            Ok(())
        }
        "cancel" => {
            let (variety, order_id) = match rest {
                [v, id, ..] => (v.as_str(), id.as_str()),
                _ => bail("Missing VARIETY/ORDER_ID"),
            };
            let submission = OrderSubmission::new(state.gateway.clone());
            let ack = submission.cancel(variety, order_id).await?;
            println!("{}", serde_json::to_string_pretty(&ack)?);
            Ok(())
        }
        "holdings" => {
            let holdings = state.gateway.holdings().await?;
            println!("{}", serde_json::to_string_pretty(&holdings)?);
            Ok(())
        }
        "profile" => {
            let profile = state.gateway.profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        "logout" => {
            let message = state.gateway.logout().await?;
            println!("{message}");
            Ok(())
        }
        _ => bail(format!("Unknown command: {cmd}")),
    }
}

fn entry_arg(rest: &[String]) -> WatchlistEntry {
    let (exchange, token) = match rest {
        [ex, token, ..] => (ex, token),
        _ => bail("Missing EXCHANGE/TOKEN"),
    };
    let exchange = Exchange::parse(exchange).unwrap_or_else(|| bail(format!("Unknown exchange: {exchange}")));
    WatchlistEntry::parse(exchange, token).unwrap_or_else(|e| bail(e.user_message()))
}

/// `<EX> <TOKEN> [SECONDS] [--next <EX> <TOKEN>]...`
fn quote_args(rest: &[String]) -> (Vec<WatchlistEntry>, u64) {
    let mut targets = vec![entry_arg(rest)];
    let mut secs = 5;
    let mut args = rest.iter().skip(2).peekable();
    if let Some(s) = args.next_if(|a| !a.starts_with("--")) {
        secs = s.parse::<u64>().unwrap_or_else(|_| bail(format!("Invalid seconds: {s}")));
    }
    while let Some(flag) = args.next() {
        if flag != "--next" {
            bail(format!("Unknown flag for quote: {flag}"));
        }
        let pair: Vec<String> = args.by_ref().take(2).cloned().collect();
        targets.push(entry_arg(&pair));
    }
    (targets, secs)
}

fn print_watchlist(state: &AppState) {
    let store = state.watchlist.lock().unwrap_or_else(|p| p.into_inner());
    if store.is_empty() {
        println!("watchlist is empty");
    }
    for e in store.all() {
        println!("{} {}", e.exchange, e.token);
    }
}

async fn run_server(state: AppState) -> Result<(), AppError> {
    let addr: std::net::SocketAddr = state
        .config
        .server_addr
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid SERVER_ADDR: {e}")))?;

    let _poller = bootstrap::initialize_on_startup(&state);

    let app = api::router(state);
    info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
        .map_err(|e| AppError::Config(format!("server error: {e}")))?;
    Ok(())
}

async fn run_watch(state: AppState) -> Result<(), AppError> {
    let mut rx = state.tickers.subscribe();
    let _poller = bootstrap::initialize_on_startup(&state);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = rx.borrow_and_update().clone();
                let entries = state.watchlist.lock().unwrap_or_else(|p| p.into_inner()).all();
                for v in snap.ordered(&entries) {
                    println!(
                        "{:<4} {:<20} {:>10.2} {:>8} {:>8} {:?}",
                        v.tick.exchange.as_str(),
                        v.display_symbol(),
                        v.tick.last_price,
                        v.change().map(|c| format!("{c:+.2}")).unwrap_or_default(),
                        v.change_pct().map(|p| format!("{p:+.2}%")).unwrap_or_default(),
                        v.direction
                    );
                }
                if let Some(err) = &snap.error {
                    println!("! {err}");
                }
                println!();
            }
        }
    }
    Ok(())
}

/// Watch one dialog's live quote, retargeting it for each following instrument.
async fn run_quote(state: &AppState, targets: Vec<WatchlistEntry>, each: Duration) -> Result<(), AppError> {
    let refresher = QuoteRefresher::new(state.gateway.clone(), state.config.quote_poll_interval);
    let mut targets = targets.into_iter();
    let Some(first) = targets.next() else {
        bail("Missing EXCHANGE/TOKEN");
    };

    let mut dialog = OrderDialog::open(seed_instrument(state, &first).await, refresher);
    watch_quote(&mut dialog, each).await;
    for entry in targets {
        dialog.retarget(seed_instrument(state, &entry).await);
        watch_quote(&mut dialog, each).await;
    }
    dialog.close();
    Ok(())
}

async fn watch_quote(dialog: &mut OrderDialog, for_how_long: Duration) {
    let Some(mut rx) = dialog.subscribe_quote() else {
        return;
    };
    let deadline = tokio::time::sleep(for_how_long);
    tokio::pin!(deadline);

    while dialog.is_open() {
        tokio::select! {
            _ = &mut deadline => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                rx.borrow_and_update();
                dialog.sync_quote();
                let Some(s) = dialog.quote() else { continue };
                if let Some(err) = &s.error {
                    println!("! {err}");
                }
                if let Some(q) = &s.quote {
                    let depth = q.depth.normalized();
                    println!(
                        "{} {} ltp={:.2} bid={} ask={} spread_bps={} form_price={}",
                        s.fetched_at.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default(),
                        q.trading_symbol,
                        q.ltp,
                        fmt_opt(depth.best_bid()),
                        fmt_opt(depth.best_ask()),
                        fmt_opt(depth.spread_bps(q.ltp)),
                        dialog.form().draft().price,
                    );
                }
            }
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

/// Seed an order form the way a ticker row does: refresh the cache with the
/// watchlist plus `entry`, take the cached row, and fall back to one quote.
async fn seed_instrument(state: &AppState, entry: &WatchlistEntry) -> OrderInstrument {
    let mut entries = state.watchlist.lock().unwrap_or_else(|p| p.into_inner()).all();
    if !entries.contains(entry) {
        entries.push(entry.clone());
    }
    state.tickers.refresh(&entries).await;
    if let Some(seed) = OrderInstrument::from_snapshot(&state.tickers.snapshot(), entry) {
        return seed;
    }

    let (last_price, trading_symbol) = match fetch_quote(state.gateway.as_ref(), entry).await {
        Ok(q) => (Some(q.ltp), Some(q.trading_symbol).filter(|s| !s.is_empty())),
        Err(e) => {
            warn!(token = %entry.token, error = %e, "could not seed order price");
            (None, None)
        }
    };
    OrderInstrument {
        exchange: entry.exchange,
        token: entry.token.clone(),
        trading_symbol,
        last_price,
    }
}

/// Re-polls the watchlist tickers; `submit` returns once this has finished.
fn ticker_refresh_hook(state: &AppState) -> RefreshHook {
    let tickers = state.tickers.clone();
    let watchlist = state.watchlist.clone();
    Arc::new(move || {
        let tickers = tickers.clone();
        let entries = watchlist.lock().unwrap_or_else(|p| p.into_inner()).all();
        async move { tickers.refresh(&entries).await }.boxed()
    })
}

async fn run_place(state: &AppState, rest: &[String]) -> Result<(), AppError> {
    let entry = entry_arg(rest);
    let side = rest
        .get(2)
        .and_then(|s| Side::parse(s))
        .unwrap_or_else(|| bail("Missing or invalid BUY|SELL"));
    let qty = rest.get(3).cloned().unwrap_or_else(|| bail("Missing QTY"));

    let mut limit = None;
    let mut trigger = None;
    let mut disclosed = None;
    let mut symbol = None;
    let mut intraday = false;
    let mut ioc = false;
    let mut flags = rest.iter().skip(4);
    while let Some(flag) = flags.next() {
        match flag.as_str() {
            "--limit" => limit = Some(flags.next().cloned().unwrap_or_else(|| bail("--limit needs a price"))),
            "--trigger" => trigger = Some(flags.next().cloned().unwrap_or_else(|| bail("--trigger needs a price"))),
            "--disclosed" => disclosed = Some(flags.next().cloned().unwrap_or_else(|| bail("--disclosed needs a quantity"))),
            "--symbol" => symbol = Some(flags.next().cloned().unwrap_or_else(|| bail("--symbol needs a value"))),
            "--intraday" => intraday = true,
            "--ioc" => ioc = true,
            other => bail(format!("Unknown flag for place: {other}")),
        }
    }

    let mut instrument = seed_instrument(state, &entry).await;
    if symbol.is_some() {
        instrument.trading_symbol = symbol;
    }

    let refresher = QuoteRefresher::new(state.gateway.clone(), state.config.quote_poll_interval);
    let mut dialog = OrderDialog::open(instrument, refresher);
    let form = dialog.form_mut();
    form.set_side(side);
    form.set_quantity(qty);
    if intraday {
        form.set_product(Product::Intraday);
    }
    if ioc {
        form.set_validity(Validity::Ioc);
    }
    if let Some(p) = limit {
        form.set_price_kind(PriceKind::Limit);
        form.set_price(p);
    }
    if let Some(t) = trigger {
        form.set_mode(OrderMode::StopLoss);
        form.set_trigger_price(t);
    }
    if let Some(d) = disclosed {
        form.set_disclosed_quantity(d);
    }

    let submission = OrderSubmission::new(state.gateway.clone()).with_refresh(ticker_refresh_hook(state));
    let placed = dialog.submit(&submission).await?;
    for w in &placed.warnings {
        println!("warning: {w}");
    }
    println!("order placed: {}", placed.order.orderid);
    if let Some(v) = state.tickers.snapshot().get(&entry) {
        println!("{} {:.2}", v.display_symbol(), v.tick.last_price);
    }
    Ok(())
}
