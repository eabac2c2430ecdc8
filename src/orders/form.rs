use crate::core::AppError;
use crate::gateway::types::{Exchange, OrderPayload, OrderType, Product, Side, Validity};
use crate::ticks::{TickerSnapshot, TickerView};
use crate::watchlist::WatchlistEntry;
use thiserror::Error;

const NORMAL_VARIETY: &str = "NORMAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderMode {
    Regular,
    StopLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceKind {
    Market,
    Limit,
}

/// The four reachable order configurations. A trigger price exists exactly
/// for the stop-loss variants and a limit price for the limit variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
    StopLossMarket,
    StopLossLimit,
}

impl OrderKind {
    pub fn new(mode: OrderMode, price: PriceKind) -> Self {
        match (mode, price) {
            (OrderMode::Regular, PriceKind::Market) => OrderKind::Market,
            (OrderMode::Regular, PriceKind::Limit) => OrderKind::Limit,
            (OrderMode::StopLoss, PriceKind::Market) => OrderKind::StopLossMarket,
            (OrderMode::StopLoss, PriceKind::Limit) => OrderKind::StopLossLimit,
        }
    }

    pub fn mode(self) -> OrderMode {
        match self {
            OrderKind::Market | OrderKind::Limit => OrderMode::Regular,
            OrderKind::StopLossMarket | OrderKind::StopLossLimit => OrderMode::StopLoss,
        }
    }

    pub fn price_kind(self) -> PriceKind {
        match self {
            OrderKind::Market | OrderKind::StopLossMarket => PriceKind::Market,
            OrderKind::Limit | OrderKind::StopLossLimit => PriceKind::Limit,
        }
    }

    pub fn order_type(self) -> OrderType {
        match self {
            OrderKind::Market => OrderType::Market,
            OrderKind::Limit => OrderType::Limit,
            OrderKind::StopLossMarket => OrderType::StopLossMarket,
            OrderKind::StopLossLimit => OrderType::StopLossLimit,
        }
    }

    pub fn is_stop_loss(self) -> bool {
        self.mode() == OrderMode::StopLoss
    }

    pub fn is_limit(self) -> bool {
        self.price_kind() == PriceKind::Limit
    }
}

/// The instrument an order dialog was opened for, with the tick it was opened at.
/// `last_price` is `None` when no price was known at that point.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderInstrument {
    pub exchange: Exchange,
    pub token: String,
    pub trading_symbol: Option<String>,
    pub last_price: Option<f64>,
}

impl OrderInstrument {
    pub fn entry(&self) -> WatchlistEntry {
        WatchlistEntry::new(self.exchange, self.token.clone())
    }

    /// Seed from the cached ticker row for `entry`, if the cache has one.
    pub fn from_snapshot(snapshot: &TickerSnapshot, entry: &WatchlistEntry) -> Option<Self> {
        snapshot.get(entry).map(Self::from)
    }

    /// Symbol sent to the broker; plain equities fall back to `<token>-EQ`.
    pub fn trading_symbol_or_default(&self) -> String {
        self.trading_symbol
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("{}-EQ", self.token))
    }
}

impl From<&TickerView> for OrderInstrument {
    fn from(view: &TickerView) -> Self {
        Self {
            exchange: view.tick.exchange,
            token: view.tick.token.clone(),
            trading_symbol: view.tick.display_symbol.clone(),
            last_price: Some(view.tick.last_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Quantity must be a positive number.")]
    InvalidQuantity,
    #[error("Limit price must be a positive number.")]
    InvalidLimitPrice,
    #[error("SL Trigger price must be a positive number.")]
    InvalidTriggerPrice,
    #[error("SL Limit price must be a positive number for SL-Limit orders.")]
    InvalidStopLossLimitPrice,
}

/// Non-blocking advice; the exchange accepts these orders.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationWarning {
    #[error("For SL Buy, trigger price should generally be above LTP.")]
    BuyTriggerBelowLastPrice { trigger: f64, last_price: f64 },
    #[error("For SL Sell, trigger price should generally be below LTP.")]
    SellTriggerAboveLastPrice { trigger: f64, last_price: f64 },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// In-progress order. Numeric fields stay as typed text until submit.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDraft {
    pub side: Side,
    pub kind: OrderKind,
    pub product: Product,
    pub quantity: String,
    pub price: String,
    pub trigger_price: String,
    pub disclosed_quantity: String,
    pub validity: Validity,
}

impl Default for OrderDraft {
    fn default() -> Self {
        Self {
            side: Side::Buy,
            kind: OrderKind::Market,
            product: Product::Delivery,
            quantity: "1".to_string(),
            price: String::new(),
            trigger_price: String::new(),
            disclosed_quantity: "0".to_string(),
            validity: Validity::Day,
        }
    }
}

fn parse_quantity(s: &str) -> Option<u64> {
    s.trim().parse::<i64>().ok().filter(|q| *q > 0).map(|q| q as u64)
}

fn parse_price(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
}

fn format_price(p: f64) -> String {
    format!("{p:.2}")
}

/// Check every rule independently; all failures are reported, not just the first.
///
/// `reference_price` is the latest known traded price, used only for
/// trigger-direction warnings; with no known price none are raised.
pub fn validate(draft: &OrderDraft, reference_price: Option<f64>) -> Validation {
    let mut v = Validation::default();

    if parse_quantity(&draft.quantity).is_none() {
        v.errors.push(ValidationError::InvalidQuantity);
    }

    if draft.kind.is_limit() && parse_price(&draft.price).is_none() {
        v.errors.push(ValidationError::InvalidLimitPrice);
    }

    if draft.kind.is_stop_loss() {
        match parse_price(&draft.trigger_price) {
            None => v.errors.push(ValidationError::InvalidTriggerPrice),
            Some(trigger) => match (draft.side, reference_price) {
                (Side::Buy, Some(last_price)) if trigger < last_price => {
                    v.warnings.push(ValidationWarning::BuyTriggerBelowLastPrice { trigger, last_price })
                }
                (Side::Sell, Some(last_price)) if trigger > last_price => {
                    v.warnings.push(ValidationWarning::SellTriggerAboveLastPrice { trigger, last_price })
                }
                _ => {}
            },
        }

        if draft.kind == OrderKind::StopLossLimit && parse_price(&draft.price).is_none() {
            v.errors.push(ValidationError::InvalidStopLossLimitPrice);
        }
    }

    v
}

/// Normalize a draft into the gateway payload.
///
/// Market orders carry price 0, non-stop-loss orders carry trigger 0, and
/// stop-loss orders are always DAY orders.
pub fn build_payload(draft: &OrderDraft, instrument: &OrderInstrument) -> Result<OrderPayload, AppError> {
    let errors = validate(draft, instrument.last_price).errors;
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let kind = draft.kind;
    let quantity = parse_quantity(&draft.quantity).unwrap_or_default();
    let price = if kind.is_limit() {
        parse_price(&draft.price).unwrap_or_default()
    } else {
        0.0
    };
    let triggerprice = if kind.is_stop_loss() {
        parse_price(&draft.trigger_price).unwrap_or_default()
    } else {
        0.0
    };
    let duration = if kind.is_stop_loss() {
        Validity::Day
    } else {
        draft.validity
    };
    let disclosedquantity = draft.disclosed_quantity.trim().parse::<u64>().unwrap_or(0);

    Ok(OrderPayload {
        variety: NORMAL_VARIETY.to_string(),
        tradingsymbol: instrument.trading_symbol_or_default(),
        symboltoken: instrument.token.clone(),
        transactiontype: draft.side,
        exchange: instrument.exchange,
        ordertype: kind.order_type(),
        producttype: draft.product,
        duration,
        price,
        squareoff: 0.0,
        stoploss: 0.0,
        quantity,
        disclosedquantity,
        triggerprice,
    })
}

/// Order-dialog form state machine.
///
/// Tracks the value it last wrote into `price` so live quotes can keep a
/// market order's price in sync without overwriting a user edit.
#[derive(Debug, Clone)]
pub struct OrderFormEngine {
    instrument: OrderInstrument,
    draft: OrderDraft,
    auto_price: Option<String>,
    live_price: Option<f64>,
}

impl OrderFormEngine {
    pub fn new(instrument: OrderInstrument) -> Self {
        let mut engine = Self {
            instrument: instrument.clone(),
            draft: OrderDraft::default(),
            auto_price: None,
            live_price: None,
        };
        engine.reset(instrument);
        engine
    }

    /// Back to defaults for a newly selected instrument.
    pub fn reset(&mut self, instrument: OrderInstrument) {
        let seeded = instrument.last_price.map(format_price).unwrap_or_default();
        self.draft = OrderDraft {
            price: seeded.clone(),
            ..OrderDraft::default()
        };
        self.auto_price = Some(seeded);
        self.live_price = None;
        self.instrument = instrument;
    }

    pub fn draft(&self) -> &OrderDraft {
        &self.draft
    }

    pub fn instrument(&self) -> &OrderInstrument {
        &self.instrument
    }

    /// Live quote price when one has arrived, else the price the dialog opened at.
    pub fn reference_price(&self) -> Option<f64> {
        self.live_price.or(self.instrument.last_price)
    }

    pub fn set_side(&mut self, side: Side) {
        self.draft.side = side;
    }

    pub fn set_product(&mut self, product: Product) {
        self.draft.product = product;
    }

    pub fn set_validity(&mut self, validity: Validity) {
        self.draft.validity = validity;
    }

    pub fn set_mode(&mut self, mode: OrderMode) {
        self.set_kind(OrderKind::new(mode, self.draft.kind.price_kind()));
    }

    pub fn set_price_kind(&mut self, price: PriceKind) {
        self.set_kind(OrderKind::new(self.draft.kind.mode(), price));
    }

    pub fn set_kind(&mut self, kind: OrderKind) {
        self.draft.kind = kind;
        if let Some(ltp) = self.live_price {
            self.sync_market_price(ltp);
        }
    }

    pub fn set_quantity(&mut self, v: impl Into<String>) {
        self.draft.quantity = v.into();
    }

    pub fn set_price(&mut self, v: impl Into<String>) {
        self.draft.price = v.into();
    }

    pub fn set_trigger_price(&mut self, v: impl Into<String>) {
        self.draft.trigger_price = v.into();
    }

    pub fn set_disclosed_quantity(&mut self, v: impl Into<String>) {
        self.draft.disclosed_quantity = v.into();
    }

    /// Feed the latest traded price from the live quote.
    pub fn on_last_price(&mut self, ltp: f64) {
        if !ltp.is_finite() || ltp <= 0.0 {
            return;
        }
        self.live_price = Some(ltp);
        self.sync_market_price(ltp);
    }

    fn sync_market_price(&mut self, ltp: f64) {
        if self.draft.kind != OrderKind::Market {
            return;
        }
        let untouched = self.draft.price.trim().is_empty()
            || self.auto_price.as_deref() == Some(self.draft.price.as_str());
        if untouched {
            let formatted = format_price(ltp);
            self.draft.price = formatted.clone();
            self.auto_price = Some(formatted);
        }
    }

    pub fn validate(&self) -> Validation {
        validate(&self.draft, self.reference_price())
    }

    /// Validated payload plus any soft warnings the user should see.
    pub fn build_payload(&self) -> Result<(OrderPayload, Vec<ValidationWarning>), AppError> {
        let validation = self.validate();
        if !validation.is_ok() {
            return Err(AppError::Validation(validation.errors));
        }
        let payload = build_payload(&self.draft, &self.instrument)?;
        Ok((payload, validation.warnings))
    }
}
