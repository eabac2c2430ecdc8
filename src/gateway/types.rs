use serde::{Deserialize, Serialize};
use std::fmt;

/// Every gateway endpoint answers with this envelope.
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayEnvelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errorcode: String,
    // A missing `data` is `None`; no `T: Default` needed.
    pub data: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Exchange {
    /// Primary partition.
    #[serde(rename = "NSE")]
    Nse,
    /// Secondary partition.
    #[serde(rename = "BSE")]
    Bse,
}

impl Exchange {
    /// Partition order used whenever the watchlist is materialized.
    pub const ALL: [Exchange; 2] = [Exchange::Nse, Exchange::Bse];

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NSE" => Some(Exchange::Nse),
            "BSE" => Some(Exchange::Bse),
            _ => None,
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeTokens {
    pub exchange: Exchange,
    pub tokens: Vec<String>,
}

/// Body of `/api/market/ltp` and `/api/market/quote`.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDataRequest {
    pub exchange_tokens: Vec<ExchangeTokens>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct FetchedData<T> {
    #[serde(default)]
    pub fetched: Vec<T>,
    #[serde(default)]
    pub unfetched: Vec<UnfetchedItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfetchedItem {
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub symbol_token: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error_code: String,
}

/// One entry of the LTP batch response.
#[derive(Debug, Clone, Deserialize)]
pub struct LtpItem {
    pub exchange: String,
    #[serde(default)]
    pub trading_symbol: Option<String>,
    pub symbol_token: String,
    pub ltp: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub quantity: u64,
    #[serde(default, rename = "orders")]
    pub order_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    #[serde(default)]
    pub buy: Vec<DepthLevel>,
    #[serde(default)]
    pub sell: Vec<DepthLevel>,
}

impl MarketDepth {
    pub const LEVELS: usize = 5;

    /// Bids highest first, asks lowest first, at most `LEVELS` per side.
    pub fn normalized(&self) -> MarketDepth {
        let mut buy = self.buy.clone();
        let mut sell = self.sell.clone();
        buy.sort_by(|a, b| b.price.total_cmp(&a.price));
        sell.sort_by(|a, b| a.price.total_cmp(&b.price));
        buy.truncate(Self::LEVELS);
        sell.truncate(Self::LEVELS);
        MarketDepth { buy, sell }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.buy
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > 0.0)
            .max_by(|a, b| a.total_cmp(b))
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.sell
            .iter()
            .map(|l| l.price)
            .filter(|p| *p > 0.0)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    /// Spread in basis points of `last_price`.
    pub fn spread_bps(&self, last_price: f64) -> Option<f64> {
        if last_price <= 0.0 {
            return None;
        }
        Some((self.spread()? / last_price) * 10_000.0)
    }
}

/// Full quote for a single instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quote {
    pub exchange: String,
    pub trading_symbol: String,
    pub symbol_token: String,
    pub ltp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub last_trade_qty: i64,
    pub exch_feed_time: String,
    pub exch_trade_time: String,
    pub net_change: f64,
    pub percent_change: f64,
    pub avg_price: f64,
    pub trade_volume: i64,
    pub opn_interest: i64,
    pub lower_circuit: f64,
    pub upper_circuit: f64,
    pub tot_buy_quan: i64,
    pub tot_sell_quan: i64,
    pub fifty_two_week_low: String,
    pub fifty_two_week_high: String,
    pub depth: MarketDepth,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Product {
    Delivery,
    Intraday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Day,
    Ioc,
}

/// Resolved order-type tag sent to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "MARKET")]
    Market,
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "STOPLOSS_MARKET")]
    StopLossMarket,
    #[serde(rename = "STOPLOSS_LIMIT")]
    StopLossLimit,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLossMarket => "STOPLOSS_MARKET",
            OrderType::StopLossLimit => "STOPLOSS_LIMIT",
        }
    }
}

/// Body of `/api/orders/place`. Built once from a validated draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPayload {
    pub variety: String,
    pub tradingsymbol: String,
    pub symboltoken: String,
    pub transactiontype: Side,
    pub exchange: Exchange,
    pub ordertype: OrderType,
    pub producttype: Product,
    pub duration: Validity,
    pub price: f64,
    pub squareoff: f64,
    pub stoploss: f64,
    pub quantity: u64,
    pub disclosedquantity: u64,
    pub triggerprice: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceOrderData {
    #[serde(default)]
    pub script: String,
    pub orderid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelOrderRequest {
    pub variety: String,
    pub orderid: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelOrderData {
    #[serde(default)]
    pub orderid: String,
    #[serde(default)]
    pub uniqueorderid: String,
}

/// Gateway acknowledgement for a cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelAck {
    pub order_id: String,
    pub message: String,
}

/// Order-book row. Angel sends several numeric columns as strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OrderBookItem {
    pub variety: String,
    pub ordertype: String,
    pub producttype: String,
    pub duration: String,
    pub price: f64,
    pub triggerprice: f64,
    pub quantity: String,
    pub disclosedquantity: String,
    pub tradingsymbol: String,
    pub transactiontype: String,
    pub exchange: String,
    pub symboltoken: Option<String>,
    pub averageprice: f64,
    pub filledshares: String,
    pub unfilledshares: String,
    pub orderid: String,
    pub text: String,
    pub status: String,
    pub orderstatus: String,
    pub updatetime: String,
    pub uniqueorderid: String,
}

// ---------------------------------------------------------------------------
// Portfolio / session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Holding {
    pub tradingsymbol: String,
    pub exchange: String,
    pub isin: String,
    pub quantity: i64,
    pub product: String,
    pub averageprice: f64,
    pub ltp: f64,
    pub symboltoken: String,
    pub close: f64,
    pub profitandloss: f64,
    pub pnlpercentage: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TotalHolding {
    pub totalholdingvalue: f64,
    pub totalinvvalue: f64,
    pub totalprofitandloss: f64,
    pub totalpnlpercentage: f64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Holdings {
    pub holdings: Vec<Holding>,
    pub totalholding: TotalHolding,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Profile {
    pub clientcode: String,
    pub name: String,
    pub email: String,
    pub mobileno: String,
    pub exchanges: Vec<String>,
    pub products: Vec<String>,
    pub lastlogintime: String,
    pub brokerid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltp_envelope_decodes_fetched_and_unfetched() {
        let body = r#"{
            "status": true, "message": "SUCCESS", "errorcode": "",
            "data": {
                "fetched": [{"exchange":"NSE","trading_symbol":"SBIN-EQ","symbol_token":"3045","ltp":812.35}],
                "unfetched": [{"exchange":"BSE","symbolToken":"1","message":"bad token","errorCode":"AB1018"}]
            }
        }"#;
        let env: GatewayEnvelope<FetchedData<LtpItem>> = serde_json::from_str(body).unwrap();
        let data = env.data.unwrap();
        assert_eq!(data.fetched[0].symbol_token, "3045");
        assert_eq!(data.fetched[0].trading_symbol.as_deref(), Some("SBIN-EQ"));
        assert_eq!(data.unfetched[0].error_code, "AB1018");
    }

    #[test]
    fn envelope_without_data_field_decodes_to_none() {
        let body = r#"{"status": true, "message": "SUCCESS", "errorcode": ""}"#;
        let env: GatewayEnvelope<FetchedData<Quote>> = serde_json::from_str(body).unwrap();
        assert!(env.status);
        assert!(env.data.is_none());

        let body = r#"{"status": true, "data": {}}"#;
        let env: GatewayEnvelope<FetchedData<LtpItem>> = serde_json::from_str(body).unwrap();
        let data = env.data.unwrap();
        assert!(data.fetched.is_empty());
        assert!(data.unfetched.is_empty());
    }

    #[test]
    fn failed_envelope_allows_null_data() {
        let body = r#"{"status": false, "message": "Invalid Token", "errorcode": "AG8001", "data": null}"#;
        let env: GatewayEnvelope<Holdings> = serde_json::from_str(body).unwrap();
        assert!(!env.status);
        assert!(env.data.is_none());
        assert_eq!(env.errorcode, "AG8001");
    }

    #[test]
    fn quote_decodes_camel_case_and_depth() {
        let body = r#"{
            "exchange":"NSE","tradingSymbol":"SBIN-EQ","symbolToken":"3045","ltp":812.0,
            "netChange":2.5,"percentChange":0.31,"lowerCircuit":730.0,"upperCircuit":893.0,
            "depth":{"buy":[{"price":811.9,"quantity":120,"orders":3}],"sell":[{"price":812.1,"quantity":40,"orders":1}]}
        }"#;
        let q: Quote = serde_json::from_str(body).unwrap();
        assert_eq!(q.trading_symbol, "SBIN-EQ");
        assert_eq!(q.upper_circuit, 893.0);
        assert_eq!(q.depth.buy[0].order_count, 3);
        let spread = q.depth.spread().unwrap();
        assert!((spread - 0.2).abs() < 1e-9);
    }

    #[test]
    fn depth_normalization_orders_best_first_and_bounds_levels() {
        let lvl = |price| DepthLevel { price, quantity: 1, order_count: 1 };
        let depth = MarketDepth {
            buy: vec![lvl(99.0), lvl(101.0), lvl(100.0), lvl(97.0), lvl(98.0), lvl(96.0)],
            sell: vec![lvl(104.0), lvl(102.0), lvl(103.0)],
        };
        let n = depth.normalized();
        let bids: Vec<f64> = n.buy.iter().map(|l| l.price).collect();
        let asks: Vec<f64> = n.sell.iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![101.0, 100.0, 99.0, 98.0, 97.0]);
        assert_eq!(asks, vec![102.0, 103.0, 104.0]);
        assert_eq!(n.best_bid(), Some(101.0));
        assert_eq!(n.best_ask(), Some(102.0));
    }

    #[test]
    fn payload_serializes_wire_tags() {
        let p = OrderPayload {
            variety: "NORMAL".into(),
            tradingsymbol: "SBIN-EQ".into(),
            symboltoken: "3045".into(),
            transactiontype: Side::Sell,
            exchange: Exchange::Nse,
            ordertype: OrderType::StopLossLimit,
            producttype: Product::Intraday,
            duration: Validity::Day,
            price: 150.5,
            squareoff: 0.0,
            stoploss: 0.0,
            quantity: 5,
            disclosedquantity: 0,
            triggerprice: 149.0,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["ordertype"], "STOPLOSS_LIMIT");
        assert_eq!(v["transactiontype"], "SELL");
        assert_eq!(v["producttype"], "INTRADAY");
        assert_eq!(v["exchange"], "NSE");
        assert_eq!(v["duration"], "DAY");
    }
}
