use crate::core::{AppConfig, AppError};
use crate::gateway::types::{
    CancelAck, CancelOrderData, CancelOrderRequest, FetchedData, GatewayEnvelope, Holdings,
    LtpItem, MarketDataRequest, OrderBookItem, OrderPayload, PlaceOrderData, Profile, Quote,
};
use crate::gateway::{MarketGateway, OrderGateway};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

const UNKNOWN_SERVER_ERROR: &str = "Unknown error from server.";

/// HTTP client for the API gateway.
///
/// The gateway authenticates via the session cookie, so it is attached to
/// every request as a default header.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
}

impl GatewayClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let mut base = Url::parse(&config.api_base_url)
            .map_err(|e| AppError::Config(format!("Invalid API base url: {e}")))?;
        // Endpoint paths are joined relative to the base, so a prefix such as
        // `/broker` must end in a slash to survive the join.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        if let Some(cookie) = config.session_cookie.as_deref() {
            headers.insert(
                reqwest::header::COOKIE,
                HeaderValue::from_str(cookie).map_err(|e| AppError::Config(e.to_string()))?,
            );
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self { http, base })
    }

    pub async fn holdings(&self) -> Result<Holdings, AppError> {
        self.get("/api/portfolio/holdings").await
    }

    pub async fn profile(&self) -> Result<Profile, AppError> {
        self.get("/api/profile").await
    }

    /// Ends the gateway session. Returns the gateway's message, if any.
    pub async fn logout(&self) -> Result<String, AppError> {
        let url = self.url("/api/logout")?;
        let resp = self.http.post(url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(http_status_error(status, &text));
        }
        Ok(serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_default())
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Config(format!("Invalid path {path}: {e}")))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AppError> {
        let resp = self.http.get(self.url(path)?).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(path, status = status.as_u16(), bytes = text.len(), "gateway GET");
        decode_data(status, &text)
    }

    async fn post_envelope<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<GatewayEnvelope<T>, AppError> {
        let resp = self.http.post(self.url(path)?).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(path, status = status.as_u16(), bytes = text.len(), "gateway POST");
        decode_envelope(status, &text)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AppError> {
        let envelope = self.post_envelope(path, body).await?;
        envelope
            .data
            .ok_or_else(|| AppError::Api("Missing data in response".to_string()))
    }
}

#[async_trait]
impl MarketGateway for GatewayClient {
    async fn ltp(&self, req: &MarketDataRequest) -> Result<FetchedData<LtpItem>, AppError> {
        self.post("/api/market/ltp", req).await
    }

    async fn quote(&self, req: &MarketDataRequest) -> Result<FetchedData<Quote>, AppError> {
        self.post("/api/market/quote", req).await
    }
}

#[async_trait]
impl OrderGateway for GatewayClient {
    async fn place_order(&self, payload: &OrderPayload) -> Result<PlaceOrderData, AppError> {
        self.post("/api/orders/place", payload).await
    }

    async fn cancel_order(&self, req: &CancelOrderRequest) -> Result<CancelAck, AppError> {
        let envelope: GatewayEnvelope<CancelOrderData> =
            self.post_envelope("/api/orders/cancel", req).await?;
        let order_id = envelope
            .data
            .map(|d| d.orderid)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| req.orderid.clone());
        Ok(CancelAck {
            order_id,
            message: envelope.message,
        })
    }

    async fn order_book(&self) -> Result<Vec<OrderBookItem>, AppError> {
        let resp = self.http.get(self.url("/api/orders/book")?).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        // An empty book comes back as `data: null`.
        let envelope: GatewayEnvelope<Vec<OrderBookItem>> = decode_envelope(status, &text)?;
        Ok(envelope.data.unwrap_or_default())
    }
}

/// Normalize the three failure kinds (HTTP status, `status: false`, bad JSON)
/// into `AppError`, returning the envelope only when the call succeeded.
pub(crate) fn decode_envelope<T: DeserializeOwned>(
    status: StatusCode,
    text: &str,
) -> Result<GatewayEnvelope<T>, AppError> {
    if !status.is_success() {
        return Err(http_status_error(status, text));
    }

    let envelope: GatewayEnvelope<T> = serde_json::from_str(text)?;
    if !envelope.status {
        return Err(AppError::Api(app_error_message(
            &envelope.message,
            &envelope.errorcode,
        )));
    }
    Ok(envelope)
}

pub(crate) fn decode_data<T: DeserializeOwned>(status: StatusCode, text: &str) -> Result<T, AppError> {
    decode_envelope::<T>(status, text)?
        .data
        .ok_or_else(|| AppError::Api("Missing data in response".to_string()))
}

fn app_error_message(message: &str, errorcode: &str) -> String {
    if !message.trim().is_empty() {
        message.to_string()
    } else if !errorcode.trim().is_empty() {
        errorcode.to_string()
    } else {
        UNKNOWN_SERVER_ERROR.to_string()
    }
}

/// Best-effort message from a non-2xx body: `message`, then `error`, else the code.
fn http_status_error(status: StatusCode, text: &str) -> AppError {
    let from_body = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| {
            ["message", "error"].iter().find_map(|k| {
                v.get(*k)
                    .and_then(|m| m.as_str())
                    .filter(|m| !m.trim().is_empty())
                    .map(str::to_string)
            })
        });
    AppError::HttpStatus {
        status: status.as_u16(),
        message: from_body.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
    }
}
