use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::amount::{Amount, ICY_DECIMALS};
use crate::config;

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Request(String),
    #[error("can't decode oracle response: {0}")]
    Decode(String),
    #[error("oracle returned a zero price")]
    ZeroPrice,
}

/// Source of the ICY/BTC rate.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// ICY cost of one satoshi, in ICY base units (18 decimals).
    async fn get_realtime_icy_btc(&self) -> Result<Amount, OracleError>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    price: String,
    #[serde(default = "default_decimals")]
    decimals: u8,
}

fn default_decimals() -> u8 {
    ICY_DECIMALS
}

/// Reads `{"price": "<integer>", "decimals": 18}` from a plain HTTP endpoint.
pub struct HttpPriceOracle {
    url: String,
    http: reqwest::Client,
}

impl HttpPriceOracle {
    pub fn new(cfg: &config::OracleConfig) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|err| OracleError::Request(err.to_string()))?;
        Ok(Self {
            url: cfg.url.clone(),
            http,
        })
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn get_realtime_icy_btc(&self) -> Result<Amount, OracleError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| OracleError::Request(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(OracleError::Request(format!("HTTP {}", resp.status().as_u16())));
        }
        let body = resp
            .text()
            .await
            .map_err(|err| OracleError::Request(err.to_string()))?;
        parse_price(&body)
    }
}

fn parse_price(body: &str) -> Result<Amount, OracleError> {
    let resp: PriceResponse =
        serde_json::from_str(body).map_err(|err| OracleError::Decode(err.to_string()))?;
    if resp.decimals != ICY_DECIMALS {
        return Err(OracleError::Decode(format!(
            "price in {} decimals, expected {}",
            resp.decimals, ICY_DECIMALS
        )));
    }
    let price = Amount::from_base_units(&resp.price, resp.decimals)
        .map_err(|err| OracleError::Decode(err.to_string()))?;
    if price.is_zero() {
        return Err(OracleError::ZeroPrice);
    }
    Ok(price)
}
