//! Client for a remote OHLC service
//!
//! The service answers `GET {base}/stocks/{code}/ohlc` with
//! `{"meta": {"code", "name"}, "data": [{"date", "open", "high", "low", "close", "volume"}]}`
//! and returns the full history; the window is applied client-side.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{GridError, GridResult};
use crate::market::{filter_window, MarketDataProvider};
use crate::types::OhlcBar;

/// Remote market data client
#[derive(Clone)]
pub struct RemoteMarketData {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct OhlcMeta {
    code: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OhlcResponse {
    meta: OhlcMeta,
    data: Vec<OhlcBar>,
}

impl RemoteMarketData {
    pub fn new(base_url: impl Into<String>) -> GridResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| GridError::Market(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn parse_response(body: &str) -> GridResult<(String, Vec<OhlcBar>)> {
    let response: OhlcResponse = serde_json::from_str(body)?;
    let mut bars = response.data;
    bars.sort_by_key(|b| b.date);
    Ok((response.meta.code, bars))
}

#[async_trait]
impl MarketDataProvider for RemoteMarketData {
    async fn get_ohlc(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> GridResult<Vec<OhlcBar>> {
        let url = format!("{}/stocks/{}/ohlc", self.base_url, code);
        debug!(code, url = %url, "Fetching OHLC from market service");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GridError::Market(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GridError::Market(format!(
                "market service error {status}: {body}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GridError::Market(e.to_string()))?;
        let (served_code, bars) = parse_response(&body)?;
        if served_code != code {
            return Err(GridError::Market(format!(
                "requested {code}, service answered for {served_code}"
            )));
        }

        let window = filter_window(&bars, start, end);
        info!(code, total = bars.len(), in_window = window.len(), "Fetched OHLC");
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_response_accepts_numbers_and_strings() {
        let body = r#"{
            "meta": {"code": "399971", "name": "Media"},
            "data": [
                {"date": "2024-01-03", "open": "10.1", "high": 10.4, "low": 9.9, "close": 10.2, "volume": 1200},
                {"date": "2024-01-02", "open": 10.0, "high": 10.3, "low": 9.8, "close": 10.1}
            ]
        }"#;
        let (code, bars) = parse_response(body).unwrap();
        assert_eq!(code, "399971");
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].volume, Decimal::ZERO);
        assert_eq!(bars[1].open, dec!(10.1));
        assert_eq!(bars[1].volume, dec!(1200));
    }

    #[test]
    fn test_parse_response_rejects_malformed() {
        assert!(matches!(
            parse_response(r#"{"data": []}"#),
            Err(GridError::Serialization(_))
        ));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = RemoteMarketData::new("http://localhost:8000/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000/api");
    }
}
