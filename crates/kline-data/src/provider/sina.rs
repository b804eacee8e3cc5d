//! 신랑재경(Sina) 일봉 소스.
//!
//! `CN_MarketDataService.getKLineData` JSON API를 사용합니다. 최근 N개 봉을
//! 돌려주는 방식이라 시작일까지의 달력 일수로 요청 개수를 정합니다.
//! 거래대금은 제공하지 않습니다.

use super::client::{
    collect_rows, get_json, parse_volume, shanghai_today, value_as_f64, FetchClientConfig,
};
use super::TimeSeriesSource;
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use kline_core::{Bar, Instrument};
use serde::Deserialize;
use tracing::debug;

const BASE_URL: &str = "https://quotes.sina.cn";

const KLINE_PATH: &str = "/cn/api/json_v2.php/CN_MarketDataService.getKLineData";

/// 일봉 scale (분 단위, 240 = 1일).
const DAILY_SCALE: &str = "240";

#[derive(Debug, Deserialize)]
struct SinaKline {
    day: String,
    open: serde_json::Value,
    high: serde_json::Value,
    low: serde_json::Value,
    close: serde_json::Value,
    volume: serde_json::Value,
}

impl SinaKline {
    fn into_bar(self, symbol: &str) -> Result<Bar, FetchError> {
        // 분봉과 같은 형식("2024-01-02 15:00:00")도 날짜 부분만 사용
        let day = self.day.get(..10).unwrap_or(&self.day);
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|e| FetchError::Malformed(format!("날짜 파싱 실패: {} - {}", self.day, e)))?;

        let price = |value: &serde_json::Value, field: &str| {
            value_as_f64(value).ok_or_else(|| {
                FetchError::Malformed(format!("{} 파싱 실패: {} {}", field, self.day, value))
            })
        };

        let volume = match &self.volume {
            serde_json::Value::String(s) => parse_volume(s),
            serde_json::Value::Number(n) => n.as_u64(),
            _ => None,
        }
        .ok_or_else(|| FetchError::Malformed(format!("거래량 파싱 실패: {}", self.day)))?;

        Ok(Bar::new(
            symbol,
            date,
            price(&self.open, "open")?,
            price(&self.high, "high")?,
            price(&self.low, "low")?,
            price(&self.close, "close")?,
            volume,
        ))
    }
}

/// Sina 형식 종목 코드 (예: sh600000).
fn sina_symbol(instrument: &Instrument) -> Option<String> {
    instrument
        .exchange()
        .map(|exchange| format!("{}{}", exchange.prefix(), instrument.code()))
}

/// 시작일부터 오늘까지 필요한 봉 개수 (달력 일수 기준 상한).
fn data_length(start: NaiveDate, today: NaiveDate) -> i64 {
    (today - start).num_days().max(0) + 1
}

fn parse_klines(
    symbol: &str,
    klines: Option<Vec<SinaKline>>,
    start: NaiveDate,
) -> Result<Vec<Bar>, FetchError> {
    let Some(klines) = klines else {
        return Ok(Vec::new());
    };

    let mut bars = collect_rows(symbol, klines.into_iter().map(|k| k.into_bar(symbol)))?;

    bars.retain(|bar| bar.date >= start);
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

/// 신랑재경 일봉 소스.
pub struct SinaDailySource {
    client: reqwest::Client,
    base_url: String,
}

impl SinaDailySource {
    pub fn new(config: &FetchClientConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: config.build_client()?,
            base_url: BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TimeSeriesSource for SinaDailySource {
    fn name(&self) -> &str {
        "sina"
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        start: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        let symbol = sina_symbol(instrument).ok_or_else(|| {
            FetchError::NotFound(format!("지원하지 않는 식별자: {}", instrument.symbol))
        })?;

        let url = format!("{}{}", self.base_url, KLINE_PATH);
        let query = [
            ("symbol", symbol),
            ("scale", DAILY_SCALE.to_string()),
            ("ma", "no".to_string()),
            ("datalen", data_length(start, shanghai_today()).to_string()),
        ];

        let klines: Option<Vec<SinaKline>> = get_json(&self.client, &url, &query).await?;
        let bars = parse_klines(&instrument.symbol, klines, start)?;

        debug!(symbol = %instrument.symbol, count = bars.len(), "신랑 일봉 조회");
        Ok(bars)
    }
}
