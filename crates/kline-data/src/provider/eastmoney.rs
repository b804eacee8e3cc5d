//! 동방재부(Eastmoney) 데이터 소스.
//!
//! - 일봉: push2his kline API (전복권, 거래대금 포함)
//! - 종목 목록: push2 clist API (페이지 단위)
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use kline_data::provider::{EastmoneyDailySource, FetchClientConfig, TimeSeriesSource};
//!
//! let source = EastmoneyDailySource::new(&FetchClientConfig::default())?;
//! let bars = source.fetch(&instrument, start).await?;
//! ```

use super::client::{collect_rows, get_json, parse_volume, shanghai_today, FetchClientConfig};
use super::{TimeSeriesSource, UniverseProvider};
use crate::error::{FetchError, UniverseError};
use async_trait::async_trait;
use chrono::NaiveDate;
use kline_core::{Bar, Exchange, Instrument};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// 일봉 API 기본 URL.
const KLINE_BASE_URL: &str = "https://push2his.eastmoney.com";

/// 종목 목록 API 기본 URL.
const LIST_BASE_URL: &str = "https://82.push2.eastmoney.com";

/// A주 전체 (상해 주판/과창판, 심천 주판/창업판, 북경).
const A_SHARE_FILTER: &str = "m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048";

/// 목록 API 페이지 크기 (서버 상한 100).
const LIST_PAGE_SIZE: usize = 100;

/// 목록 페이지 최대 수.
const MAX_LIST_PAGES: usize = 200;

/// 거래량 단위 환산 (手 → 주).
const SHARES_PER_LOT: u64 = 100;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<ListItem>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    /// 종목 코드
    #[serde(rename = "f12")]
    code: serde_json::Value,
    /// 종목명
    #[serde(rename = "f14", default)]
    name: Option<String>,
}

/// 동방재부 시장 ID (secid 접두사).
fn secid(instrument: &Instrument) -> Option<String> {
    let market = match instrument.exchange()? {
        Exchange::Shanghai => 1,
        Exchange::Shenzhen | Exchange::Beijing => 0,
    };
    Some(format!("{}.{}", market, instrument.code()))
}

/// kline 한 줄을 파싱합니다.
///
/// 필드 순서: 날짜, 시가, 종가, 고가, 저가, 거래량(手), 거래대금.
fn parse_kline_line(symbol: &str, line: &str) -> Result<Bar, FetchError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 7 {
        return Err(FetchError::Malformed(format!("kline 필드 부족: {}", line)));
    }

    let date = NaiveDate::parse_from_str(fields[0], "%Y-%m-%d")
        .map_err(|e| FetchError::Malformed(format!("날짜 파싱 실패: {} - {}", fields[0], e)))?;

    let price = |idx: usize| -> Result<f64, FetchError> {
        fields[idx]
            .trim()
            .parse::<f64>()
            .map_err(|_| FetchError::Malformed(format!("가격 파싱 실패: {}", line)))
    };

    let volume = parse_volume(fields[5])
        .ok_or_else(|| FetchError::Malformed(format!("거래량 파싱 실패: {}", line)))?;
    let amount = fields[6]
        .trim()
        .parse::<f64>()
        .map_err(|_| FetchError::Malformed(format!("거래대금 파싱 실패: {}", line)))?;

    Ok(Bar::new(
        symbol,
        date,
        price(1)?,
        price(3)?,
        price(4)?,
        price(2)?,
        volume.saturating_mul(SHARES_PER_LOT),
    )
    .with_amount(amount))
}

/// kline 응답을 일봉 목록으로 변환합니다. `data: null`이면 빈 목록.
fn parse_kline_response(
    symbol: &str,
    response: KlineResponse,
    start: NaiveDate,
) -> Result<Vec<Bar>, FetchError> {
    let Some(data) = response.data else {
        return Ok(Vec::new());
    };

    let mut bars = collect_rows(
        symbol,
        data.klines.iter().map(|line| parse_kline_line(symbol, line)),
    )?;

    bars.retain(|bar| bar.date >= start);
    bars.sort_by_key(|bar| bar.date);
    Ok(bars)
}

/// 동방재부 일봉 소스.
pub struct EastmoneyDailySource {
    client: reqwest::Client,
    base_url: String,
}

impl EastmoneyDailySource {
    pub fn new(config: &FetchClientConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: config.build_client()?,
            base_url: KLINE_BASE_URL.to_string(),
        })
    }

    /// 기본 URL을 교체합니다 (테스트용 mock 서버 등).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TimeSeriesSource for EastmoneyDailySource {
    fn name(&self) -> &str {
        "eastmoney"
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        start: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        let secid = secid(instrument).ok_or_else(|| {
            FetchError::NotFound(format!("지원하지 않는 식별자: {}", instrument.symbol))
        })?;
        let end = shanghai_today();

        let url = format!("{}/api/qt/stock/kline/get", self.base_url);
        let query = [
            ("secid", secid),
            ("fields1", "f1,f2,f3,f4,f5,f6".to_string()),
            ("fields2", "f51,f52,f53,f54,f55,f56,f57".to_string()),
            ("klt", "101".to_string()),
            ("fqt", "1".to_string()),
            ("beg", start.format("%Y%m%d").to_string()),
            ("end", end.format("%Y%m%d").to_string()),
        ];

        let response: KlineResponse = get_json(&self.client, &url, &query).await?;
        let bars = parse_kline_response(&instrument.symbol, response, start)?;

        debug!(symbol = %instrument.symbol, count = bars.len(), "동방재부 일봉 조회");
        Ok(bars)
    }
}

/// 동방재부 A주 전종목 목록.
pub struct EastmoneyUniverse {
    client: reqwest::Client,
    base_url: String,
}

impl EastmoneyUniverse {
    pub fn new(config: &FetchClientConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: config.build_client()?,
            base_url: LIST_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_page(&self, page: usize) -> Result<Option<ListData>, UniverseError> {
        let url = format!("{}/api/qt/clist/get", self.base_url);
        let query = [
            ("pn", page.to_string()),
            ("pz", LIST_PAGE_SIZE.to_string()),
            ("po", "1".to_string()),
            ("np", "1".to_string()),
            ("fltt", "2".to_string()),
            ("invt", "2".to_string()),
            ("fid", "f12".to_string()),
            ("fs", A_SHARE_FILTER.to_string()),
            ("fields", "f12,f14".to_string()),
        ];

        let response: ListResponse = get_json(&self.client, &url, &query)
            .await
            .map_err(|e| match e {
                FetchError::Malformed(msg) => UniverseError::Malformed(msg),
                other => UniverseError::Unavailable(other.to_string()),
            })?;
        Ok(response.data)
    }
}

/// 목록 항목을 종목으로 변환합니다. 정규화할 수 없는 코드는 `None`.
fn list_item_to_instrument(item: &ListItem) -> Option<Instrument> {
    let code = match &item.code {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => format!("{:06}", n.as_u64()?),
        _ => return None,
    };
    Instrument::from_raw_code(&code, item.name.clone().unwrap_or_default())
}

#[async_trait]
impl UniverseProvider for EastmoneyUniverse {
    fn name(&self) -> &str {
        "eastmoney"
    }

    async fn list(&self) -> Result<Vec<Instrument>, UniverseError> {
        let mut instruments = Vec::new();
        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        let mut fetched = 0usize;

        for page in 1..=MAX_LIST_PAGES {
            let Some(data) = self.fetch_page(page).await? else {
                break;
            };
            if data.diff.is_empty() {
                break;
            }

            fetched += data.diff.len();
            for item in &data.diff {
                match list_item_to_instrument(item) {
                    Some(instrument) => {
                        if seen.insert(instrument.symbol.clone()) {
                            instruments.push(instrument);
                        }
                    }
                    None => skipped += 1,
                }
            }

            if fetched >= data.total {
                break;
            }
        }

        if skipped > 0 {
            warn!(skipped, "정규화할 수 없는 종목 코드 제외");
        }
        info!(count = instruments.len(), "동방재부 종목 목록 조회");
        Ok(instruments)
    }
}
