//! 일봉 시계열 저장소.
//!
//! - `TimeSeriesStore` - (종목, 거래일) 단위 멱등 저장과 범위 조회
//! - `SqliteBarStore` - SQLite 기반 구현
//! - `export` - CSV 내보내기

pub mod export;
pub mod sqlite;

use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use kline_core::{Bar, DateRange, Instrument, Market};
use serde::Serialize;

pub use export::{export_csv, ExportReport};
pub use sqlite::{SqliteBarStore, StoreConfig};

/// 한 번의 upsert 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// 기록된 행 수 (신규 + 덮어쓰기)
    pub written: usize,
    /// 불량으로 거부된 행 수
    pub rejected: usize,
    /// 기록된 첫 거래일
    pub first_date: Option<NaiveDate>,
    /// 기록된 마지막 거래일
    pub last_date: Option<NaiveDate>,
}

/// 저장소 전체 요약.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    /// 일봉이 있는 종목 수
    pub instrument_count: u64,
    /// 전체 일봉 행 수
    pub row_count: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

/// 시장별 집계.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketCount {
    pub market: Market,
    /// 일봉이 있는 종목 수
    pub instruments: u64,
    /// 일봉 행 수
    pub rows: u64,
}

/// 일봉 저장소.
///
/// 같은 종목에 대한 upsert는 직렬화되고 서로 다른 종목은 서로를 막지 않습니다.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// 일봉을 저장합니다. 같은 (종목, 거래일)은 최신 값으로 덮어씁니다.
    ///
    /// 불량 캔들은 거부되어 `rejected`로 집계될 뿐 오류가 아닙니다.
    async fn upsert(&self, instrument: &Instrument, bars: &[Bar]) -> Result<UpsertReport>;

    /// 날짜 오름차순으로 일봉을 조회합니다.
    async fn query(&self, symbol: &str, range: DateRange) -> Result<Vec<Bar>>;

    async fn summary(&self) -> Result<StoreSummary>;

    /// 종목 메타데이터를 갱신합니다. 일봉과 독립적입니다.
    async fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize>;

    async fn instruments(&self) -> Result<Vec<Instrument>>;

    /// 식별자 또는 종목명 부분 일치 검색.
    async fn search_instruments(&self, keyword: &str) -> Result<Vec<Instrument>>;

    /// 일봉이 있는 종목 식별자 (오름차순).
    async fn bar_symbols(&self) -> Result<Vec<String>>;

    async fn market_breakdown(&self) -> Result<Vec<MarketCount>>;

    /// 모든 일봉을 삭제합니다. 삭제된 행 수를 반환합니다.
    async fn clear_bars(&self) -> Result<u64>;
}
