//! 데이터 Provider 모듈.
//!
//! 외부 소스에서 일봉과 종목 목록을 가져오는 Provider들을 정의합니다.
//!
//! ## 일봉 소스
//! - `EastmoneyDailySource`: 동방재부 일봉 (전복권, 거래대금 포함)
//! - `SinaDailySource`: 신랑재경 일봉 (거래대금 없음)
//! - `FallbackSource`: 여러 소스를 우선순위대로 시도
//!
//! ## 종목 목록
//! - `EastmoneyUniverse`: 동방재부 A주 전종목 목록
//! - `StaticUniverse`: 고정 목록 (CLI `--symbols`, `--indices`, 테스트)

pub mod client;
pub mod eastmoney;
pub mod fallback;
pub mod sina;

pub use client::{shanghai_today, FetchClientConfig};
pub use eastmoney::{EastmoneyDailySource, EastmoneyUniverse};
pub use fallback::FallbackSource;
pub use sina::SinaDailySource;

use crate::error::{FetchError, UniverseError};
use async_trait::async_trait;
use chrono::NaiveDate;
use kline_core::{Bar, Instrument};

/// 일봉 데이터 소스.
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// 로그용 소스 이름.
    fn name(&self) -> &str;

    /// `start` 이후의 일봉을 날짜 오름차순으로 반환합니다.
    ///
    /// 데이터가 없으면 빈 목록을 반환합니다 (오류 아님).
    async fn fetch(
        &self,
        instrument: &Instrument,
        start: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError>;
}

/// 수집 대상 종목 목록 제공자.
#[async_trait]
pub trait UniverseProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 현재 상장 종목 목록.
    async fn list(&self) -> Result<Vec<Instrument>, UniverseError>;
}

/// 고정된 종목 목록.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    instruments: Vec<Instrument>,
}

impl StaticUniverse {
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self { instruments }
    }
}

#[async_trait]
impl UniverseProvider for StaticUniverse {
    fn name(&self) -> &str {
        "static"
    }

    async fn list(&self) -> Result<Vec<Instrument>, UniverseError> {
        Ok(self.instruments.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_universe_lists_in_order() {
        let universe = StaticUniverse::new(vec![
            Instrument::new("600000.SH", "浦发银行"),
            Instrument::new("000001.SH", "上证指数"),
        ]);
        let instruments = universe.list().await.unwrap();
        let symbols: Vec<&str> = instruments.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["600000.SH", "000001.SH"]);
        assert!(!instruments[0].is_index());
        assert!(instruments[1].is_index());
        assert_eq!(universe.name(), "static");
    }
}
