//! 우선순위 소스 체인.
//!
//! 앞선 소스가 실패하거나 빈 결과를 주면 다음 소스를 시도합니다.
//! - 비어 있지 않은 첫 성공 결과를 반환
//! - 성공했지만 빈 결과는 기억해 두었다가 더 나은 결과가 없으면 반환
//! - 모두 실패하면 마지막 오류를 반환

use super::TimeSeriesSource;
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use kline_core::{Bar, Instrument};
use std::sync::Arc;
use tracing::{debug, warn};

/// 여러 `TimeSeriesSource`를 우선순위대로 시도하는 소스.
pub struct FallbackSource {
    sources: Vec<Arc<dyn TimeSeriesSource>>,
    name: String,
}

impl FallbackSource {
    pub fn new(sources: Vec<Arc<dyn TimeSeriesSource>>) -> Self {
        let name = sources
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join(">");
        Self { sources, name }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl TimeSeriesSource for FallbackSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        start: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        let mut saw_empty = false;
        let mut last_error = None;

        for source in &self.sources {
            match source.fetch(instrument, start).await {
                Ok(bars) if !bars.is_empty() => {
                    debug!(
                        symbol = %instrument.symbol,
                        source = source.name(),
                        count = bars.len(),
                        "소스 조회 성공"
                    );
                    return Ok(bars);
                }
                Ok(_) => {
                    debug!(symbol = %instrument.symbol, source = source.name(), "빈 결과, 다음 소스 시도");
                    saw_empty = true;
                }
                Err(e) => {
                    warn!(
                        symbol = %instrument.symbol,
                        source = source.name(),
                        error = %e,
                        "소스 실패, 다음 소스 시도"
                    );
                    last_error = Some(e);
                }
            }
        }

        if saw_empty {
            return Ok(Vec::new());
        }
        Err(last_error.unwrap_or_else(|| FetchError::NotFound("설정된 데이터 소스 없음".to_string())))
    }
}
