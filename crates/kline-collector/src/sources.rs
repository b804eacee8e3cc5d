//! 설정으로부터 일봉 소스와 종목 목록 제공자를 구성합니다.

use crate::config::{CollectorConfig, SourceKind};
use crate::error::{CollectorError, Result};
use crate::modules::resolve_codes;
use kline_core::Instrument;
use kline_data::{
    EastmoneyDailySource, EastmoneyUniverse, FallbackSource, SinaDailySource, StaticUniverse,
    TimeSeriesSource, UniverseProvider,
};
use std::sync::Arc;

/// 설정된 우선순위대로 일봉 소스를 만듭니다. 둘 이상이면 fallback 체인으로 묶습니다.
pub fn build_source(config: &CollectorConfig) -> Result<Arc<dyn TimeSeriesSource>> {
    let client_config = config.http.client_config();

    let mut sources: Vec<Arc<dyn TimeSeriesSource>> = Vec::with_capacity(config.sources.len());
    for kind in &config.sources {
        let source: Arc<dyn TimeSeriesSource> = match kind {
            SourceKind::Eastmoney => {
                Arc::new(EastmoneyDailySource::new(&client_config).map_err(client_error)?)
            }
            SourceKind::Sina => {
                Arc::new(SinaDailySource::new(&client_config).map_err(client_error)?)
            }
        };
        sources.push(source);
    }

    if sources.len() == 1 {
        if let Some(only) = sources.pop() {
            return Ok(only);
        }
    }
    let chain = FallbackSource::new(sources);
    if chain.is_empty() {
        return Err(CollectorError::Config("일봉 소스가 설정되지 않았습니다".to_string()));
    }
    tracing::debug!(chain = chain.name(), "fallback 소스 구성");
    Ok(Arc::new(chain))
}

/// 종목 목록 제공자를 만듭니다.
///
/// `symbols`가 주어지면 해당 종목만 담은 고정 목록을, 아니면 동방재부 전체 목록을 사용합니다.
pub fn build_universe(
    config: &CollectorConfig,
    symbols: Option<&[String]>,
    known: &[Instrument],
) -> Result<Arc<dyn UniverseProvider>> {
    match symbols {
        Some(codes) if !codes.is_empty() => {
            let instruments = resolve_codes(codes, known)?;
            Ok(Arc::new(StaticUniverse::new(instruments)))
        }
        _ => {
            let universe =
                EastmoneyUniverse::new(&config.http.client_config()).map_err(client_error)?;
            Ok(Arc::new(universe))
        }
    }
}

/// 주요 지수만 담은 고정 목록.
pub fn index_universe() -> Arc<dyn UniverseProvider> {
    Arc::new(StaticUniverse::new(kline_core::major_indices()))
}

/// 쉼표 구분 종목 코드 파싱
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn client_error(e: impl std::fmt::Display) -> CollectorError {
    CollectorError::Config(format!("HTTP 클라이언트 생성 실패: {}", e))
}
