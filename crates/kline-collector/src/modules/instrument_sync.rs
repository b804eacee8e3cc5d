//! 종목 목록 동기화 모듈.
//!
//! 유니버스 제공자에서 현재 종목 목록을 받아 저장소 메타데이터를 갱신하고
//! 체크포인트에 처음 보는 종목을 pending으로 등록합니다.

use super::checkpoint::CheckpointTracker;
use crate::error::{CollectorError, Result};
use kline_core::Instrument;
use kline_data::{TimeSeriesStore, UniverseProvider};
use std::collections::HashSet;

/// 종목 목록 동기화.
///
/// 제공자 오류나 빈 목록은 `UniverseUnavailable`입니다. 중복 식별자는 첫 항목만 남깁니다.
pub async fn sync_instruments(
    universe: &dyn UniverseProvider,
    store: &dyn TimeSeriesStore,
    checkpoint: &CheckpointTracker,
) -> Result<Vec<Instrument>> {
    tracing::info!(provider = universe.name(), "종목 목록 조회 시작");

    let listed = universe.list().await?;

    let mut seen = HashSet::new();
    let instruments: Vec<Instrument> = listed
        .into_iter()
        .filter(|i| seen.insert(i.symbol.clone()))
        .collect();

    if instruments.is_empty() {
        return Err(CollectorError::UniverseUnavailable(format!(
            "{} 제공자가 빈 목록을 반환했습니다",
            universe.name()
        )));
    }

    store.upsert_instruments(&instruments).await?;
    let registered = checkpoint.register_pending(instruments.iter().map(|i| i.symbol.as_str()));

    tracing::info!(
        total = instruments.len(),
        new = registered,
        "종목 목록 동기화 완료"
    );
    Ok(instruments)
}

/// 원시 코드 목록을 종목으로 변환합니다. 저장소에 알려진 종목명이 있으면 사용합니다.
pub fn resolve_codes(codes: &[String], known: &[Instrument]) -> Result<Vec<Instrument>> {
    codes
        .iter()
        .map(|code| {
            let mut instrument = Instrument::from_raw_code(code, "").ok_or_else(|| {
                CollectorError::Config(format!("알 수 없는 종목 코드: {}", code))
            })?;
            if let Some(existing) = known.iter().find(|k| k.symbol == instrument.symbol) {
                instrument.name = existing.name.clone();
            }
            Ok(instrument)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kline_data::{SqliteBarStore, StaticUniverse, UniverseError};

    struct DownUniverse;

    #[async_trait]
    impl UniverseProvider for DownUniverse {
        fn name(&self) -> &str {
            "down"
        }

        async fn list(&self) -> std::result::Result<Vec<Instrument>, UniverseError> {
            Err(UniverseError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_sync_registers_and_dedupes() {
        let store = SqliteBarStore::in_memory().await.unwrap();
        let checkpoint = CheckpointTracker::new("unused.json");
        checkpoint.mark_succeeded("600000.SH");

        let universe = StaticUniverse::new(vec![
            Instrument::new("600000.SH", "浦发银行"),
            Instrument::new("000001.SZ", "平安银行"),
            Instrument::new("600000.SH", "浦发银行"),
        ]);
        let instruments = sync_instruments(&universe, &store, &checkpoint).await.unwrap();

        assert_eq!(instruments.len(), 2);
        assert_eq!(store.instruments().await.unwrap().len(), 2);
        assert!(checkpoint.is_done("600000.SH"));
        assert_eq!(checkpoint.counts().pending, 1);
    }

    #[tokio::test]
    async fn test_provider_failure_and_empty_list() {
        let store = SqliteBarStore::in_memory().await.unwrap();
        let checkpoint = CheckpointTracker::new("unused.json");

        let err = sync_instruments(&DownUniverse, &store, &checkpoint).await.unwrap_err();
        assert!(matches!(err, CollectorError::UniverseUnavailable(_)));

        let err = sync_instruments(&StaticUniverse::default(), &store, &checkpoint)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectorError::UniverseUnavailable(_)));
    }

    #[test]
    fn test_resolve_codes_uses_known_names() {
        let known = vec![Instrument::new("600519.SH", "贵州茅台")];
        let resolved =
            resolve_codes(&["sh600519".to_string(), "000001".to_string()], &known).unwrap();
        assert_eq!(resolved[0].name, "贵州茅台");
        assert_eq!(resolved[1].symbol, "000001.SZ");
        assert_eq!(resolved[1].name, "");

        assert!(resolve_codes(&["BAD".to_string()], &known).is_err());
    }
}
