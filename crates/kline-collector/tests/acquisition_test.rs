//! 파일 기반 저장소와 체크포인트를 사용한 수집 재개 통합 테스트.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use kline_collector::modules::{CheckpointTracker, EntryStatus};
use kline_collector::{AcquisitionSettings, BatchOrchestrator, RunState};
use kline_core::{Bar, DateRange, Instrument};
use kline_data::{
    FetchError, SqliteBarStore, StaticUniverse, StoreConfig, TimeSeriesSource, TimeSeriesStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const SYMBOLS: [&str; 5] = ["600000.SH", "600036.SH", "000001.SZ", "300750.SZ", "830799.BJ"];

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

/// 종목마다 `rows`개의 일봉을 돌려주는 소스. `cancel_on`을 조회하면 토큰을 취소합니다.
struct FixtureSource {
    rows: usize,
    calls: Mutex<HashMap<String, usize>>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl FixtureSource {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            calls: Mutex::new(HashMap::new()),
            cancel_on: None,
        }
    }

    fn cancelling_on(mut self, symbol: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((symbol.to_string(), token));
        self
    }

    fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().unwrap().get(symbol).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl TimeSeriesSource for FixtureSource {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        start: NaiveDate,
    ) -> Result<Vec<Bar>, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(instrument.symbol.clone())
            .or_insert(0) += 1;

        if let Some((symbol, token)) = &self.cancel_on {
            if symbol == &instrument.symbol {
                token.cancel();
            }
        }

        Ok((0..self.rows)
            .map(|i| {
                let px = 8.0 + i as f64 * 0.05;
                Bar::new(
                    &instrument.symbol,
                    start + ChronoDuration::days(i as i64),
                    px,
                    px + 0.1,
                    px - 0.1,
                    px,
                    10_000,
                )
            })
            .collect())
    }
}

fn universe() -> Arc<StaticUniverse> {
    Arc::new(StaticUniverse::new(
        SYMBOLS.iter().map(|s| Instrument::new(*s, *s)).collect(),
    ))
}

fn settings() -> AcquisitionSettings {
    AcquisitionSettings {
        start_date: start_date(),
        batch_size: 2,
        concurrency: 1,
        batch_delay: Duration::ZERO,
        retry_rounds: 0,
        fetch_timeout: Some(Duration::from_secs(5)),
    }
}

/// 취소 후 파일에서 체크포인트를 다시 읽어 재개하면 완료된 종목은 조회하지 않는다.
#[tokio::test]
async fn test_resume_after_cancel_from_persisted_checkpoint() {
    let dir = tempfile::tempdir().expect("임시 디렉토리 생성 실패");
    let db_path = dir.path().join("klines.db");
    let checkpoint_path = dir.path().join("download_progress.json");

    let store = Arc::new(
        SqliteBarStore::connect(&StoreConfig::new(&db_path))
            .await
            .expect("저장소 연결 실패"),
    );

    // 1차 실행: 세 번째 종목 조회 시 취소 → 두 번째 배치에서 중단
    let cancel = CancellationToken::new();
    let first_source = Arc::new(FixtureSource::new(5).cancelling_on(SYMBOLS[2], cancel.clone()));
    let first = BatchOrchestrator::new(
        universe(),
        first_source.clone(),
        store.clone(),
        Arc::new(CheckpointTracker::new(&checkpoint_path)),
        settings(),
    )
    .run(cancel)
    .await
    .expect("1차 실행 실패");

    assert!(first.cancelled);
    assert_eq!(first.attempted, 3);
    assert_eq!(first.rows_written, 15);
    assert_eq!(first_source.calls(SYMBOLS[3]), 0);
    store.close().await;

    // 프로세스 재시작을 가정: 파일에서 다시 읽음
    let store = Arc::new(
        SqliteBarStore::connect(&StoreConfig::new(&db_path))
            .await
            .expect("저장소 재연결 실패"),
    );
    let checkpoint = Arc::new(
        CheckpointTracker::load(&checkpoint_path)
            .await
            .expect("체크포인트 로드 실패"),
    );
    assert_eq!(checkpoint.counts().succeeded, 3);
    assert_eq!(checkpoint.counts().pending, 2);

    let second_source = Arc::new(FixtureSource::new(5));
    let second = BatchOrchestrator::new(
        universe(),
        second_source.clone(),
        store.clone(),
        checkpoint.clone(),
        settings(),
    )
    .run(CancellationToken::new())
    .await
    .expect("재개 실행 실패");

    assert!(!second.cancelled);
    assert_eq!(second.state, RunState::Done);
    assert_eq!(second.skipped, 3);
    assert_eq!(second.attempted, 2);
    for done in &SYMBOLS[..3] {
        assert_eq!(second_source.calls(done), 0, "{} 재조회됨", done);
    }
    assert_eq!(second_source.calls(SYMBOLS[3]), 1);
    assert_eq!(second_source.calls(SYMBOLS[4]), 1);

    let summary = store.summary().await.unwrap();
    assert_eq!(summary.instrument_count, 5);
    assert_eq!(summary.row_count, 25);

    let persisted = CheckpointTracker::load(&checkpoint_path).await.unwrap();
    for symbol in SYMBOLS {
        assert_eq!(persisted.entry(symbol).map(|e| e.status), Some(EntryStatus::Succeeded));
    }
}

/// 완료된 실행을 다시 돌리면 아무 것도 조회하지 않고 저장 데이터도 변하지 않는다.
#[tokio::test]
async fn test_completed_run_is_idempotent() {
    let dir = tempfile::tempdir().expect("임시 디렉토리 생성 실패");
    let store = Arc::new(
        SqliteBarStore::connect(&StoreConfig::new(dir.path().join("klines.db")))
            .await
            .unwrap(),
    );
    let checkpoint_path = dir.path().join("progress.json");

    let source = Arc::new(FixtureSource::new(3));
    let first = BatchOrchestrator::new(
        universe(),
        source.clone(),
        store.clone(),
        Arc::new(CheckpointTracker::new(&checkpoint_path)),
        settings(),
    )
    .run(CancellationToken::new())
    .await
    .unwrap();
    assert_eq!(first.succeeded, 5);
    assert_eq!(first.batches, 3);

    let before = store
        .query(SYMBOLS[0], DateRange::all())
        .await
        .unwrap();

    let again = Arc::new(FixtureSource::new(3));
    let second = BatchOrchestrator::new(
        universe(),
        again.clone(),
        store.clone(),
        Arc::new(CheckpointTracker::load(&checkpoint_path).await.unwrap()),
        settings(),
    )
    .run(CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(second.attempted, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(again.total_calls(), 0);
    assert_eq!(store.summary().await.unwrap().row_count, 15);
    assert_eq!(store.query(SYMBOLS[0], DateRange::all()).await.unwrap(), before);
}
