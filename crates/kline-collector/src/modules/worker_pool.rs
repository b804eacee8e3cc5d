//! 제한된 동시성으로 종목별 일봉을 조회하는 워커 풀.
//!
//! N개의 워커가 공유 큐에서 종목을 하나씩 꺼내 처리합니다. 한 종목의 지연이나
//! 실패는 다른 종목의 진행을 막지 않습니다.
//!
//! 결과 처리:
//! - 일봉 있음 → 저장 후 succeeded
//! - 일봉 없음 → succeeded (실패 아님)
//! - 조회 오류 → failed + 실패 분류
//! - 저장소 오류 → 새 종목 분배 중단, 진행 중인 작업 정리 후 에러 반환

use super::checkpoint::CheckpointTracker;
use crate::error::{CollectorError, Result};
use chrono::NaiveDate;
use kline_core::{Bar, DateSpan, Instrument};
use kline_data::{DataError, FailureKind, FetchError, TimeSeriesSource, TimeSeriesStore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Instrument as _};

/// 워커 풀 설정
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// 동시 조회 수
    pub concurrency: usize,
    /// 조회 시작일
    pub start_date: NaiveDate,
    /// 종목당 조회 타임아웃 (만료 시 네트워크 오류로 분류)
    pub fetch_timeout: Option<Duration>,
}

/// 종목 하나의 처리 결과
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 저장 완료
    Stored {
        written: usize,
        rejected: usize,
        span: Option<DateSpan>,
    },
    /// 조회 성공, 데이터 없음
    NoData,
    /// 조회 실패
    Failed(FailureKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentOutcome {
    pub symbol: String,
    pub outcome: FetchOutcome,
}

/// 배치 하나의 처리 결과
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    /// 처리된 종목 결과 (완료 순서)
    pub outcomes: Vec<InstrumentOutcome>,
    /// 이미 완료되어 건너뛴 종목
    pub skipped: Vec<String>,
    /// 취소로 분배되지 않은 종목 수
    pub not_dispatched: usize,
}

/// 워커 풀.
pub struct FetchWorkerPool {
    source: Arc<dyn TimeSeriesSource>,
    store: Arc<dyn TimeSeriesStore>,
    checkpoint: Arc<CheckpointTracker>,
    settings: PoolSettings,
}

impl FetchWorkerPool {
    pub fn new(
        source: Arc<dyn TimeSeriesSource>,
        store: Arc<dyn TimeSeriesStore>,
        checkpoint: Arc<CheckpointTracker>,
        settings: PoolSettings,
    ) -> Self {
        Self {
            source,
            store,
            checkpoint,
            settings,
        }
    }

    /// 배치를 처리합니다. 분배된 모든 작업이 끝난 뒤 반환합니다.
    ///
    /// `cancel`은 새 종목 분배만 멈추며 진행 중인 조회는 끝까지 기다립니다.
    pub async fn run(
        &self,
        batch: usize,
        instruments: Vec<Instrument>,
        cancel: &CancellationToken,
    ) -> Result<PoolReport> {
        let (pending, done): (Vec<_>, Vec<_>) = instruments
            .into_iter()
            .partition(|i| !self.checkpoint.is_done(&i.symbol));

        let mut report = PoolReport {
            skipped: done.into_iter().map(|i| i.symbol).collect(),
            ..Default::default()
        };
        if !report.skipped.is_empty() {
            debug!(batch, skipped = report.skipped.len(), "완료된 종목 건너뜀");
        }
        if pending.is_empty() {
            return Ok(report);
        }

        let worker_count = self.settings.concurrency.max(1).min(pending.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        // 종목이 끝날 때마다 기록하므로 워커가 패닉해도 이미 처리된 결과는 남음
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        // 저장소 오류 시 다른 워커의 분배도 멈추기 위한 하위 토큰
        let stop = cancel.child_token();

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                batch,
                source: self.source.clone(),
                store: self.store.clone(),
                checkpoint: self.checkpoint.clone(),
                queue: queue.clone(),
                outcomes: outcomes.clone(),
                stop: stop.clone(),
                start_date: self.settings.start_date,
                fetch_timeout: self.settings.fetch_timeout,
            };
            workers.spawn(worker.run());
        }

        let mut storage_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(e)) => {
                    storage_error.get_or_insert(e);
                }
                Ok(None) => {}
                // 처리 중이던 종목은 체크포인트에 기록되지 않아 다음 실행에서 재시도됨
                Err(e) => error!(batch, error = %e, "워커 태스크 비정상 종료"),
            }
        }
        report.outcomes = std::mem::take(&mut *outcomes.lock().unwrap_or_else(|e| e.into_inner()));

        if let Some(e) = storage_error {
            return Err(CollectorError::Storage(e));
        }

        report.not_dispatched = queue.lock().unwrap_or_else(|e| e.into_inner()).len();
        if report.not_dispatched > 0 {
            warn!(batch, not_dispatched = report.not_dispatched, "분배되지 않은 종목 남음");
        }
        Ok(report)
    }
}

struct Worker {
    id: usize,
    batch: usize,
    source: Arc<dyn TimeSeriesSource>,
    store: Arc<dyn TimeSeriesStore>,
    checkpoint: Arc<CheckpointTracker>,
    queue: Arc<Mutex<VecDeque<Instrument>>>,
    outcomes: Arc<Mutex<Vec<InstrumentOutcome>>>,
    stop: CancellationToken,
    start_date: NaiveDate,
    fetch_timeout: Option<Duration>,
}

impl Worker {
    /// 큐가 빌 때까지 처리합니다. 저장소 오류로 멈추면 그 오류를 반환합니다.
    async fn run(self) -> Option<DataError> {
        loop {
            if self.stop.is_cancelled() {
                break;
            }
            let next = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(instrument) = next else {
                break;
            };

            let span = kline_core::instrument_span!("fetch", instrument.symbol, self.batch);
            match self.process(&instrument).instrument(span).await {
                Ok(outcome) => self
                    .outcomes
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(InstrumentOutcome {
                        symbol: instrument.symbol,
                        outcome,
                    }),
                Err(e) => {
                    error!(
                        worker = self.id,
                        symbol = %instrument.symbol,
                        error = %e,
                        "저장 실패, 분배 중단"
                    );
                    self.stop.cancel();
                    return Some(e);
                }
            }
        }

        None
    }

    async fn fetch(&self, instrument: &Instrument) -> std::result::Result<Vec<Bar>, FetchError> {
        let request = self.source.fetch(instrument, self.start_date);
        match self.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Network(format!("조회 시간 초과 ({:?})", limit))),
            },
            None => request.await,
        }
    }

    /// 조회 → 저장 → 체크포인트 기록. 저장소 오류만 에러로 반환합니다.
    async fn process(
        &self,
        instrument: &Instrument,
    ) -> std::result::Result<FetchOutcome, DataError> {
        match self.fetch(instrument).await {
            Ok(bars) if bars.is_empty() => {
                self.checkpoint.mark_succeeded(&instrument.symbol);
                debug!("데이터 없음");
                Ok(FetchOutcome::NoData)
            }
            Ok(bars) => {
                let report = self.store.upsert(instrument, &bars).await?;
                self.checkpoint.mark_succeeded(&instrument.symbol);
                debug!(written = report.written, rejected = report.rejected, "저장 완료");

                let span = report
                    .first_date
                    .zip(report.last_date)
                    .map(|(first, last)| DateSpan { first, last });
                Ok(FetchOutcome::Stored {
                    written: report.written,
                    rejected: report.rejected,
                    span,
                })
            }
            Err(e) => {
                let kind = e.kind();
                warn!(kind = %kind, error = %e, "조회 실패");
                self.checkpoint.mark_failed(&instrument.symbol, kind);
                Ok(FetchOutcome::Failed(kind))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use kline_core::DateRange;
    use kline_data::SqliteBarStore;
    use std::sync::atomic::Ordering;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn settings(concurrency: usize, fetch_timeout: Option<Duration>) -> PoolSettings {
        PoolSettings {
            concurrency,
            start_date: start(),
            fetch_timeout,
        }
    }

    fn instruments(ids: &[&str]) -> Vec<Instrument> {
        ids.iter().map(|id| Instrument::new(*id, *id)).collect()
    }

    async fn memory_store() -> Arc<SqliteBarStore> {
        Arc::new(SqliteBarStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let source = Arc::new(ScriptedSource::new([
            ("600000.SH", Script::Bars(10)),
            ("000001.SZ", Script::Bars(0)),
            ("300750.SZ", Script::Fail(FetchError::Network("reset".into()))),
            ("601318.SH", Script::Fail(FetchError::NotFound("delisted".into()))),
        ]));
        let store = memory_store().await;
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool =
            FetchWorkerPool::new(source, store.clone(), checkpoint.clone(), settings(2, None));

        let report = pool
            .run(
                1,
                instruments(&["600000.SH", "000001.SZ", "300750.SZ", "601318.SH"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 4);
        let outcome = |id: &str| {
            report
                .outcomes
                .iter()
                .find(|o| o.symbol == id)
                .map(|o| o.outcome.clone())
                .unwrap()
        };
        assert!(matches!(outcome("600000.SH"), FetchOutcome::Stored { written: 10, .. }));
        assert_eq!(outcome("000001.SZ"), FetchOutcome::NoData);
        assert_eq!(outcome("300750.SZ"), FetchOutcome::Failed(FailureKind::Network));
        assert_eq!(outcome("601318.SH"), FetchOutcome::Failed(FailureKind::NotFound));

        assert!(checkpoint.is_done("600000.SH"));
        assert!(checkpoint.is_done("000001.SZ"));
        assert!(!checkpoint.is_done("300750.SZ"));
        assert_eq!(store.query("600000.SH", DateRange::all()).await.unwrap().len(), 10);
        assert!(store.query("300750.SZ", DateRange::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_done_instruments_are_skipped() {
        let source = Arc::new(ScriptedSource::new([
            ("600000.SH", Script::Bars(3)),
            ("000001.SZ", Script::Bars(3)),
        ]));
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        checkpoint.mark_succeeded("600000.SH");
        checkpoint.mark_failed("000001.SZ", FailureKind::Network);

        let pool = FetchWorkerPool::new(
            source.clone(),
            memory_store().await,
            checkpoint.clone(),
            settings(3, None),
        );
        let report = pool
            .run(1, instruments(&["600000.SH", "000001.SZ"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.skipped, vec!["600000.SH".to_string()]);
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(source.calls("600000.SH"), 0);
        assert_eq!(source.calls("000001.SZ"), 1);
        assert!(checkpoint.is_done("000001.SZ"));
    }

    #[tokio::test]
    async fn test_hung_fetch_does_not_block_others() {
        let source = Arc::new(ScriptedSource::new([
            ("600000.SH", Script::Hang),
            ("000001.SZ", Script::Bars(2)),
            ("300750.SZ", Script::Bars(2)),
            ("601318.SH", Script::Bars(2)),
        ]));
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool = FetchWorkerPool::new(
            source,
            memory_store().await,
            checkpoint.clone(),
            settings(2, None),
        );

        let handle = tokio::spawn(async move {
            pool.run(
                1,
                instruments(&["600000.SH", "000001.SZ", "300750.SZ", "601318.SH"]),
                &CancellationToken::new(),
            )
            .await
        });

        let others = ["000001.SZ", "300750.SZ", "601318.SH"];
        let progressed = tokio::time::timeout(Duration::from_secs(5), async {
            while !others.iter().all(|id| checkpoint.is_done(id)) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(progressed.is_ok(), "다른 종목이 멈춘 종목에 막힘");
        assert!(!handle.is_finished());
        assert!(checkpoint.entry("600000.SH").is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_network_failure() {
        let source = Arc::new(ScriptedSource::new([
            ("600000.SH", Script::Hang),
            ("000001.SZ", Script::Bars(1)),
        ]));
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool = FetchWorkerPool::new(
            source,
            memory_store().await,
            checkpoint.clone(),
            settings(2, Some(Duration::from_millis(50))),
        );

        let report = pool
            .run(1, instruments(&["600000.SH", "000001.SZ"]), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(
            checkpoint.entry("600000.SH").unwrap().failure,
            Some(FailureKind::Network)
        );
        assert!(checkpoint.is_done("000001.SZ"));
    }

    #[tokio::test]
    async fn test_storage_error_stops_dispatch() {
        let ids = ["600000.SH", "600036.SH", "601318.SH", "601988.SH", "000001.SZ"];
        let source = Arc::new(ScriptedSource::new([
            (ids[0], Script::Bars(1)),
            (ids[1], Script::Bars(1)),
            (ids[2], Script::Bars(1)),
            (ids[3], Script::Bars(1)),
            (ids[4], Script::Bars(1)),
        ]));
        let store = Arc::new(BrokenStore::default());
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool = FetchWorkerPool::new(
            source.clone(),
            store.clone(),
            checkpoint.clone(),
            settings(1, None),
        );

        let err = pool
            .run(1, instruments(&ids), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CollectorError::Storage(_)));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
        assert_eq!(source.total_calls(), 1);
        assert_eq!(checkpoint.counts().total(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_dispatch_but_settles_in_flight() {
        let source = Arc::new(
            ScriptedSource::new([
                ("600000.SH", Script::Bars(1)),
                ("600036.SH", Script::Bars(1)),
                ("601318.SH", Script::Bars(1)),
            ])
            .with_delay(Duration::from_millis(30)),
        );
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool = FetchWorkerPool::new(
            source.clone(),
            memory_store().await,
            checkpoint.clone(),
            settings(1, None),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let report = pool
            .run(1, instruments(&["600000.SH", "600036.SH", "601318.SH"]), &cancel)
            .await
            .unwrap();

        // 첫 종목은 취소 전에 분배되어 끝까지 처리됨
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.not_dispatched, 2);
        assert!(checkpoint.is_done("600000.SH"));
        assert_eq!(source.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_worker_panic_keeps_recorded_outcomes() {
        let source = Arc::new(ScriptedSource::new([
            ("600000.SH", Script::Bars(2)),
            ("600036.SH", Script::Panic),
            ("601318.SH", Script::Bars(1)),
        ]));
        let store = memory_store().await;
        let checkpoint = Arc::new(CheckpointTracker::new("unused.json"));
        let pool =
            FetchWorkerPool::new(source.clone(), store, checkpoint.clone(), settings(1, None));

        let report = pool
            .run(
                1,
                instruments(&["600000.SH", "600036.SH", "601318.SH"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // 패닉 전에 끝난 종목은 결과와 체크포인트 양쪽에 남아 있어야 함
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].symbol, "600000.SH");
        assert!(matches!(report.outcomes[0].outcome, FetchOutcome::Stored { written: 2, .. }));
        assert!(checkpoint.is_done("600000.SH"));
        assert!(checkpoint.entry("600036.SH").is_none());
        assert_eq!(report.not_dispatched, 1);
        assert_eq!(source.calls("601318.SH"), 0);
    }
}
