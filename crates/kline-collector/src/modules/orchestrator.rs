//! 배치 수집 오케스트레이터.
//!
//! 종목 목록 조회 → 메타데이터 갱신 → 고정 크기 배치 분할 → 배치별 워커 풀 실행,
//! 체크포인트 저장, 배치 간 대기 → 요약 생성.
//!
//! 재개는 체크포인트의 건너뛰기 필터로 이루어집니다. 완료된 종목은 다시 조회하지 않습니다.

use super::checkpoint::CheckpointTracker;
use super::instrument_sync::sync_instruments;
use super::worker_pool::{FetchOutcome, FetchWorkerPool, PoolReport, PoolSettings};
use crate::config::AcquisitionConfig;
use crate::error::Result;
use crate::stats::{BatchReport, RunState, RunSummary};
use chrono::NaiveDate;
use kline_core::Instrument;
use kline_data::{TimeSeriesSource, TimeSeriesStore, UniverseProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 오케스트레이터 설정
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub start_date: NaiveDate,
    pub batch_size: usize,
    pub concurrency: usize,
    /// 배치 간 고정 대기
    pub batch_delay: Duration,
    /// 재시도 가능 실패에 대한 추가 라운드 수
    pub retry_rounds: u32,
    pub fetch_timeout: Option<Duration>,
}

impl From<&AcquisitionConfig> for AcquisitionSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            start_date: config.start_date,
            batch_size: config.batch_size.max(1),
            concurrency: config.concurrency.max(1),
            batch_delay: config.batch_delay(),
            retry_rounds: config.retry_rounds,
            fetch_timeout: config.fetch_timeout(),
        }
    }
}

/// 실행 중 누적 집계
#[derive(Default)]
struct RunAccumulator {
    /// 종목별 최종 결과 (재시도 시 덮어씀)
    outcomes: HashMap<String, FetchOutcome>,
    summary: RunSummary,
}

impl RunAccumulator {
    fn record(&mut self, pool: &PoolReport, count_skips: bool) {
        for item in &pool.outcomes {
            if let FetchOutcome::Stored {
                written,
                rejected,
                span,
            } = &item.outcome
            {
                self.summary.rows_written += written;
                self.summary.rows_rejected += rejected;
                self.summary.extend_span(*span);
            }
            self.outcomes.insert(item.symbol.clone(), item.outcome.clone());
        }
        if count_skips {
            self.summary.skipped += pool.skipped.len();
        }
        self.summary.batches += 1;
    }

    fn retryable(&self, instruments: &[Instrument]) -> Vec<Instrument> {
        instruments
            .iter()
            .filter(|i| {
                matches!(
                    self.outcomes.get(&i.symbol),
                    Some(FetchOutcome::Failed(kind)) if kind.is_retryable()
                )
            })
            .cloned()
            .collect()
    }

    fn finish(mut self, state: RunState, cancelled: bool, elapsed: Duration) -> RunSummary {
        let summary = &mut self.summary;
        summary.attempted = self.outcomes.len();
        for outcome in self.outcomes.values() {
            match outcome {
                FetchOutcome::Stored { .. } => summary.succeeded += 1,
                FetchOutcome::NoData => {
                    summary.succeeded += 1;
                    summary.empty += 1;
                }
                FetchOutcome::Failed(kind) => {
                    summary.failed += 1;
                    *summary.failures_by_kind.entry(*kind).or_insert(0) += 1;
                }
            }
        }
        summary.state = state;
        summary.cancelled = cancelled;
        summary.elapsed = elapsed;
        self.summary
    }
}

/// 배치 수집 오케스트레이터.
pub struct BatchOrchestrator {
    universe: Arc<dyn UniverseProvider>,
    store: Arc<dyn TimeSeriesStore>,
    checkpoint: Arc<CheckpointTracker>,
    pool: FetchWorkerPool,
    settings: AcquisitionSettings,
}

impl BatchOrchestrator {
    pub fn new(
        universe: Arc<dyn UniverseProvider>,
        source: Arc<dyn TimeSeriesSource>,
        store: Arc<dyn TimeSeriesStore>,
        checkpoint: Arc<CheckpointTracker>,
        settings: AcquisitionSettings,
    ) -> Self {
        let pool = FetchWorkerPool::new(
            source,
            store.clone(),
            checkpoint.clone(),
            PoolSettings {
                concurrency: settings.concurrency,
                start_date: settings.start_date,
                fetch_timeout: settings.fetch_timeout,
            },
        );
        Self {
            universe,
            store,
            checkpoint,
            pool,
            settings,
        }
    }

    fn enter(&self, state: RunState) {
        debug!(state = %state, "상태 전이");
    }

    /// 전체 수집을 실행합니다.
    ///
    /// 종목 목록 실패와 저장소 오류는 에러로 반환하고, 종목 단위 조회 실패는
    /// 요약에만 반영됩니다. 취소 시 진행 중인 배치를 정리하고 부분 요약을 반환합니다.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        self.enter(RunState::Initializing);

        self.enter(RunState::EnumeratingUniverse);
        let instruments =
            match sync_instruments(self.universe.as_ref(), self.store.as_ref(), &self.checkpoint)
                .await
            {
                Ok(instruments) => instruments,
                Err(e) => {
                    error!(
                        error = %e,
                        state = %RunState::Aborted,
                        "종목 목록 조회 실패, 수집 중단"
                    );
                    return Err(e);
                }
            };

        let mut acc = RunAccumulator::default();

        if cancel.is_cancelled() {
            warn!("첫 배치 전 취소됨");
            self.checkpoint.persist().await?;
            let summary = acc.finish(RunState::Aborted, true, started.elapsed());
            summary.log_summary("일봉 수집");
            return Ok(summary);
        }

        info!(
            instruments = instruments.len(),
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            start_date = %self.settings.start_date,
            "일봉 수집 시작"
        );

        self.run_pass(&instruments, 0, &mut acc, &cancel).await?;

        for round in 1..=self.settings.retry_rounds {
            let retry = acc.retryable(&instruments);
            if retry.is_empty() || cancel.is_cancelled() {
                break;
            }
            info!(round, count = retry.len(), "재시도 라운드 시작");
            if !self.pace(&cancel).await {
                break;
            }
            self.run_pass(&retry, round, &mut acc, &cancel).await?;
        }

        self.enter(RunState::Summarizing);
        let cancelled = cancel.is_cancelled();
        if cancelled {
            self.checkpoint.persist().await?;
        }

        let summary = acc.finish(RunState::Done, cancelled, started.elapsed());
        self.enter(RunState::Done);
        summary.log_summary("일봉 수집");
        Ok(summary)
    }

    /// 종목 목록을 배치로 나누어 한 번 처리합니다.
    async fn run_pass(
        &self,
        instruments: &[Instrument],
        round: u32,
        acc: &mut RunAccumulator,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let batches: Vec<&[Instrument]> = instruments.chunks(self.settings.batch_size).collect();
        let total_batches = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    round,
                    remaining_batches = total_batches - index,
                    "취소로 남은 배치 중단"
                );
                break;
            }

            let batch_started = Instant::now();
            self.enter(RunState::Dispatching);
            let pool_report = match self.pool.run(index + 1, batch.to_vec(), cancel).await {
                Ok(report) => report,
                Err(e) => {
                    // 체크포인트는 마지막 저장 상태로 남김
                    error!(batch = index + 1, round, error = %e, "배치 처리 중단");
                    return Err(e);
                }
            };
            self.enter(RunState::Settling);

            self.enter(RunState::Checkpointing);
            self.checkpoint.persist().await?;

            acc.record(&pool_report, round == 0);
            batch_report(&pool_report, index + 1, total_batches, round, batch_started.elapsed())
                .log_summary();

            if index + 1 < total_batches && !self.pace(cancel).await {
                break;
            }
        }

        Ok(())
    }

    /// 배치 간 고정 대기. 취소되면 false.
    async fn pace(&self, cancel: &CancellationToken) -> bool {
        if self.settings.batch_delay.is_zero() {
            return !cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(self.settings.batch_delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

fn batch_report(
    pool: &PoolReport,
    index: usize,
    total_batches: usize,
    round: u32,
    elapsed: Duration,
) -> BatchReport {
    let mut report = BatchReport {
        index,
        total_batches,
        round,
        dispatched: pool.outcomes.len(),
        skipped: pool.skipped.len(),
        elapsed,
        ..Default::default()
    };
    for item in &pool.outcomes {
        match &item.outcome {
            FetchOutcome::Stored { written, .. } => {
                report.succeeded += 1;
                report.rows_written += written;
            }
            FetchOutcome::NoData => {
                report.succeeded += 1;
                report.empty += 1;
            }
            FetchOutcome::Failed(_) => report.failed += 1,
        }
    }
    report
}
