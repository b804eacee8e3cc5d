//! 수집 통계 구조체.

use chrono::NaiveDate;
use kline_core::DateSpan;
use kline_data::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// 실행 상태.
///
/// `Initializing → EnumeratingUniverse → {Dispatching → Settling → Checkpointing}ᵢ
/// → Summarizing → Done`, 종목 목록 실패나 첫 배치 전 취소 시 `Aborted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Initializing,
    EnumeratingUniverse,
    Dispatching,
    Settling,
    Checkpointing,
    Summarizing,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::EnumeratingUniverse => "enumerating_universe",
            Self::Dispatching => "dispatching",
            Self::Settling => "settling",
            Self::Checkpointing => "checkpointing",
            Self::Summarizing => "summarizing",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 배치 하나의 처리 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// 1부터 시작하는 배치 번호
    pub index: usize,
    pub total_batches: usize,
    /// 재시도 라운드 (0 = 본 수집)
    pub round: u32,
    /// 조회한 종목 수
    pub dispatched: usize,
    pub succeeded: usize,
    /// 데이터 없음 (성공으로 집계)
    pub empty: usize,
    pub failed: usize,
    /// 이미 완료되어 건너뛴 종목 수
    pub skipped: usize,
    pub rows_written: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl BatchReport {
    /// 배치 요약 로그 출력
    pub fn log_summary(&self) {
        tracing::info!(
            batch = format!("{}/{}", self.index, self.total_batches),
            round = self.round,
            dispatched = self.dispatched,
            succeeded = self.succeeded,
            empty = self.empty,
            failed = self.failed,
            skipped = self.skipped,
            rows_written = self.rows_written,
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "배치 완료"
        );
    }
}

/// 수집 실행 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// 조회를 시도한 종목 수
    pub attempted: usize,
    /// 성공 종목 수 (데이터 없음 포함)
    pub succeeded: usize,
    /// 빈 데이터 (조회 성공, 데이터 없음)
    pub empty: usize,
    /// 최종 실패 종목 수
    pub failed: usize,
    /// 실패 분류별 종목 수
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// 건너뛴 횟수 (이미 완료)
    pub skipped: usize,
    /// 저장된 총 캔들 수
    pub rows_written: usize,
    /// 거부된 불량 캔들 수
    pub rows_rejected: usize,
    /// 저장된 캔들의 첫 거래일
    pub first_date: Option<NaiveDate>,
    /// 저장된 캔들의 마지막 거래일
    pub last_date: Option<NaiveDate>,
    /// 처리한 배치 수 (재시도 라운드 포함)
    pub batches: usize,
    /// 취소 여부
    pub cancelled: bool,
    /// 종료 상태
    pub state: RunState,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장 기간 확장
    pub fn extend_span(&mut self, span: Option<DateSpan>) {
        let current = self
            .first_date
            .zip(self.last_date)
            .map(|(first, last)| DateSpan { first, last });
        if let Some(merged) = DateSpan::merge_opt(current, span) {
            self.first_date = Some(merged.first);
            self.last_date = Some(merged.last);
        }
    }

    /// 성공률 계산 (%)
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            (self.succeeded as f64 / self.attempted as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        let failures = self
            .failures_by_kind
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(",");

        tracing::info!(
            operation = operation,
            state = %self.state,
            attempted = self.attempted,
            succeeded = self.succeeded,
            empty = self.empty,
            failed = self.failed,
            failures = %failures,
            skipped = self.skipped,
            rows_written = self.rows_written,
            rows_rejected = self.rows_rejected,
            first_date = ?self.first_date,
            last_date = ?self.last_date,
            cancelled = self.cancelled,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "수집 완료"
        );
    }
}
