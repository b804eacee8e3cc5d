//! A주 일봉 배치 수집기.
//!
//! 이 crate는 전체 종목의 일봉을 배치 단위로 수집하는 라이브러리와 바이너리를 제공합니다:
//! - 종목 목록 동기화 (동방재부 또는 고정 목록)
//! - 제한된 동시성의 종목별 일봉 조회와 멱등 저장
//! - 배치 단위 체크포인트 저장과 재개
//! - 실행 통계 요약

pub mod config;
pub mod error;
pub mod modules;
pub mod sources;
pub mod stats;

pub use config::{AcquisitionConfig, CollectorConfig, HttpConfig, SourceKind};
pub use error::{CollectorError, Result};
pub use modules::{AcquisitionSettings, BatchOrchestrator, CheckpointTracker};
pub use stats::{BatchReport, RunState, RunSummary};
