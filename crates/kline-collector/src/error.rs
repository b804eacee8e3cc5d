//! 에러 타입 정의.

use crate::modules::checkpoint::CheckpointError;
use kline_data::{DataError, UniverseError};
use std::fmt;

/// Collector 에러 타입
#[derive(Debug)]
pub enum CollectorError {
    /// 종목 목록을 얻지 못함 (실행 중단)
    UniverseUnavailable(String),
    /// 저장소 에러 (실행 중단)
    Storage(DataError),
    /// 체크포인트 파일 에러
    Checkpoint(CheckpointError),
    /// 설정 에러
    Config(String),
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UniverseUnavailable(msg) => write!(f, "Universe unavailable: {}", msg),
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::Checkpoint(e) => write!(f, "Checkpoint error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DataError> for CollectorError {
    fn from(err: DataError) -> Self {
        Self::Storage(err)
    }
}

impl From<CheckpointError> for CollectorError {
    fn from(err: CheckpointError) -> Self {
        Self::Checkpoint(err)
    }
}

impl From<UniverseError> for CollectorError {
    fn from(err: UniverseError) -> Self {
        Self::UniverseUnavailable(err.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
