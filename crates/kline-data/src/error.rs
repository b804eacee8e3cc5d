//! 데이터 모듈 오류 타입.
//!
//! - `DataError` - 저장소 오류 (수집 중단 사유)
//! - `FetchError` - 종목 단위 조회 실패 (다른 종목에 영향 없음)
//! - `UniverseError` - 종목 목록 조회 실패

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 저장소 관련 오류.
#[derive(Debug, Error)]
pub enum DataError {
    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    QueryError(String),

    /// 데이터 삽입 오류
    #[error("Insert error: {0}")]
    InsertError(String),

    /// 스키마 생성 오류
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// 파일 입출력 오류
    #[error("I/O error: {0}")]
    IoError(String),

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                DataError::ConnectionError(err.to_string())
            }
            sqlx::Error::Io(e) => DataError::IoError(e.to_string()),
            sqlx::Error::Database(db_err) => DataError::QueryError(db_err.message().to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DataError::InvalidData(err.to_string())
            }
            _ => DataError::QueryError(err.to_string()),
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(err: std::io::Error) -> Self {
        DataError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

/// 조회 실패 분류. 로깅과 리포트에만 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 일시적 네트워크 오류 (타임아웃 포함)
    Network,
    /// 요청 제한
    RateLimited,
    /// 종목 없음
    NotFound,
    /// 응답 형식 이상
    Malformed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::NotFound => "not_found",
            FailureKind::Malformed => "malformed",
        }
    }

    /// 같은 실행 안에서 재시도할 가치가 있는지.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::RateLimited)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 종목 단위 조회 오류.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// 연결 실패, 타임아웃, 5xx 등
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 제한 (HTTP 429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 종목 없음 (HTTP 404 등)
    #[error("Not found: {0}")]
    NotFound(String),

    /// 응답을 해석할 수 없음
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Network(_) => FailureKind::Network,
            FetchError::RateLimited(_) => FailureKind::RateLimited,
            FetchError::NotFound(_) => FailureKind::NotFound,
            FetchError::Malformed(_) => FailureKind::Malformed,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// HTTP 상태 코드를 실패 분류로 변환합니다.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        let message = format!("{} (HTTP {})", context, status.as_u16());
        match status.as_u16() {
            429 => FetchError::RateLimited(message),
            404 => FetchError::NotFound(message),
            _ => FetchError::Network(message),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::from_status(status, "HTTP 오류");
        }
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// 종목 목록 조회 오류.
#[derive(Debug, Error)]
pub enum UniverseError {
    /// 목록 제공자 호출 실패
    #[error("Universe provider unavailable: {0}")]
    Unavailable(String),

    /// 응답을 해석할 수 없음
    #[error("Malformed universe response: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, "x").kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            FetchError::from_status(StatusCode::NOT_FOUND, "x").kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            FetchError::from_status(StatusCode::BAD_GATEWAY, "x").kind(),
            FailureKind::Network
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(FetchError::Network("timeout".into()).is_retryable());
        assert!(FetchError::RateLimited("slow down".into()).is_retryable());
        assert!(!FetchError::NotFound("gone".into()).is_retryable());
        assert!(!FetchError::Malformed("bad json".into()).is_retryable());
    }

    #[test]
    fn test_failure_kind_serde() {
        let json = serde_json::to_string(&FailureKind::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let kind: FailureKind = serde_json::from_str("\"malformed\"").unwrap();
        assert_eq!(kind, FailureKind::Malformed);
    }
}
