//! 환경변수 기반 설정 모듈.

use crate::error::CollectorError;
use crate::Result;
use chrono::NaiveDate;
use kline_data::{FetchClientConfig, StoreConfig};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Collector 전체 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// SQLite DB 파일 경로
    pub db_path: PathBuf,
    /// DB 최대 연결 수
    pub db_max_connections: u32,
    /// 체크포인트 JSON 파일 경로
    pub checkpoint_path: PathBuf,
    /// 지수 수집 시작일 (`collect --indices`)
    pub index_start_date: NaiveDate,
    /// 일봉 수집 설정
    pub acquisition: AcquisitionConfig,
    /// HTTP 클라이언트 설정
    pub http: HttpConfig,
    /// 일봉 소스 우선순위
    pub sources: Vec<SourceKind>,
}

/// 일봉 수집 설정
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// 수집 시작일
    pub start_date: NaiveDate,
    /// 배치당 종목 수
    pub batch_size: usize,
    /// 동시 조회 수
    pub concurrency: usize,
    /// 배치 간 대기 (밀리초)
    pub batch_delay_ms: u64,
    /// 재시도 가능 실패에 대한 추가 라운드 수
    pub retry_rounds: u32,
    /// 종목당 조회 타임아웃 (초, 0이면 사용 안 함)
    pub fetch_timeout_secs: u64,
}

/// HTTP 클라이언트 설정
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 명시적 프록시 URL
    pub proxy: Option<String>,
    /// 시스템 프록시 무시
    pub bypass_proxy: bool,
    /// 인증서 검증 생략
    pub accept_invalid_certs: bool,
}

/// 일봉 소스 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Eastmoney,
    Sina,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eastmoney" | "em" => Ok(Self::Eastmoney),
            "sina" => Ok(Self::Sina),
            other => Err(format!("Unknown source: {}", other)),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("output/kline_data/a_share_klines.db"),
            db_max_connections: 4,
            checkpoint_path: PathBuf::from("output/kline_data/download_progress.json"),
            index_start_date: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
            acquisition: AcquisitionConfig::default(),
            http: HttpConfig::default(),
            sources: vec![SourceKind::Eastmoney, SourceKind::Sina],
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            start_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            batch_size: 50,
            concurrency: 3,
            batch_delay_ms: 2000,
            retry_rounds: 0,
            fetch_timeout_secs: 60,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            proxy: None,
            bypass_proxy: true,
            accept_invalid_certs: false,
        }
    }
}

impl CollectorConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정을 구성합니다.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let start_date = date_or(&lookup, "KLINE_START_DATE", defaults.acquisition.start_date)?;
        let index_start_date =
            date_or(&lookup, "KLINE_INDEX_START_DATE", defaults.index_start_date)?;

        let sources = match lookup("KLINE_SOURCES") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<SourceKind>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(CollectorError::Config)?,
            None => defaults.sources,
        };

        let config = Self {
            db_path: lookup("KLINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            db_max_connections: parse_or(
                &lookup,
                "KLINE_DB_MAX_CONNECTIONS",
                defaults.db_max_connections,
            )?,
            checkpoint_path: lookup("KLINE_CHECKPOINT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint_path),
            index_start_date,
            acquisition: AcquisitionConfig {
                start_date,
                batch_size: parse_or(&lookup, "KLINE_BATCH_SIZE", defaults.acquisition.batch_size)?,
                concurrency: parse_or(
                    &lookup,
                    "KLINE_CONCURRENCY",
                    defaults.acquisition.concurrency,
                )?,
                batch_delay_ms: parse_or(
                    &lookup,
                    "KLINE_BATCH_DELAY_MS",
                    defaults.acquisition.batch_delay_ms,
                )?,
                retry_rounds: parse_or(
                    &lookup,
                    "KLINE_RETRY_ROUNDS",
                    defaults.acquisition.retry_rounds,
                )?,
                fetch_timeout_secs: parse_or(
                    &lookup,
                    "KLINE_FETCH_TIMEOUT_SECS",
                    defaults.acquisition.fetch_timeout_secs,
                )?,
            },
            http: HttpConfig {
                timeout_secs: parse_or(
                    &lookup,
                    "KLINE_HTTP_TIMEOUT_SECS",
                    defaults.http.timeout_secs,
                )?,
                proxy: lookup("KLINE_HTTP_PROXY").filter(|s| !s.trim().is_empty()),
                bypass_proxy: bool_or(
                    &lookup,
                    "KLINE_HTTP_BYPASS_PROXY",
                    defaults.http.bypass_proxy,
                ),
                accept_invalid_certs: bool_or(
                    &lookup,
                    "KLINE_HTTP_ACCEPT_INVALID_CERTS",
                    defaults.http.accept_invalid_certs,
                ),
            },
            sources,
        };

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.acquisition.batch_size == 0 {
            return Err(CollectorError::Config("KLINE_BATCH_SIZE는 1 이상이어야 합니다".to_string()));
        }
        if self.acquisition.concurrency == 0 {
            return Err(CollectorError::Config("KLINE_CONCURRENCY는 1 이상이어야 합니다".to_string()));
        }
        if self.sources.is_empty() {
            return Err(CollectorError::Config("KLINE_SOURCES가 비어 있습니다".to_string()));
        }
        Ok(())
    }

    /// 저장소 연결 설정
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(&self.db_path).with_max_connections(self.db_max_connections)
    }
}

impl AcquisitionConfig {
    /// 배치 간 대기를 Duration으로 반환
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    /// 종목당 조회 타임아웃 (0이면 `None`)
    pub fn fetch_timeout(&self) -> Option<Duration> {
        (self.fetch_timeout_secs > 0).then(|| Duration::from_secs(self.fetch_timeout_secs))
    }
}

impl HttpConfig {
    /// 어댑터용 HTTP 클라이언트 설정
    pub fn client_config(&self) -> FetchClientConfig {
        let config = FetchClientConfig {
            bypass_proxy: self.bypass_proxy,
            accept_invalid_certs: self.accept_invalid_certs,
            ..FetchClientConfig::default()
        }
        .with_timeout(Duration::from_secs(self.timeout_secs));

        match &self.proxy {
            Some(proxy) => config.with_proxy(proxy.as_str()),
            None => config,
        }
    }
}

/// 값을 파싱 (없으면 기본값, 형식이 틀리면 설정 에러)
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CollectorError::Config(format!("{} 형식 오류 ({}): {}", key, raw, e))),
        None => Ok(default),
    }
}

/// YYYY-MM-DD 날짜 파싱
fn date_or<F>(lookup: &F, key: &str, default: NaiveDate) -> Result<NaiveDate>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
            .map_err(|e| CollectorError::Config(format!("{} 형식 오류 ({}): {}", key, raw, e))),
        None => Ok(default),
    }
}

/// bool 값 파싱
fn bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
