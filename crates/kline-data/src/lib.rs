//! 일봉 저장소와 데이터 소스.
//!
//! 이 crate는 다음을 제공합니다:
//! - `TimeSeriesStore`: (종목, 거래일) 단위 멱등 저장소와 SQLite 구현
//! - `TimeSeriesSource` / `UniverseProvider`: 일봉 소스와 종목 목록 인터페이스
//! - 동방재부/신랑 어댑터와 우선순위 fallback 체인
//! - CSV 내보내기

pub mod error;
pub mod provider;
pub mod storage;

pub use error::{DataError, FailureKind, FetchError, Result, UniverseError};

pub use provider::{
    EastmoneyDailySource, EastmoneyUniverse, FallbackSource, FetchClientConfig, SinaDailySource,
    StaticUniverse, TimeSeriesSource, UniverseProvider,
};
pub use storage::{
    export_csv, ExportReport, MarketCount, SqliteBarStore, StoreConfig, StoreSummary,
    TimeSeriesStore, UpsertReport,
};
