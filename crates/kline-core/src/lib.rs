//! # Kline Core
//!
//! A주 일봉 수집 시스템의 핵심 도메인 타입을 제공합니다.
//!
//! - 종목(`Instrument`)과 시장 구분(`Market`)
//! - 일봉(`Bar`)과 불량 캔들 판정(`BarDefect`)
//! - 날짜 범위(`DateRange`)
//! - 로깅 인프라

pub mod logging;
pub mod types;

pub use logging::*;
pub use types::*;
