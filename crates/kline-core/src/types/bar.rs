//! 일봉 데이터 타입.
//!
//! - `Bar` - 종목별 하루치 OHLCV 레코드
//! - `BarDefect` - 저장을 거부해야 하는 불량 캔들 사유
//! - `DateRange` - 조회용 날짜 범위 (양 끝 포함)
//! - `DateSpan` - 실제로 관측된 첫/마지막 날짜

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 일봉 (OHLCV + 거래대금).
///
/// (symbol, date) 쌍이 유일 키입니다. 날짜는 거래소 현지 기준 달력 날짜입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// 종목 식별자 (예: 600000.SH)
    pub symbol: String,
    /// 거래일
    pub date: NaiveDate,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량
    pub volume: u64,
    /// 거래대금 (제공하지 않는 소스도 있음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

impl Bar {
    /// 새 일봉을 생성합니다.
    pub fn new(
        symbol: impl Into<String>,
        date: NaiveDate,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            open,
            high,
            low,
            close,
            volume,
            amount: None,
        }
    }

    /// 거래대금을 설정합니다.
    pub fn with_amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    /// 저장 가능한 캔들인지 검사합니다.
    pub fn validate(&self) -> Result<(), BarDefect> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];

        for (field, value) in prices {
            if !value.is_finite() {
                return Err(BarDefect::NonFinite { field, value });
            }
            if value < 0.0 {
                return Err(BarDefect::Negative { field, value });
            }
        }

        if let Some(amount) = self.amount {
            if !amount.is_finite() {
                return Err(BarDefect::NonFinite {
                    field: "amount",
                    value: amount,
                });
            }
        }

        if self.high < self.low {
            return Err(BarDefect::InvertedRange {
                high: self.high,
                low: self.low,
            });
        }

        Ok(())
    }
}

/// 불량 캔들 사유.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarDefect {
    /// NaN 또는 무한대
    #[error("{field} 값이 유한수가 아닙니다: {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// 음수 가격
    #[error("{field} 값이 음수입니다: {value}")]
    Negative { field: &'static str, value: f64 },

    /// 고가 < 저가
    #[error("고가({high})가 저가({low})보다 낮습니다")]
    InvertedRange { high: f64, low: f64 },
}

/// 조회용 날짜 범위. `None`인 쪽은 열려 있습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// 전체 기간.
    pub fn all() -> Self {
        Self::default()
    }

    /// 양 끝을 포함하는 구간.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// `start` 이후 전체.
    pub fn since(start: NaiveDate) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }
}

/// 관측된 첫 거래일과 마지막 거래일.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSpan {
    pub first: NaiveDate,
    pub last: NaiveDate,
}

impl DateSpan {
    /// 날짜 목록에서 범위를 계산합니다. 비어 있으면 `None`.
    pub fn of<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Option<Self> {
        dates.into_iter().fold(None, |span: Option<DateSpan>, date| {
            Some(match span {
                Some(span) => span.extended(date),
                None => DateSpan {
                    first: date,
                    last: date,
                },
            })
        })
    }

    /// 날짜 하나를 포함하도록 확장합니다.
    pub fn extended(self, date: NaiveDate) -> Self {
        Self {
            first: self.first.min(date),
            last: self.last.max(date),
        }
    }

    /// 두 범위를 합칩니다.
    pub fn merge(self, other: DateSpan) -> Self {
        Self {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }

    /// `Option` 두 개를 합칩니다.
    pub fn merge_opt(a: Option<DateSpan>, b: Option<DateSpan>) -> Option<DateSpan> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            (a, b) => a.or(b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sample_bar() -> Bar {
        Bar::new("600000.SH", day(2), 7.1, 7.2, 7.0, 7.15, 1_000).with_amount(7_150.0)
    }

    #[test]
    fn test_valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
        assert!(Bar { amount: None, ..sample_bar() }.validate().is_ok());
    }

    #[test]
    fn test_non_finite_price_rejected() {
        let bar = Bar {
            close: f64::NAN,
            ..sample_bar()
        };
        assert!(matches!(
            bar.validate(),
            Err(BarDefect::NonFinite { field: "close", .. })
        ));

        let bar = Bar {
            amount: Some(f64::INFINITY),
            ..sample_bar()
        };
        assert!(matches!(
            bar.validate(),
            Err(BarDefect::NonFinite { field: "amount", .. })
        ));
    }

    #[test]
    fn test_negative_and_inverted_rejected() {
        let bar = Bar {
            low: -1.0,
            ..sample_bar()
        };
        assert!(matches!(bar.validate(), Err(BarDefect::Negative { .. })));

        let bar = Bar {
            high: 6.0,
            ..sample_bar()
        };
        assert!(matches!(bar.validate(), Err(BarDefect::InvertedRange { .. })));
    }

    #[test]
    fn test_amount_omitted_in_json_when_absent() {
        let json = serde_json::to_string(&Bar {
            amount: None,
            ..sample_bar()
        })
        .unwrap();
        assert!(!json.contains("amount"));
    }

    #[test]
    fn test_date_span_of_and_merge() {
        assert_eq!(DateSpan::of(Vec::new()), None);

        let span = DateSpan::of([day(5), day(2), day(9)]).unwrap();
        assert_eq!(span.first, day(2));
        assert_eq!(span.last, day(9));

        let merged = DateSpan::merge_opt(Some(span), DateSpan::of([day(1)])).unwrap();
        assert_eq!(merged.first, day(1));
        assert_eq!(merged.last, day(9));
        assert_eq!(DateSpan::merge_opt(None, Some(span)), Some(span));
    }
}
