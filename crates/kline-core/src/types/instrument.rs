//! 종목 및 시장 구분 정의.
//!
//! 이 모듈은 A주 종목 관련 타입을 정의합니다:
//! - `Exchange` - 거래소 (상해, 심천, 북경)
//! - `Market` - 거래소 내 보드/세그먼트 구분
//! - `Instrument` - 거래소 접미사가 붙은 종목 식별자와 표시 정보
//! - `major_indices` - 주요 A주 지수 목록

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 거래소.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    /// 상해증권거래소 (.SH)
    Shanghai,
    /// 심천증권거래소 (.SZ)
    Shenzhen,
    /// 북경증권거래소 (.BJ)
    Beijing,
}

impl Exchange {
    /// 식별자 접미사 (예: "SH").
    pub fn suffix(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "SH",
            Exchange::Shenzhen => "SZ",
            Exchange::Beijing => "BJ",
        }
    }

    /// 소문자 접두사 형식 (예: "sh"). 일부 데이터 소스가 이 형식을 사용합니다.
    pub fn prefix(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "sh",
            Exchange::Shenzhen => "sz",
            Exchange::Beijing => "bj",
        }
    }

    /// 접미사/접두사 문자열에서 거래소를 파싱합니다 (대소문자 무시).
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "SH" | "SS" => Some(Exchange::Shanghai),
            "SZ" => Some(Exchange::Shenzhen),
            "BJ" => Some(Exchange::Beijing),
            _ => None,
        }
    }

    /// 6자리 숫자 코드의 접두사로 거래소를 추정합니다.
    ///
    /// 지수 코드는 종목 코드와 겹치므로 (上证指数 000001 / 平安银行 000001)
    /// 지수는 반드시 접미사를 붙여 지정해야 합니다.
    pub fn guess_from_code(code: &str) -> Option<Self> {
        if !is_six_digit_code(code) {
            return None;
        }
        if code.starts_with('6') || code.starts_with("900") {
            Some(Exchange::Shanghai)
        } else if code.starts_with("92") || code.starts_with('4') || code.starts_with('8') {
            Some(Exchange::Beijing)
        } else if code.starts_with('0') || code.starts_with('2') || code.starts_with('3') {
            Some(Exchange::Shenzhen)
        } else {
            None
        }
    }
}

/// 보드/세그먼트 단위의 시장 구분.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// 상해 메인보드 (600/601/603/605)
    ShanghaiMain,
    /// 과창판 STAR (688/689)
    Star,
    /// 상해 기타
    ShanghaiOther,
    /// 심천 메인보드 (000/001/003)
    ShenzhenMain,
    /// 중소판 (002)
    Sme,
    /// 창업판 ChiNext (300/301)
    ChiNext,
    /// 심천 기타
    ShenzhenOther,
    /// 북경증권거래소
    Beijing,
    /// 지수 (000xxx.SH, 399xxx.SZ, 899xxx.BJ)
    Index,
    /// 분류 불가
    Unknown,
}

impl Market {
    /// 거래소 접미사가 붙은 식별자로 시장을 분류합니다.
    pub fn classify(symbol: &str) -> Self {
        let Some((code, exchange)) = split_symbol(symbol) else {
            return Market::Unknown;
        };

        match exchange {
            Exchange::Shanghai => {
                if code.starts_with("000") {
                    Market::Index
                } else if ["600", "601", "603", "605"].iter().any(|p| code.starts_with(p)) {
                    Market::ShanghaiMain
                } else if code.starts_with("688") || code.starts_with("689") {
                    Market::Star
                } else {
                    Market::ShanghaiOther
                }
            }
            Exchange::Shenzhen => {
                if code.starts_with("399") {
                    Market::Index
                } else if ["000", "001", "003"].iter().any(|p| code.starts_with(p)) {
                    Market::ShenzhenMain
                } else if code.starts_with("002") {
                    Market::Sme
                } else if code.starts_with("300") || code.starts_with("301") {
                    Market::ChiNext
                } else {
                    Market::ShenzhenOther
                }
            }
            Exchange::Beijing if code.starts_with("899") => Market::Index,
            Exchange::Beijing => Market::Beijing,
        }
    }

    /// DB 저장용 문자열.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::ShanghaiMain => "shanghai_main",
            Market::Star => "star",
            Market::ShanghaiOther => "shanghai_other",
            Market::ShenzhenMain => "shenzhen_main",
            Market::Sme => "sme",
            Market::ChiNext => "chinext",
            Market::ShenzhenOther => "shenzhen_other",
            Market::Beijing => "beijing",
            Market::Index => "index",
            Market::Unknown => "unknown",
        }
    }

    /// 리포트용 표시 이름.
    pub fn display_name(&self) -> &'static str {
        match self {
            Market::ShanghaiMain => "沪市主板",
            Market::Star => "科创板",
            Market::ShanghaiOther => "沪市其他",
            Market::ShenzhenMain => "深市主板",
            Market::Sme => "中小板",
            Market::ChiNext => "创业板",
            Market::ShenzhenOther => "深市其他",
            Market::Beijing => "北交所",
            Market::Index => "指数",
            Market::Unknown => "未知市场",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shanghai_main" => Ok(Market::ShanghaiMain),
            "star" => Ok(Market::Star),
            "shanghai_other" => Ok(Market::ShanghaiOther),
            "shenzhen_main" => Ok(Market::ShenzhenMain),
            "sme" => Ok(Market::Sme),
            "chinext" => Ok(Market::ChiNext),
            "shenzhen_other" => Ok(Market::ShenzhenOther),
            "beijing" => Ok(Market::Beijing),
            "index" => Ok(Market::Index),
            "unknown" => Ok(Market::Unknown),
            _ => Err(format!("Unknown market: {}", s)),
        }
    }
}

/// 수집 대상 종목.
///
/// 식별자(`symbol`)가 곧 종목의 정체성입니다. 이름과 시장 구분은
/// 매 실행마다 유니버스 제공자로부터 다시 받아오는 표시 정보입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// 거래소 접미사가 붙은 식별자 (예: 600000.SH)
    pub symbol: String,
    /// 종목명
    pub name: String,
    /// 시장 구분
    pub market: Market,
}

impl Instrument {
    /// 식별자로부터 시장을 분류하여 종목을 생성합니다.
    pub fn new(symbol: impl Into<String>, name: impl Into<String>) -> Self {
        let symbol = symbol.into();
        let market = Market::classify(&symbol);
        Self {
            symbol,
            name: name.into(),
            market,
        }
    }

    /// 원시 코드(600000, sh600000, 600000.sh 등)를 정규화하여 종목을 생성합니다.
    ///
    /// 정규화할 수 없는 코드면 `None`을 반환합니다.
    pub fn from_raw_code(raw: &str, name: impl Into<String>) -> Option<Self> {
        normalize_symbol(raw).map(|symbol| Self::new(symbol, name))
    }

    /// 접미사를 뗀 6자리 코드.
    pub fn code(&self) -> &str {
        self.symbol
            .split_once('.')
            .map(|(code, _)| code)
            .unwrap_or(&self.symbol)
    }

    /// 식별자의 거래소.
    pub fn exchange(&self) -> Option<Exchange> {
        split_symbol(&self.symbol).map(|(_, exchange)| exchange)
    }

    pub fn is_index(&self) -> bool {
        self.market == Market::Index
    }
}

/// 주요 A주 지수 (식별자, 이름).
pub const MAJOR_INDICES: [(&str, &str); 7] = [
    ("000001.SH", "上证指数"),
    ("399001.SZ", "深证成指"),
    ("399006.SZ", "创业板指"),
    ("000688.SH", "科创50"),
    ("000016.SH", "上证50"),
    ("000300.SH", "沪深300"),
    ("899050.BJ", "北证50"),
];

/// 주요 지수 목록을 종목으로 반환합니다.
pub fn major_indices() -> Vec<Instrument> {
    MAJOR_INDICES
        .iter()
        .map(|(symbol, name)| Instrument::new(*symbol, *name))
        .collect()
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.name)
    }
}

/// 다양한 표기의 종목 코드를 `CODE.EX` 형식으로 정규화합니다.
///
/// 지원 형식: `600000`, `600000.sh`, `SH600000`, `sz000001`.
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some((code, tag)) = raw.split_once('.') {
        let exchange = Exchange::from_tag(tag)?;
        return is_six_digit_code(code).then(|| format!("{}.{}", code, exchange.suffix()));
    }

    if raw.len() == 8 && raw.is_char_boundary(2) {
        let (tag, code) = raw.split_at(2);
        if let Some(exchange) = Exchange::from_tag(tag) {
            return is_six_digit_code(code).then(|| format!("{}.{}", code, exchange.suffix()));
        }
    }

    Exchange::guess_from_code(raw).map(|exchange| format!("{}.{}", raw, exchange.suffix()))
}

/// `CODE.EX` 형식 식별자를 (코드, 거래소)로 분리합니다.
fn split_symbol(symbol: &str) -> Option<(&str, Exchange)> {
    let (code, tag) = symbol.split_once('.')?;
    if !is_six_digit_code(code) {
        return None;
    }
    Exchange::from_tag(tag).map(|exchange| (code, exchange))
}

fn is_six_digit_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}
