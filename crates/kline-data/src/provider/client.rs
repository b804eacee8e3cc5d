//! HTTP 클라이언트 설정.
//!
//! 프록시/인증서 설정을 전역으로 바꾸지 않고 어댑터마다 명시적으로 주입합니다.

use crate::error::FetchError;
use chrono::{NaiveDate, Utc};
use kline_core::Bar;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 어댑터별 HTTP 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct FetchClientConfig {
    /// 요청 타임아웃
    pub timeout: Duration,
    pub user_agent: String,
    /// 명시적 프록시 URL
    pub proxy: Option<String>,
    /// 시스템 프록시 환경 변수 무시 (`proxy`가 없을 때만 의미 있음)
    pub bypass_proxy: bool,
    /// 인증서 검증 생략
    pub accept_invalid_certs: bool,
}

impl Default for FetchClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            bypass_proxy: true,
            accept_invalid_certs: false,
        }
    }
}

impl FetchClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// 설정으로 `reqwest::Client`를 생성합니다.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .danger_accept_invalid_certs(self.accept_invalid_certs);

        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        } else if self.bypass_proxy {
            builder = builder.no_proxy();
        }

        builder.build()
    }
}

/// 거래소 현지(Asia/Shanghai) 기준 오늘 날짜.
pub fn shanghai_today() -> NaiveDate {
    Utc::now()
        .with_timezone(&chrono_tz::Asia::Shanghai)
        .date_naive()
}

/// GET 요청 후 JSON 본문을 역직렬화합니다.
///
/// 상태 코드는 `FetchError::from_status`로, 본문 해석 실패는 `Malformed`로 분류합니다.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &[(&str, String)],
) -> Result<T, FetchError> {
    let response = client.get(url).query(query).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status, url));
    }

    let text = response.text().await?;
    debug!(url, bytes = text.len(), "응답 수신");

    serde_json::from_str(&text).map_err(|e| {
        FetchError::Malformed(format!(
            "JSON 파싱 실패: {} - {}",
            e,
            text.chars().take(200).collect::<String>()
        ))
    })
}

/// 문자열 또는 숫자 JSON 값을 f64로 읽습니다.
pub(crate) fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 거래량 문자열을 정수로 읽습니다. "1234.0" 같은 표기도 허용합니다.
pub(crate) fn parse_volume(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<u64>() {
        return Some(v);
    }
    let v: f64 = raw.parse().ok()?;
    (v.is_finite() && v >= 0.0 && v <= u64::MAX as f64).then(|| v.round() as u64)
}

/// 행 단위 파싱 결과를 모읍니다.
///
/// 해석할 수 없는 행은 건너뛰고 개수만 남깁니다. 행이 있었는데 하나도 해석되지
/// 않으면 응답 자체가 잘못된 것으로 보고 첫 번째 오류를 돌려줍니다.
pub(crate) fn collect_rows<I>(symbol: &str, rows: I) -> Result<Vec<Bar>, FetchError>
where
    I: IntoIterator<Item = Result<Bar, FetchError>>,
{
    let mut bars = Vec::new();
    let mut skipped = 0usize;
    let mut first_error = None;

    for row in rows {
        match row {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                debug!(symbol, error = %e, "해석할 수 없는 행 건너뜀");
                skipped += 1;
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if bars.is_empty() => Err(e),
        _ => {
            if skipped > 0 {
                debug!(symbol, skipped, parsed = bars.len(), "일부 행 건너뜀");
            }
            Ok(bars)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_rows_skips_bad_rows() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let good = || Ok(Bar::new("600000.SH", day, 1.0, 1.0, 1.0, 1.0, 1));
        let bad = || Err(FetchError::Malformed("bad".into()));

        let bars = collect_rows("600000.SH", vec![good(), bad(), good()]).unwrap();
        assert_eq!(bars.len(), 2);

        assert!(matches!(
            collect_rows("600000.SH", vec![bad(), bad()]),
            Err(FetchError::Malformed(_))
        ));
        assert!(collect_rows("600000.SH", Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("12345"), Some(12345));
        assert_eq!(parse_volume(" 100.0 "), Some(100));
        assert_eq!(parse_volume("-5"), None);
        assert_eq!(parse_volume("abc"), None);
    }

    #[test]
    fn test_value_as_f64() {
        assert_eq!(value_as_f64(&serde_json::json!("7.25")), Some(7.25));
        assert_eq!(value_as_f64(&serde_json::json!(3)), Some(3.0));
        assert_eq!(value_as_f64(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_build_client_with_proxy_settings() {
        assert!(FetchClientConfig::default().build_client().is_ok());
        let config = FetchClientConfig::default().with_proxy("http://127.0.0.1:8899");
        assert!(config.build_client().is_ok());
    }
}
