//! SQLite 일봉 저장소.
//!
//! (symbol, trade_date) 기본 키로 유일성을 보장하고 `ON CONFLICT DO UPDATE`로
//! 멱등 upsert를 수행합니다. 같은 종목에 대한 쓰기는 종목별 Lock으로 직렬화됩니다.
//!
//! # 사용 예제
//!
//! ```rust,ignore
//! use kline_data::storage::{SqliteBarStore, StoreConfig, TimeSeriesStore};
//!
//! let store = SqliteBarStore::connect(&StoreConfig::new("output/kline_data/a_share_klines.db")).await?;
//! let report = store.upsert(&instrument, &bars).await?;
//! ```

use super::{MarketCount, StoreSummary, TimeSeriesStore, UpsertReport};
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use kline_core::{Bar, DateRange, DateSpan, Instrument, Market};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// 한 INSERT 문에 담는 최대 행 수. 8컬럼 기준 SQLite 바인드 변수 한도(999) 이내.
const UPSERT_CHUNK_SIZE: usize = 100;

/// 종목별 쓰기 Lock 맵.
type WriteLockMap = Arc<RwLock<HashMap<String, Arc<RwLock<()>>>>>;

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS bars (
        symbol      TEXT    NOT NULL,
        trade_date  TEXT    NOT NULL,
        open        REAL    NOT NULL,
        high        REAL    NOT NULL,
        low         REAL    NOT NULL,
        close       REAL    NOT NULL,
        volume      INTEGER NOT NULL,
        amount      REAL,
        PRIMARY KEY (symbol, trade_date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bars_trade_date ON bars (trade_date)",
    r#"
    CREATE TABLE IF NOT EXISTS instruments (
        symbol       TEXT PRIMARY KEY,
        name         TEXT NOT NULL,
        market       TEXT NOT NULL,
        refreshed_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_instruments_market ON instruments (market)",
];

/// 저장소 연결 설정.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// DB 파일 경로 (상위 디렉토리는 자동 생성)
    pub path: PathBuf,
    /// 최대 연결 수
    pub max_connections: u32,
    /// 쓰기 잠금 대기 시간
    pub busy_timeout: Duration,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

/// DB 일봉 레코드.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BarRow {
    symbol: String,
    trade_date: NaiveDate,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
    amount: Option<f64>,
}

impl BarRow {
    fn into_bar(self) -> Bar {
        Bar {
            symbol: self.symbol,
            date: self.trade_date,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: u64::try_from(self.volume).unwrap_or(0),
            amount: self.amount,
        }
    }
}

/// SQLite 기반 `TimeSeriesStore`.
#[derive(Clone)]
pub struct SqliteBarStore {
    pool: SqlitePool,
    write_locks: WriteLockMap,
}

impl SqliteBarStore {
    /// 파일 DB에 연결하고 스키마를 생성합니다.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!(path = %config.path.display(), "SQLite 저장소 연결");
        Self::with_pool(pool).await
    }

    /// 메모리 DB를 생성합니다. 연결이 끊기면 데이터가 사라지므로 연결 하나를 유지합니다.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            write_locks: Arc::new(RwLock::new(HashMap::new())),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DataError::MigrationError(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 동시성 제어를 위한 Lock 획득 또는 생성.
    async fn get_or_create_lock(&self, key: &str) -> Arc<RwLock<()>> {
        let locks = self.write_locks.read().await;
        if let Some(lock) = locks.get(key) {
            return lock.clone();
        }
        drop(locks);

        let mut locks = self.write_locks.write().await;
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

/// 저장 가능한 캔들과 거부 건수로 나눕니다. 거래량은 INTEGER로 변환해 둡니다.
fn partition_bars<'a>(instrument: &Instrument, bars: &'a [Bar]) -> (Vec<(&'a Bar, i64)>, usize) {
    let mut accepted = Vec::with_capacity(bars.len());
    let mut rejected = 0;

    for bar in bars {
        if bar.symbol != instrument.symbol {
            debug!(
                symbol = %instrument.symbol,
                bar_symbol = %bar.symbol,
                date = %bar.date,
                "다른 종목의 캔들 거부"
            );
            rejected += 1;
            continue;
        }
        if let Err(defect) = bar.validate() {
            debug!(symbol = %bar.symbol, date = %bar.date, %defect, "불량 캔들 거부");
            rejected += 1;
            continue;
        }
        match i64::try_from(bar.volume) {
            Ok(volume) => accepted.push((bar, volume)),
            Err(_) => {
                debug!(symbol = %bar.symbol, date = %bar.date, volume = bar.volume, "거래량 범위 초과");
                rejected += 1;
            }
        }
    }

    (accepted, rejected)
}

fn parse_date_column(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| DataError::InvalidData(format!("날짜 형식 오류: {} - {}", s, e)))
        })
        .transpose()
}

#[async_trait]
impl TimeSeriesStore for SqliteBarStore {
    #[instrument(
        skip(self, instrument, bars),
        fields(symbol = %instrument.symbol, count = bars.len())
    )]
    async fn upsert(&self, instrument: &Instrument, bars: &[Bar]) -> Result<UpsertReport> {
        let (accepted, rejected) = partition_bars(instrument, bars);
        if rejected > 0 {
            warn!(symbol = %instrument.symbol, rejected, "불량 캔들 제외");
        }
        if accepted.is_empty() {
            return Ok(UpsertReport {
                rejected,
                ..Default::default()
            });
        }

        let lock = self.get_or_create_lock(&instrument.symbol).await;
        let _guard = lock.write().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        for chunk in accepted.chunks(UPSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO bars (symbol, trade_date, open, high, low, close, volume, amount) ",
            );
            builder.push_values(chunk, |mut row, (bar, volume)| {
                row.push_bind(bar.symbol.clone())
                    .push_bind(bar.date)
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(*volume)
                    .push_bind(bar.amount);
            });
            builder.push(
                r#"
                ON CONFLICT (symbol, trade_date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    amount = excluded.amount
                "#,
            );

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| DataError::InsertError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

        let span = DateSpan::of(accepted.iter().map(|(bar, _)| bar.date));
        debug!(symbol = %instrument.symbol, written = accepted.len(), "일봉 저장");

        Ok(UpsertReport {
            written: accepted.len(),
            rejected,
            first_date: span.map(|s| s.first),
            last_date: span.map(|s| s.last),
        })
    }

    async fn query(&self, symbol: &str, range: DateRange) -> Result<Vec<Bar>> {
        let rows: Vec<BarRow> = sqlx::query_as(
            r#"
            SELECT symbol, trade_date, open, high, low, close, volume, amount
            FROM bars
            WHERE symbol = ?
              AND (? IS NULL OR trade_date >= ?)
              AND (? IS NULL OR trade_date <= ?)
            ORDER BY trade_date ASC
            "#,
        )
        .bind(symbol)
        .bind(range.start)
        .bind(range.start)
        .bind(range.end)
        .bind(range.end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BarRow::into_bar).collect())
    }

    async fn summary(&self) -> Result<StoreSummary> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT symbol) AS instrument_count,
                   COUNT(*) AS row_count,
                   MIN(trade_date) AS first_date,
                   MAX(trade_date) AS last_date
            FROM bars
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let instrument_count: i64 = row.try_get("instrument_count")?;
        let row_count: i64 = row.try_get("row_count")?;

        Ok(StoreSummary {
            instrument_count: instrument_count.max(0) as u64,
            row_count: row_count.max(0) as u64,
            first_date: parse_date_column(row.try_get("first_date")?)?,
            last_date: parse_date_column(row.try_get("last_date")?)?,
        })
    }

    async fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize> {
        if instruments.is_empty() {
            return Ok(0);
        }

        let refreshed_at = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        for chunk in instruments.chunks(UPSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO instruments (symbol, name, market, refreshed_at) ");
            builder.push_values(chunk, |mut row, instrument| {
                row.push_bind(instrument.symbol.clone())
                    .push_bind(instrument.name.clone())
                    .push_bind(instrument.market.as_str())
                    .push_bind(refreshed_at);
            });
            builder.push(
                r#"
                ON CONFLICT (symbol) DO UPDATE SET
                    name = excluded.name,
                    market = excluded.market,
                    refreshed_at = excluded.refreshed_at
                "#,
            );

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| DataError::InsertError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| DataError::InsertError(e.to_string()))?;

        info!(count = instruments.len(), "종목 정보 갱신");
        Ok(instruments.len())
    }

    async fn instruments(&self) -> Result<Vec<Instrument>> {
        let rows = sqlx::query("SELECT symbol, name, market FROM instruments ORDER BY symbol")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_instrument).collect()
    }

    async fn search_instruments(&self, keyword: &str) -> Result<Vec<Instrument>> {
        let pattern = format!("%{}%", keyword.trim());
        let rows = sqlx::query(
            r#"
            SELECT symbol, name, market FROM instruments
            WHERE symbol LIKE ? OR name LIKE ?
            ORDER BY symbol
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_instrument).collect()
    }

    async fn bar_symbols(&self) -> Result<Vec<String>> {
        let symbols: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT symbol FROM bars ORDER BY symbol")
                .fetch_all(&self.pool)
                .await?;
        Ok(symbols)
    }

    async fn market_breakdown(&self) -> Result<Vec<MarketCount>> {
        let rows = sqlx::query(
            r#"
            SELECT COALESCE(i.market, 'unknown') AS market,
                   COUNT(DISTINCT b.symbol) AS instrument_count,
                   COUNT(*) AS row_count
            FROM bars b
            LEFT JOIN instruments i ON i.symbol = b.symbol
            GROUP BY COALESCE(i.market, 'unknown')
            ORDER BY instrument_count DESC, market ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let market: String = row.try_get("market")?;
                let instruments: i64 = row.try_get("instrument_count")?;
                let rows: i64 = row.try_get("row_count")?;
                Ok(MarketCount {
                    market: market.parse().unwrap_or(Market::Unknown),
                    instruments: instruments.max(0) as u64,
                    rows: rows.max(0) as u64,
                })
            })
            .collect()
    }

    async fn clear_bars(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM bars")
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;

        warn!(deleted = result.rows_affected(), "모든 일봉 삭제");
        Ok(result.rows_affected())
    }
}

fn row_to_instrument(row: &sqlx::sqlite::SqliteRow) -> Result<Instrument> {
    let symbol: String = row.try_get("symbol")?;
    let name: String = row.try_get("name")?;
    let market: String = row.try_get("market")?;
    let market = market
        .parse()
        .unwrap_or_else(|_| Market::classify(&symbol));

    Ok(Instrument {
        symbol,
        name,
        market,
    })
}
