//! A주 일봉 수집기 CLI.

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use kline_collector::modules::CheckpointTracker;
use kline_collector::{sources, AcquisitionSettings, BatchOrchestrator, CollectorConfig};
use kline_core::{init_logging, DateRange, LogConfig, LogFormat};
use kline_data::{export_csv, SqliteBarStore, TimeSeriesStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kline-collector")]
#[command(about = "A-share daily kline batch collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error). 없으면 `RUST_LOG`
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact). 없으면 `LOG_FORMAT`
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// span 진입/종료 이벤트 출력
    #[arg(long, global = true)]
    log_spans: bool,

    /// 스레드 ID 출력
    #[arg(long, global = true)]
    log_thread_ids: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// 전체 종목 일봉 수집 (중단 지점부터 재개)
    Collect {
        /// 특정 종목만 수집 (쉼표로 구분, 예: "600000,000001")
        #[arg(long)]
        symbols: Option<String>,

        /// 주요 지수만 수집 (上证指数, 深证成指 등)
        #[arg(long, conflicts_with = "symbols")]
        indices: bool,

        /// 체크포인트를 지우고 처음부터 수집
        #[arg(long)]
        fresh: bool,
    },

    /// 체크포인트와 저장소 현황 출력
    Status,

    /// 체크포인트 초기화
    ClearCheckpoint,

    /// 종목 일봉 조회
    Query {
        /// 종목 코드 (예: 600000.SH 또는 600000)
        #[arg(long)]
        symbol: String,

        /// 시작일 (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// 종료일 (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// 종목 검색 (코드 또는 이름)
    Search { keyword: String },

    /// CSV 내보내기
    Export {
        /// 출력 디렉토리
        #[arg(long, default_value = "output/kline_data")]
        output: PathBuf,

        /// 종목별 파일로 분할
        #[arg(long)]
        split: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 로깅 초기화 (CLI 인자가 환경 변수보다 우선)
    let mut log_config = LogConfig::from_env();
    if let Some(level) = &cli.log_level {
        log_config.level = format!(
            "kline_collector={level},kline_data={level},kline_core={level}",
            level = level
        );
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    if cli.log_spans {
        log_config = log_config.with_span_events(true);
    }
    if cli.log_thread_ids {
        log_config = log_config.with_thread_ids(true);
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    tracing::info!("A주 일봉 수집기 시작");

    // 설정 로드
    let config = CollectorConfig::from_env()?;
    tracing::debug!(
        db_path = %config.db_path.display(),
        checkpoint_path = %config.checkpoint_path.display(),
        "설정 로드 완료"
    );

    // 저장소 연결
    let store = Arc::new(
        SqliteBarStore::connect(&config.store_config())
            .await
            .with_context(|| format!("저장소 연결 실패: {}", config.db_path.display()))?,
    );
    tracing::info!("저장소 연결 성공");

    let result = run_command(cli.command, &config, store.clone()).await;

    store.close().await;
    tracing::info!("A주 일봉 수집기 종료");

    result
}

async fn run_command(
    command: Commands,
    config: &CollectorConfig,
    store: Arc<SqliteBarStore>,
) -> anyhow::Result<()> {
    match command {
        Commands::Collect {
            symbols,
            indices,
            fresh,
        } => {
            let checkpoint =
                Arc::new(CheckpointTracker::load_or_empty(&config.checkpoint_path).await?);
            if fresh {
                tracing::info!("체크포인트 초기화 후 수집");
                checkpoint.clear();
                checkpoint.persist().await?;
            }

            let mut settings = AcquisitionSettings::from(&config.acquisition);
            let universe = if indices {
                settings.start_date = config.index_start_date;
                tracing::info!(start_date = %settings.start_date, "주요 지수 수집");
                sources::index_universe()
            } else {
                let codes = symbols.as_deref().map(sources::parse_symbol_list);
                let known = if codes.is_some() {
                    store.instruments().await?
                } else {
                    Vec::new()
                };
                sources::build_universe(config, codes.as_deref(), &known)?
            };
            let source = sources::build_source(config)?;

            let orchestrator =
                BatchOrchestrator::new(universe, source, store, checkpoint, settings);

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("종료 신호 수신, 진행 중인 배치 정리 후 종료합니다");
                    trigger.cancel();
                }
            });

            let summary = orchestrator.run(cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.cancelled {
                tracing::warn!("수집이 중단되었습니다. 다시 실행하면 이어서 수집합니다");
            }
        }
        Commands::Status => {
            let checkpoint = CheckpointTracker::load_or_empty(&config.checkpoint_path).await?;
            let counts = checkpoint.counts();
            let last_updated = checkpoint.snapshot().last_updated;

            println!("체크포인트: {}", config.checkpoint_path.display());
            println!(
                "  전체 {} / 성공 {} / 실패 {} / 대기 {}",
                counts.total(),
                counts.succeeded,
                counts.failed,
                counts.pending
            );
            if let Some(ts) = last_updated {
                println!("  마지막 저장: {}", ts.to_rfc3339());
            }

            let summary = store.summary().await?;
            println!("저장소: {}", config.db_path.display());
            println!(
                "  종목 {} / 일봉 {}",
                summary.instrument_count, summary.row_count
            );
            if let (Some(first), Some(last)) = (summary.first_date, summary.last_date) {
                println!("  기간 {} ~ {}", first, last);
            }
            for row in store.market_breakdown().await? {
                println!(
                    "  {:<8} 종목 {:>5} / 일봉 {:>10}",
                    row.market.display_name(),
                    row.instruments,
                    row.rows
                );
            }
        }
        Commands::ClearCheckpoint => {
            let checkpoint = CheckpointTracker::load_or_empty(&config.checkpoint_path).await?;
            let before = checkpoint.counts().total();
            checkpoint.clear();
            checkpoint.persist().await?;
            tracing::info!(cleared = before, "체크포인트 초기화 완료");
        }
        Commands::Query { symbol, from, to } => {
            let symbol = kline_core::normalize_symbol(&symbol)
                .with_context(|| format!("알 수 없는 종목 코드: {}", symbol))?;
            let bars = store.query(&symbol, DateRange { start: from, end: to }).await?;

            println!("date,open,high,low,close,volume,amount");
            for bar in &bars {
                println!(
                    "{},{},{},{},{},{},{}",
                    bar.date,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.amount.map(|a| a.to_string()).unwrap_or_default()
                );
            }
            tracing::info!(symbol = %symbol, rows = bars.len(), "일봉 조회 완료");
        }
        Commands::Search { keyword } => {
            let found = store.search_instruments(&keyword).await?;
            for instrument in &found {
                println!(
                    "{}\t{}\t{}",
                    instrument.symbol,
                    instrument.name,
                    instrument.market.display_name()
                );
            }
            tracing::info!(keyword = %keyword, found = found.len(), "종목 검색 완료");
        }
        Commands::Export { output, split } => {
            let report = export_csv(store.as_ref(), &output, split).await?;
            for file in &report.files {
                println!("{}", file.display());
            }
            tracing::info!(files = report.files.len(), rows = report.rows, "CSV 내보내기 완료");
        }
    }

    Ok(())
}
