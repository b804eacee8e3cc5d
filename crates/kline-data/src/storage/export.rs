//! 저장된 일봉을 CSV로 내보냅니다.
//!
//! - 단일 파일: `all_a_share_klines_<yyyymmdd>.csv`
//! - 종목별 분할: `<code>_<exchange>.csv`

use super::TimeSeriesStore;
use crate::error::Result;
use chrono::Local;
use kline_core::{Bar, DateRange};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const CSV_HEADER: &str = "symbol,date,open,high,low,close,volume,amount";

/// 내보내기 결과.
#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    /// 생성된 파일
    pub files: Vec<PathBuf>,
    /// 기록된 행 수
    pub rows: usize,
}

/// 저장소의 모든 일봉을 `dir` 아래에 CSV로 씁니다.
///
/// `split`이면 종목별 파일, 아니면 단일 파일입니다. 일봉이 없으면 파일을 만들지 않습니다.
pub async fn export_csv(
    store: &dyn TimeSeriesStore,
    dir: &Path,
    split: bool,
) -> Result<ExportReport> {
    let symbols = store.bar_symbols().await?;
    let mut report = ExportReport::default();
    if symbols.is_empty() {
        info!("내보낼 일봉 없음");
        return Ok(report);
    }

    std::fs::create_dir_all(dir)?;

    if split {
        for symbol in &symbols {
            let bars = store.query(symbol, DateRange::all()).await?;
            let path = dir.join(format!("{}.csv", symbol.replace('.', "_")));
            let mut writer = create_writer(&path)?;
            report.rows += write_bars(&mut writer, &bars)?;
            writer.flush()?;
            report.files.push(path);
        }
    } else {
        let file_name = format!("all_a_share_klines_{}.csv", Local::now().format("%Y%m%d"));
        let path = dir.join(file_name);
        let mut writer = create_writer(&path)?;
        for symbol in &symbols {
            let bars = store.query(symbol, DateRange::all()).await?;
            report.rows += write_bars(&mut writer, &bars)?;
        }
        writer.flush()?;
        report.files.push(path);
    }

    info!(
        files = report.files.len(),
        rows = report.rows,
        dir = %dir.display(),
        "CSV 내보내기 완료"
    );
    Ok(report)
}

fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", CSV_HEADER)?;
    Ok(writer)
}

fn write_bars<W: Write>(writer: &mut W, bars: &[Bar]) -> Result<usize> {
    for bar in bars {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{}",
            bar.symbol,
            bar.date,
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.amount.map(|a| a.to_string()).unwrap_or_default()
        )?;
    }
    Ok(bars.len())
}
