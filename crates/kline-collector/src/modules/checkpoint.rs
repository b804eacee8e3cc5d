//! 수집 체크포인트 관리 모듈.
//!
//! 장시간 실행되는 배치 수집의 중단/재개를 지원합니다.
//!
//! # 주요 기능
//!
//! - **종목별 상태**: pending / succeeded / failed (+ 실패 분류)
//! - **중단점 재개**: `is_done`이 참인 종목은 다시 조회하지 않음
//! - **원자적 저장**: 임시 파일에 쓰고 fsync 후 rename, 실패 시 임시 파일 제거
//!
//! # 사용 예
//!
//! ```rust,ignore
//! let tracker = CheckpointTracker::load_or_empty("output/kline_data/download_progress.json").await?;
//!
//! // 처리 중
//! tracker.mark_succeeded("600000.SH");
//! tracker.mark_failed("000001.SZ", FailureKind::Network);
//!
//! // 배치 종료 시
//! tracker.persist().await?;
//! ```

use chrono::{DateTime, Utc};
use kline_data::FailureKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// 체크포인트 에러
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 저장된 파일을 해석할 수 없음
    #[error("Corrupt checkpoint {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 종목별 수집 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// 대기 중
    Pending,
    /// 완료 (빈 데이터 포함)
    Succeeded,
    /// 실패 (다음 실행에서 재시도)
    Failed,
}

/// 체크포인트 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub status: EntryStatus,
    /// 실패 분류 (failed일 때만)
    #[serde(default)]
    pub failure: Option<FailureKind>,
}

impl CheckpointEntry {
    fn pending() -> Self {
        Self {
            status: EntryStatus::Pending,
            failure: None,
        }
    }
}

/// 디스크에 저장되는 체크포인트
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionCheckpoint {
    /// 마지막 갱신 시각 (단조 증가)
    pub last_updated: Option<DateTime<Utc>>,
    /// 종목 식별자 → 상태
    #[serde(default)]
    pub entries: BTreeMap<String, CheckpointEntry>,
}

impl AcquisitionCheckpoint {
    fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = Some(self.last_updated.map_or(now, |prev| prev.max(now)));
    }
}

/// 상태별 종목 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointCounts {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl CheckpointCounts {
    pub fn total(&self) -> usize {
        self.pending + self.succeeded + self.failed
    }
}

/// 체크포인트 추적기.
///
/// 상태 변경은 여러 워커에서 동시에 호출될 수 있습니다.
/// `persist`는 배치 경계에서 코디네이터만 호출합니다.
#[derive(Debug)]
pub struct CheckpointTracker {
    path: PathBuf,
    state: Mutex<AcquisitionCheckpoint>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl CheckpointTracker {
    /// 빈 체크포인트로 생성
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_state(path.into(), AcquisitionCheckpoint::default())
    }

    fn with_state(path: PathBuf, state: AcquisitionCheckpoint) -> Self {
        Self {
            path,
            state: Mutex::new(state),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 체크포인트 로드.
    ///
    /// 파일이 없으면 빈 상태, 해석할 수 없으면 `CheckpointError::Corrupt`.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "체크포인트 없음, 새로 시작");
                return Ok(Self::new(path));
            }
            Err(e) => return Err(CheckpointError::Io(e)),
        };

        let state: AcquisitionCheckpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        info!(
            path = %path.display(),
            entries = state.entries.len(),
            last_updated = ?state.last_updated,
            "체크포인트 로드"
        );
        Ok(Self::with_state(path, state))
    }

    /// 체크포인트 로드. 손상된 파일은 경고 후 빈 상태로 시작합니다.
    pub async fn load_or_empty(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        match Self::load(path.clone()).await {
            Err(CheckpointError::Corrupt { path, reason }) => {
                warn!(
                    path = %path.display(),
                    reason = %reason,
                    "체크포인트 손상, 빈 상태로 시작합니다 (기존 파일은 다음 저장 시 덮어씀)"
                );
                Ok(Self::new(path))
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, AcquisitionCheckpoint> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 성공 기록
    pub fn mark_succeeded(&self, id: &str) {
        let mut state = self.lock();
        state.entries.insert(
            id.to_string(),
            CheckpointEntry {
                status: EntryStatus::Succeeded,
                failure: None,
            },
        );
        state.touch();
    }

    /// 실패 기록
    pub fn mark_failed(&self, id: &str, kind: FailureKind) {
        let mut state = self.lock();
        state.entries.insert(
            id.to_string(),
            CheckpointEntry {
                status: EntryStatus::Failed,
                failure: Some(kind),
            },
        );
        state.touch();
    }

    /// 처음 보는 종목을 pending으로 등록합니다. 새로 등록된 수를 반환합니다.
    pub fn register_pending<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = self.lock();
        let mut added = 0;
        for id in ids {
            if !state.entries.contains_key(id) {
                state.entries.insert(id.to_string(), CheckpointEntry::pending());
                added += 1;
            }
        }
        if added > 0 {
            state.touch();
        }
        added
    }

    /// 완료 여부 (succeeded일 때만 참)
    pub fn is_done(&self, id: &str) -> bool {
        self.lock()
            .entries
            .get(id)
            .is_some_and(|e| e.status == EntryStatus::Succeeded)
    }

    pub fn entry(&self, id: &str) -> Option<CheckpointEntry> {
        self.lock().entries.get(id).copied()
    }

    /// 모든 상태 초기화 (명시적 리셋)
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.touch();
    }

    pub fn snapshot(&self) -> AcquisitionCheckpoint {
        self.lock().clone()
    }

    pub fn counts(&self) -> CheckpointCounts {
        let state = self.lock();
        state
            .entries
            .values()
            .fold(CheckpointCounts::default(), |mut counts, entry| {
                match entry.status {
                    EntryStatus::Pending => counts.pending += 1,
                    EntryStatus::Succeeded => counts.succeeded += 1,
                    EntryStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }

    /// 실패 상태인 종목 식별자 (정렬됨)
    pub fn failed_ids(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, e)| e.status == EntryStatus::Failed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 현재 상태를 원자적으로 저장합니다.
    pub async fn persist(&self) -> Result<(), CheckpointError> {
        let _guard = self.persist_lock.lock().await;

        let bytes = {
            let state = self.lock();
            serde_json::to_vec_pretty(&*state)?
        };

        write_atomically(&self.path, &bytes).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "체크포인트 저장");
        Ok(())
    }
}

/// 완료되지 않은 임시 파일을 Drop 시 제거하는 가드.
struct PendingWrite {
    path: PathBuf,
    committed: bool,
}

impl PendingWrite {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "임시 체크포인트 파일 제거 실패");
                }
            }
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = tmp_sibling(path);
    let pending = PendingWrite::new(tmp_path.clone());

    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await?;
    pending.commit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = CheckpointTracker::load(dir.path().join("progress.json"))
            .await
            .unwrap();
        assert_eq!(tracker.counts().total(), 0);
        assert!(tracker.snapshot().last_updated.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, b"{\"entries\": {\"600000.SH\": ").unwrap();

        let err = CheckpointTracker::load(&path).await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));

        let tracker = CheckpointTracker::load_or_empty(&path).await.unwrap();
        assert_eq!(tracker.counts().total(), 0);
        assert_eq!(tracker.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("progress.json");

        let tracker = CheckpointTracker::new(&path);
        assert_eq!(tracker.register_pending(["600000.SH", "000001.SZ", "300750.SZ"]), 3);
        tracker.mark_succeeded("600000.SH");
        tracker.mark_failed("000001.SZ", FailureKind::RateLimited);
        tracker.persist().await.unwrap();

        let reloaded = CheckpointTracker::load(&path).await.unwrap();
        assert!(reloaded.is_done("600000.SH"));
        assert!(!reloaded.is_done("000001.SZ"));
        assert!(!reloaded.is_done("300750.SZ"));
        assert_eq!(
            reloaded.entry("000001.SZ").unwrap().failure,
            Some(FailureKind::RateLimited)
        );
        assert_eq!(
            reloaded.counts(),
            CheckpointCounts {
                pending: 1,
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(reloaded.failed_ids(), vec!["000001.SZ".to_string()]);
        assert!(!tmp_sibling(&path).exists());
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        let tracker = CheckpointTracker::new(&path);
        tracker.mark_failed("000001.SZ", FailureKind::Network);
        tracker.mark_succeeded("600000.SH");
        tracker.persist().await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["last_updated"].is_string());
        assert_eq!(json["entries"]["000001.SZ"]["status"], "failed");
        assert_eq!(json["entries"]["000001.SZ"]["failure"], "network");
        assert_eq!(json["entries"]["600000.SH"]["status"], "succeeded");
        assert!(json["entries"]["600000.SH"]["failure"].is_null());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_tmp_and_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        // 대상 경로가 디렉토리면 rename이 실패함
        let path = dir.path().join("progress.json");
        std::fs::create_dir(&path).unwrap();

        let tracker = CheckpointTracker::new(&path);
        tracker.mark_succeeded("600000.SH");
        assert!(tracker.persist().await.is_err());
        assert!(!tmp_sibling(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_register_pending_keeps_existing_status() {
        let tracker = CheckpointTracker::new("unused.json");
        tracker.mark_succeeded("600000.SH");
        assert_eq!(tracker.register_pending(["600000.SH", "601318.SH"]), 1);
        assert!(tracker.is_done("600000.SH"));
        assert_eq!(tracker.entry("601318.SH").unwrap().status, EntryStatus::Pending);
    }

    #[test]
    fn test_last_updated_is_monotonic() {
        let tracker = CheckpointTracker::new("unused.json");
        tracker.mark_succeeded("a");
        let first = tracker.snapshot().last_updated.unwrap();

        // 미래 시각이 기록되어 있어도 뒤로 가지 않음
        let future = first + chrono::Duration::hours(1);
        tracker.lock().last_updated = Some(future);
        tracker.mark_failed("b", FailureKind::Malformed);
        assert_eq!(tracker.snapshot().last_updated, Some(future));

        tracker.clear();
        assert_eq!(tracker.counts().total(), 0);
        assert!(tracker.snapshot().last_updated.unwrap() >= future);
    }

    #[tokio::test]
    async fn test_concurrent_marks() {
        let tracker = Arc::new(CheckpointTracker::new("unused.json"));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let id = format!("{:06}.SZ", worker * 100 + i);
                    if i % 5 == 0 {
                        tracker.mark_failed(&id, FailureKind::Network);
                    } else {
                        tracker.mark_succeeded(&id);
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let counts = tracker.counts();
        assert_eq!(counts.succeeded, 8 * 40);
        assert_eq!(counts.failed, 8 * 10);
    }
}
