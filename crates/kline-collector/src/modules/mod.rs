//! 일봉 수집 모듈.

pub mod checkpoint;
pub mod instrument_sync;
pub mod orchestrator;
pub mod worker_pool;

pub use checkpoint::{
    AcquisitionCheckpoint, CheckpointCounts, CheckpointEntry, CheckpointError, CheckpointTracker,
    EntryStatus,
};
pub use instrument_sync::{resolve_codes, sync_instruments};
pub use orchestrator::{AcquisitionSettings, BatchOrchestrator};
pub use worker_pool::{FetchOutcome, FetchWorkerPool, InstrumentOutcome, PoolReport, PoolSettings};
