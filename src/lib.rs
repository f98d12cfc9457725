pub mod config;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod source;
pub mod store;
pub mod tracker;
pub mod types;

pub mod kafka;
pub mod postgres;
pub mod sink;

pub use config::Config;
pub use error::{Error, Result};
pub use extractor::{TableExtractor, TrackedRows};
pub use orchestrator::{RunReport, RunResult, RunStatus, SyncOrchestrator, SyncSettings, TableState, TableStatus};
pub use sink::SinkWriter;
pub use source::{RowStream, SourceReader};
pub use store::WatermarkStore;
pub use tracker::CursorTracker;
pub use types::{CursorValue, Row, TableSpec, Watermark, WatermarkKey};
