pub mod extract;
pub mod monitor;
pub mod queue;
pub mod sink_writer;
pub mod worker;

pub use crate::domain::model::{CycleReport, MonitorState, MonitorStatus, Record, Target};
pub use crate::domain::ports::{CompanyResolver, PageFetcher, RecordSink, TargetSource};
pub use crate::utils::error::Result;
pub use extract::Extractor;
pub use monitor::{ContinuousMonitor, MonitorControl, MonitorSettings};
pub use queue::{FailureLog, RescrapePolicy, TargetQueue};
pub use sink_writer::{SinkLayout, SinkWriter};
pub use worker::{FetchExtractWorker, RetryPolicy};
