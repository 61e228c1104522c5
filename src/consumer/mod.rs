//! Consumer pipeline - bounded in-process retry with handoff to the
//! failure outbox.

mod pipeline;
mod retry;
mod worker;

pub use pipeline::{ConsumerPipeline, Disposition, EventHandler, HandlerError, PipelineError};
pub use retry::{Backoff, RetryPolicy};
pub use worker::{ConsumerWorkerThread, WorkerStats};
