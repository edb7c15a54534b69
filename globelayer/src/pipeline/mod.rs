//! Request pipeline: asynchronous fetches, cancellation and retry.

mod request;
mod retry;

pub use request::{Completion, FetchOutcome, PipelineStats, RequestPipeline};
pub use retry::{
    ErrorReporter, LoggingErrorReporter, RetryDecision, RetryPolicy, RetryPolicyErrorReporter,
    TileProviderError, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS,
    DEFAULT_MAX_DELAY_SECS,
};
