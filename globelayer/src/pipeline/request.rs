//! Asynchronous imagery request pipeline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── frame driver ─────────────────────────┐
//! │                                                               │
//! │  ImageryLayer ──issue()──► RequestPipeline ──spawn──┐         │
//! │       ▲                        │  in_flight map     │         │
//! │       │                        │  (token per tile)  │         │
//! │  apply completion ◄── try_next()/next() ◄─┐         │         │
//! └───────────────────────────────────────────┼─────────┼─────────┘
//!                                             │         ▼
//!                                    mpsc ◄── tokio task: select!
//!                                             { cancelled, fetch }
//! ```
//!
//! Fetches run on tokio tasks and never touch imagery state. Their outcome
//! is sent back over a channel and applied by the layer on the frame-driver
//! thread. Cancellation is an outcome of its own, not an error.

use std::collections::HashMap;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::imagery::ImageryHandle;
use crate::provider::{DecodedImage, ImageFuture, ProviderError};

/// Result of one fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    Image(DecodedImage),
    Failed(ProviderError),
    /// The request was cancelled before it finished. Never an error.
    Cancelled,
}

/// A finished fetch, ready to be applied on the frame-driver thread.
#[derive(Debug)]
pub struct Completion {
    pub handle: ImageryHandle,
    pub outcome: FetchOutcome,
    /// Issue this completion belongs to; a newer issue supersedes it.
    sequence: u64,
}

/// Token and issue number of the request currently tracked for an imagery.
struct InFlight {
    token: CancellationToken,
    sequence: u64,
}

/// Pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub issued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub throttled: u64,
    /// Completions that arrived for imagery evicted in the meantime.
    pub dropped: u64,
}

/// Issues fetches and collects their completions.
pub struct RequestPipeline {
    runtime: Handle,
    sender: mpsc::UnboundedSender<Completion>,
    receiver: mpsc::UnboundedReceiver<Completion>,
    in_flight: HashMap<ImageryHandle, InFlight>,
    next_sequence: u64,
    retries: HashMap<ImageryHandle, u32>,
    max_in_flight: usize,
    stats: PipelineStats,
}

impl RequestPipeline {
    pub fn new(runtime: Handle, max_in_flight: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            runtime,
            sender,
            receiver,
            in_flight: HashMap::new(),
            next_sequence: 0,
            retries: HashMap::new(),
            max_in_flight: max_in_flight.max(1),
            stats: PipelineStats::default(),
        }
    }

    /// Whether another request may be issued this frame.
    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max_in_flight
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, handle: ImageryHandle) -> bool {
        self.in_flight.contains_key(&handle)
    }

    /// Count a request declined for lack of capacity.
    pub fn record_throttled(&mut self) {
        self.stats.throttled += 1;
    }

    /// Spawn `fetch` for `handle`, optionally after `delay`.
    ///
    /// A request still tracked for `handle` is cancelled and its completion
    /// dropped when it arrives.
    pub fn issue(&mut self, handle: ImageryHandle, fetch: ImageFuture, delay: Option<Duration>) {
        let token = CancellationToken::new();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let tracked = InFlight {
            token: token.clone(),
            sequence,
        };
        if let Some(previous) = self.in_flight.insert(handle, tracked) {
            previous.token.cancel();
        }
        self.stats.issued += 1;

        let sender = self.sender.clone();
        self.runtime.spawn(async move {
            let outcome = run_fetch(fetch, delay, token).await;
            // The receiver only goes away with the layer.
            let _ = sender.send(Completion {
                handle,
                outcome,
                sequence,
            });
        });
    }

    /// Cancel an in-flight request. Its completion arrives as `Cancelled`.
    pub fn cancel(&mut self, handle: ImageryHandle) -> bool {
        match self.in_flight.get(&handle) {
            Some(tracked) => {
                tracked.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and untrack every request for an evicted imagery. A completion
    /// that still arrives for it is dropped.
    pub fn forget(&mut self, handle: ImageryHandle) {
        if let Some(tracked) = self.in_flight.remove(&handle) {
            trace!("Cancelling request for evicted imagery");
            tracked.token.cancel();
        }
        self.retries.remove(&handle);
    }

    /// Cancel everything in flight.
    pub fn cancel_all(&mut self) {
        for tracked in self.in_flight.values() {
            tracked.token.cancel();
        }
    }

    /// Next completion without waiting.
    pub fn try_next(&mut self) -> Option<Completion> {
        while let Ok(completion) = self.receiver.try_recv() {
            if let Some(completion) = self.accept(completion) {
                return Some(completion);
            }
        }
        None
    }

    /// Wait for the next completion. Returns `None` when nothing is in flight.
    pub async fn next(&mut self) -> Option<Completion> {
        while !self.in_flight.is_empty() {
            let completion = self.receiver.recv().await?;
            if let Some(completion) = self.accept(completion) {
                return Some(completion);
            }
        }
        None
    }

    /// Retries made so far for `handle`.
    pub fn retries(&self, handle: ImageryHandle) -> u32 {
        self.retries.get(&handle).copied().unwrap_or(0)
    }

    pub fn record_retry(&mut self, handle: ImageryHandle) {
        *self.retries.entry(handle).or_insert(0) += 1;
        self.stats.retried += 1;
    }

    pub fn reset_retries(&mut self, handle: ImageryHandle) {
        self.retries.remove(&handle);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    fn accept(&mut self, completion: Completion) -> Option<Completion> {
        match self.in_flight.get(&completion.handle) {
            Some(tracked) if tracked.sequence == completion.sequence => {
                self.in_flight.remove(&completion.handle);
            }
            Some(_) => {
                trace!("Dropping completion of a superseded request");
                self.stats.dropped += 1;
                return None;
            }
            None => {
                debug!("Dropping completion for evicted imagery");
                self.stats.dropped += 1;
                return None;
            }
        }
        match completion.outcome {
            FetchOutcome::Image(_) => self.stats.succeeded += 1,
            FetchOutcome::Failed(_) => self.stats.failed += 1,
            FetchOutcome::Cancelled => self.stats.cancelled += 1,
        }
        Some(completion)
    }
}

async fn run_fetch(
    fetch: ImageFuture,
    delay: Option<Duration>,
    token: CancellationToken,
) -> FetchOutcome {
    if let Some(delay) = delay {
        tokio::select! {
            biased;
            _ = token.cancelled() => return FetchOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => FetchOutcome::Cancelled,
        result = fetch => match result {
            Ok(image) => FetchOutcome::Image(image),
            Err(error) => FetchOutcome::Failed(error),
        },
    }
}
