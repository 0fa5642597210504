//! Debounced micro-batching
//!
//! ## Overview
//!
//! A [`MicroBatcher`] owns a coordinator task fed through a channel. The
//! first request opens a debounce window; everything arriving before the
//! window closes (or before `max_batch_size` inputs are pending) is
//! coalesced into a single call to the [`BatchHandler`].
//!
//! ```text
//! submit(a) ─┐
//! submit(b) ─┼─▶ coordinator ──window──▶ handler([a.., b.., c..])
//! submit(c) ─┘                                  │
//!     ▲                                         │
//!     └──────── per-request oneshot slots ◀─────┘
//! ```
//!
//! Each window is dispatched on its own task, so a caller that goes away
//! does not cancel the batch it joined. When the handler fails, every
//! waiting caller receives the same error.

use crate::config::BatchConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Downstream call executed once per batch window.
#[async_trait]
pub trait BatchHandler<I, O>: Send + Sync + 'static {
    /// Must return exactly one output per input, in order.
    async fn handle(&self, inputs: Vec<I>) -> Result<Vec<O>>;
}

struct PendingRequest<I, O> {
    inputs: Vec<I>,
    reply: oneshot::Sender<Result<Vec<O>>>,
}

/// Coalesces concurrent requests into batched handler calls.
pub struct MicroBatcher<I, O> {
    sender: mpsc::UnboundedSender<PendingRequest<I, O>>,
}

impl<I, O> Clone for MicroBatcher<I, O> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<I, O> MicroBatcher<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Start the coordinator task. Must be called within a tokio runtime.
    pub fn spawn<H>(handler: Arc<H>, config: BatchConfig) -> Self
    where
        H: BatchHandler<I, O>,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_coordinator(handler, config, receiver));
        Self { sender }
    }

    /// Submit inputs and wait for their slice of the batched result.
    pub async fn submit(&self, inputs: Vec<I>) -> Result<Vec<O>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let (reply, response) = oneshot::channel();
        self.sender
            .send(PendingRequest { inputs, reply })
            .map_err(|_| Error::BatcherClosed)?;
        response.await.map_err(|_| Error::BatcherClosed)?
    }
}

async fn run_coordinator<I, O, H>(
    handler: Arc<H>,
    config: BatchConfig,
    mut receiver: mpsc::UnboundedReceiver<PendingRequest<I, O>>,
) where
    I: Send + 'static,
    O: Send + 'static,
    H: BatchHandler<I, O>,
{
    while let Some(first) = receiver.recv().await {
        let deadline = Instant::now() + config.debounce();
        let mut pending_inputs = first.inputs.len();
        let mut window = vec![first];

        while pending_inputs < config.max_batch_size {
            match tokio::time::timeout_at(deadline, receiver.recv()).await {
                Ok(Some(request)) => {
                    pending_inputs += request.inputs.len();
                    window.push(request);
                }
                // channel closed or window elapsed
                Ok(None) | Err(_) => break,
            }
        }

        debug!(
            requests = window.len(),
            inputs = pending_inputs,
            "dispatching batch window"
        );
        tokio::spawn(dispatch(handler.clone(), window));
    }
}

async fn dispatch<I, O, H>(handler: Arc<H>, window: Vec<PendingRequest<I, O>>)
where
    H: BatchHandler<I, O>,
{
    let mut replies = Vec::with_capacity(window.len());
    let mut inputs = Vec::new();
    for request in window {
        replies.push((request.inputs.len(), request.reply));
        inputs.extend(request.inputs);
    }
    let expected = inputs.len();

    let outcome = handler.handle(inputs).await.and_then(|outputs| {
        if outputs.len() == expected {
            Ok(outputs)
        } else {
            Err(Error::InvalidDimension {
                expected,
                actual: outputs.len(),
            })
        }
    });

    match outcome {
        Ok(outputs) => {
            let mut outputs = outputs.into_iter();
            for (count, reply) in replies {
                let slice: Vec<O> = outputs.by_ref().take(count).collect();
                // the caller may have gone away; its inputs still took part
                let _ = reply.send(Ok(slice));
            }
        }
        Err(err) => {
            warn!(error = %err, callers = replies.len(), "batched call failed");
            for (_, reply) in replies {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BatchHandler<i32, i32> for Doubler {
        async fn handle(&self, inputs: Vec<i32>) -> Result<Vec<i32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs.into_iter().map(|x| x * 2).collect())
        }
    }

    struct Failing;

    #[async_trait]
    impl BatchHandler<i32, i32> for Failing {
        async fn handle(&self, _inputs: Vec<i32>) -> Result<Vec<i32>> {
            Err(Error::ProviderUnavailable("offline".into()))
        }
    }

    fn window(debounce_ms: u64) -> BatchConfig {
        BatchConfig {
            debounce_ms,
            max_batch_size: 1_000,
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_coalesce() {
        let handler = Arc::new(Doubler {
            calls: AtomicUsize::new(0),
        });
        let batcher = MicroBatcher::spawn(handler.clone(), window(50));

        let (a, b) = tokio::join!(batcher.submit(vec![1, 2]), batcher.submit(vec![3]));
        assert_eq!(a.unwrap(), vec![2, 4]);
        assert_eq!(b.unwrap(), vec![6]);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_fans_out() {
        let batcher = MicroBatcher::spawn(Arc::new(Failing), window(20));
        let (a, b) = tokio::join!(batcher.submit(vec![1]), batcher.submit(vec![2]));
        assert_eq!(a, Err(Error::ProviderUnavailable("offline".into())));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel_batch() {
        let handler = Arc::new(Doubler {
            calls: AtomicUsize::new(0),
        });
        let batcher = MicroBatcher::spawn(handler.clone(), window(30));

        let abandoned = {
            let batcher = batcher.clone();
            tokio::spawn(async move { batcher.submit(vec![10]).await })
        };
        tokio::task::yield_now().await;
        abandoned.abort();

        let kept = batcher.submit(vec![5]).await.unwrap();
        assert_eq!(kept, vec![10]);
        assert!(handler.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_submit_short_circuits() {
        let handler = Arc::new(Doubler {
            calls: AtomicUsize::new(0),
        });
        let batcher = MicroBatcher::spawn(handler.clone(), window(5));
        assert!(batcher.submit(Vec::new()).await.unwrap().is_empty());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
