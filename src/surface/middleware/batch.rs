//! Batching middleware
//!
//! Collects inbound requests for up to a window (or a maximum batch size),
//! executes the batch concurrently, and answers each submitter with its own
//! response in order. One request's failure is its own envelope; the batch
//! never fails as a unit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WeaverError};
use crate::surface::types::{ToolRequest, ToolResponse};
use crate::surface::Dispatcher;

type Submission = (ToolRequest, oneshot::Sender<ToolResponse>);

/// Handle to the batching loop
pub struct Batcher {
    queue: mpsc::UnboundedSender<Submission>,
}

impl Batcher {
    /// Start the collector task.
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        window: Duration,
        max_batch: usize,
        cancel: &CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(collect_loop(
            dispatcher,
            rx,
            window,
            max_batch.max(1),
            cancel.child_token(),
        ));
        Self { queue: tx }
    }

    /// Enqueue one request and await its response.
    pub async fn submit(&self, request: ToolRequest) -> Result<ToolResponse> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send((request, tx))
            .map_err(|_| WeaverError::internal("batcher is shut down"))?;
        rx.await
            .map_err(|_| WeaverError::internal("batcher dropped the request"))
    }
}

async fn collect_loop(
    dispatcher: Arc<Dispatcher>,
    mut rx: mpsc::UnboundedReceiver<Submission>,
    window: Duration,
    max_batch: usize,
    cancel: CancellationToken,
) {
    loop {
        // Wait for the batch opener.
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            submission = rx.recv() => match submission {
                Some(s) => s,
                None => break,
            },
        };

        let mut batch = vec![first];
        let deadline = tokio::time::Instant::now() + window;
        while batch.len() < max_batch {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                submission = rx.recv() => match submission {
                    Some(s) => batch.push(s),
                    None => break,
                },
            }
        }

        let (requests, channels): (Vec<ToolRequest>, Vec<oneshot::Sender<ToolResponse>>) =
            batch.into_iter().unzip();
        tracing::debug!(size = requests.len(), "dispatching request batch");
        let responses = dispatcher.dispatch_batch(requests).await;
        for (response, channel) in responses.into_iter().zip(channels) {
            // A submitter that gave up is its own problem.
            let _ = channel.send(response);
        }
    }

    // Drain stragglers with individual dispatches so nothing hangs.
    while let Ok((request, channel)) = rx.try_recv() {
        let response = dispatcher.dispatch(request).await;
        let _ = channel.send(response);
    }
}
