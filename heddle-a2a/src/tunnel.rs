//! Event tunnel: a single-producer, single-consumer batch coalescer.
//!
//! Buffers streaming deltas and hands them to the consumer when the batch
//! fills, when the flush interval elapses from the first buffered event, or
//! when the producer closes. Order is the production order, within and
//! across batches.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error type for tunnel runs.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("batch_size must be >= 1")]
    InvalidBatchSize,
    #[error("flush_interval must be > 0")]
    InvalidFlushInterval,
    #[error("consumer: {0}")]
    Consumer(String),
    #[error("cancelled")]
    Cancelled,
}

/// Runs the tunnel until the producer closes, the consumer stops it, or the
/// cancellation token fires.
///
/// The consumer returns `Ok(true)` to continue, `Ok(false)` to stop cleanly;
/// an error stops the tunnel and is returned. On cancellation the tunnel
/// stops without a final flush and returns [`TunnelError::Cancelled`].
///
/// **Interaction**: The streaming processor feeds the runner's event channel
/// through this into artifact-update frames.
pub async fn run_tunnel<T, C, Fut>(
    mut source: mpsc::Receiver<T>,
    batch_size: usize,
    flush_interval: Duration,
    cancel: Option<CancellationToken>,
    mut consume: C,
) -> Result<(), TunnelError>
where
    T: Send,
    C: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<bool, TunnelError>>,
{
    if batch_size == 0 {
        return Err(TunnelError::InvalidBatchSize);
    }
    if flush_interval.is_zero() {
        return Err(TunnelError::InvalidFlushInterval);
    }
    // A default token never fires; it keeps the select arms uniform.
    let cancel = cancel.unwrap_or_default();

    let mut batch: Vec<T> = Vec::with_capacity(batch_size);
    let mut deadline: Option<Instant> = None;

    loop {
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + flush_interval);
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(TunnelError::Cancelled);
            }
            produced = source.recv() => match produced {
                Some(event) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + flush_interval);
                    }
                    batch.push(event);
                    if batch.len() >= batch_size {
                        if !consume(std::mem::take(&mut batch)).await? {
                            return Ok(());
                        }
                        deadline = None;
                    }
                }
                None => {
                    // Producer closed: final flush of whatever is buffered.
                    if !batch.is_empty() {
                        consume(std::mem::take(&mut batch)).await?;
                    }
                    return Ok(());
                }
            },
            _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                if !batch.is_empty() {
                    if !consume(std::mem::take(&mut batch)).await? {
                        return Ok(());
                    }
                }
                deadline = None;
            }
        }
    }
}
