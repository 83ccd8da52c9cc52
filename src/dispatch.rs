//! Generic fan-out/fan-in executor for bulk remote queries.
//!
//! [`ChunkDispatcher`] splits an ordered input into fixed-size chunks, runs
//! one concurrent task per chunk, and funnels results back through a single
//! serialized aggregation callback:
//! - Async execution via `tokio` (`JoinSet`, one task per chunk)
//! - Optional in-flight cap via `tokio::sync::Semaphore`
//! - First error wins; siblings observe cancellation cooperatively
//! - Panics inside a chunk task are converted to ordinary errors

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};

/// Boxed error type crossing the collaborator boundary, as produced by
/// `work` and `on_chunk_done` callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by [`ChunkDispatcher::run`].
///
/// Only the first failure observed across the whole dispatch is returned;
/// later failures are dropped (a partial bulk query is not salvageable).
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    /// A chunk's work callback returned an error
    #[error("Chunk {chunk} failed: {message}")]
    ChunkFailed { chunk: usize, message: String },

    /// A chunk's work panicked; caught per task
    #[error("Chunk task panicked: {message}")]
    ChunkPanicked { message: String },

    /// The aggregation callback rejected a chunk's result
    #[error("Aggregation of chunk {chunk} failed: {message}")]
    AggregationFailed { chunk: usize, message: String },
}

/// Fan-out/fan-in executor used by every bulk network operation
/// (vulnerability lookup, remote-override lookup, artifact download).
///
/// # Contract
///
/// - `chunk_size == 0` means "treat the whole input as one chunk": exactly
///   one worker invocation, even for empty input.
/// - Chunks are contiguous and order-preserving; the last may be shorter.
/// - `on_chunk_done` calls are mutually exclusive but **not** ordered by
///   chunk index; chunks complete whenever their round-trip finishes.
/// - After a failure, chunks whose own work succeeds later skip their
///   `on_chunk_done` so partial results never merge into shared state.
/// - `work` must be side-effect-free with respect to shared state; all
///   shared mutation belongs in `on_chunk_done`.
///
/// There is no timeout or retry at this layer; callers needing a deadline
/// wrap the whole call.
pub struct ChunkDispatcher {
    /// Cap on concurrently running chunk tasks; `None` means unbounded
    max_in_flight: Option<usize>,
}

impl Default for ChunkDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDispatcher {
    /// Creates a dispatcher with unbounded chunk concurrency.
    pub fn new() -> Self {
        Self { max_in_flight: None }
    }

    /// Caps how many chunk tasks may run at once. Tasks are still scheduled
    /// one per chunk; excess tasks wait on a semaphore permit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    /// Runs `work` once per chunk and `on_chunk_done` once per successful
    /// chunk, blocking until every task has finished.
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] observed: a failed or panicked
    /// chunk, or a rejected aggregation. Callback invocations for chunks
    /// that observe the failure are skipped.
    pub async fn run<T, R, W, Fut, D>(
        &self,
        input: Vec<T>,
        chunk_size: usize,
        work: W,
        on_chunk_done: D,
    ) -> Result<(), DispatchError>
    where
        T: Send + 'static,
        R: Send + 'static,
        W: Fn(Vec<T>, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
        D: FnMut(R, usize) -> Result<(), BoxError> + Send + 'static,
    {
        let chunks = split_chunks(input, chunk_size);
        info!(chunks = chunks.len(), chunk_size, "Dispatching chunked operation");

        let work = Arc::new(work);
        let on_chunk_done = Arc::new(Mutex::new(on_chunk_done));
        let cancelled = Arc::new(AtomicBool::new(false));
        let first_error: Arc<StdMutex<Option<DispatchError>>> = Arc::new(StdMutex::new(None));
        let gate = self.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));

        let mut tasks = JoinSet::new();
        for (idx, chunk) in chunks.into_iter().enumerate() {
            let work = Arc::clone(&work);
            let on_chunk_done = Arc::clone(&on_chunk_done);
            let cancelled = Arc::clone(&cancelled);
            let first_error = Arc::clone(&first_error);
            let gate = gate.clone();

            tasks.spawn(async move {
                let _permit = match gate {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return, // semaphore closed, dispatcher is gone
                    },
                    None => None,
                };

                // The work future runs on its own task so a panic inside it
                // is caught right here, cancelling siblings as promptly as
                // an ordinary error return would.
                match tokio::spawn(work(chunk, idx)).await {
                    Ok(Ok(result)) => {
                        // A sibling already failed: the batch is dead, do not
                        // merge this chunk's result into shared state.
                        if cancelled.load(Ordering::Acquire) {
                            debug!(chunk = idx, "Skipping aggregation after cancellation");
                            return;
                        }
                        let mut callback = on_chunk_done.lock().await;
                        if let Err(e) = (*callback)(result, idx) {
                            record_failure(
                                &first_error,
                                &cancelled,
                                DispatchError::AggregationFailed {
                                    chunk: idx,
                                    message: e.to_string(),
                                },
                            );
                        }
                    }
                    Ok(Err(e)) => {
                        record_failure(
                            &first_error,
                            &cancelled,
                            DispatchError::ChunkFailed {
                                chunk: idx,
                                message: e.to_string(),
                            },
                        );
                    }
                    Err(join_err) => {
                        record_failure(
                            &first_error,
                            &cancelled,
                            DispatchError::ChunkPanicked {
                                message: join_err.to_string(),
                            },
                        );
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(join_err) = joined {
                // Covers a panic in the aggregation callback itself.
                record_failure(
                    &first_error,
                    &cancelled,
                    DispatchError::ChunkPanicked {
                        message: join_err.to_string(),
                    },
                );
            }
        }

        let taken = first_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match taken {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Splits `input` into contiguous, order-preserving chunks.
///
/// `chunk_size == 0` yields a single chunk holding the whole input.
fn split_chunks<T>(input: Vec<T>, chunk_size: usize) -> Vec<Vec<T>> {
    if chunk_size == 0 {
        return vec![input];
    }
    let mut chunks = Vec::with_capacity(input.len().div_ceil(chunk_size));
    let mut current = Vec::with_capacity(chunk_size);
    for item in input {
        current.push(item);
        if current.len() == chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Marks the dispatch cancelled and stores `err` if it is the first failure.
fn record_failure(
    slot: &StdMutex<Option<DispatchError>>,
    cancelled: &AtomicBool,
    err: DispatchError,
) {
    cancelled.store(true, Ordering::Release);
    let mut slot = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_none() {
        *slot = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Work callback counting its own invocations and reporting chunk length.
    macro_rules! counting_work {
        ($invocations:expr) => {{
            let invocations = Arc::clone(&$invocations);
            move |chunk: Vec<u32>, _idx: usize| {
                invocations.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<usize, BoxError>(chunk.len()) }
            }
        }};
    }

    #[tokio::test]
    async fn test_chunk_count_law() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let done_calls = Arc::new(AtomicUsize::new(0));
        let done_clone = Arc::clone(&done_calls);

        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..10).collect::<Vec<u32>>(),
                3,
                counting_work!(invocations),
                move |_len: usize, _idx| {
                    done_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;

        assert!(result.is_ok());
        // ceil(10 / 3) = 4
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert_eq!(done_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_chunk_size_one_runs_one_worker_per_input() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..7).collect::<Vec<u32>>(),
                1,
                counting_work!(invocations),
                |_len: usize, _idx| Ok(()),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_chunk_size_zero_is_single_chunk() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..100).collect::<Vec<u32>>(),
                0,
                counting_work!(invocations),
                move |len: usize, idx| {
                    seen_clone.lock().unwrap().push((idx, len));
                    Ok(())
                },
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(0, 100)]);
    }

    #[tokio::test]
    async fn test_chunk_size_zero_with_empty_input_still_runs_once() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                Vec::<u32>::new(),
                0,
                counting_work!(invocations),
                |_len: usize, _idx| Ok(()),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chunks_preserve_order_and_contiguity() {
        let gathered = Arc::new(StdMutex::new(Vec::new()));
        let gathered_clone = Arc::clone(&gathered);

        let dispatcher = ChunkDispatcher::new();
        dispatcher
            .run(
                (0..10).collect::<Vec<u32>>(),
                4,
                |chunk: Vec<u32>, idx| async move { Ok::<_, BoxError>((idx, chunk)) },
                move |(idx, chunk): (usize, Vec<u32>), _| {
                    gathered_clone.lock().unwrap().push((idx, chunk));
                    Ok(())
                },
            )
            .await
            .unwrap();

        let mut chunks = gathered.lock().unwrap().clone();
        chunks.sort_by_key(|(idx, _)| *idx);
        let flat: Vec<u32> = chunks.into_iter().flat_map(|(_, c)| c).collect();
        assert_eq!(flat, (0..10).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_first_worker_error_is_surfaced() {
        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..6).collect::<Vec<u32>>(),
                2,
                |chunk: Vec<u32>, idx| async move {
                    if idx == 1 {
                        Err::<usize, BoxError>("backend rejected page".into())
                    } else {
                        Ok(chunk.len())
                    }
                },
                |_len: usize, _idx| Ok(()),
            )
            .await;

        match result {
            Err(DispatchError::ChunkFailed { chunk, message }) => {
                assert_eq!(chunk, 1);
                assert!(message.contains("backend rejected page"));
            }
            other => panic!("expected ChunkFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancellation_skips_done_callbacks() {
        let done_calls = Arc::new(AtomicUsize::new(0));
        let done_clone = Arc::clone(&done_calls);

        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..5).collect::<Vec<u32>>(),
                1,
                |chunk: Vec<u32>, idx| async move {
                    if idx == 0 {
                        // Fails immediately, before any slow sibling wakes.
                        return Err::<usize, BoxError>("boom".into());
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(chunk.len())
                },
                move |_len: usize, _idx| {
                    done_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;

        assert!(result.is_err());
        // Every surviving chunk observed cancellation after its work
        // succeeded and skipped aggregation.
        assert_eq!(done_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_cancels_sibling_aggregation() {
        // A panicking chunk must set the cancellation flag as promptly as a
        // returned error, so slower siblings skip their aggregation.
        let done_calls = Arc::new(AtomicUsize::new(0));
        let done_clone = Arc::clone(&done_calls);

        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                (0..5).collect::<Vec<u32>>(),
                1,
                |chunk: Vec<u32>, idx| async move {
                    if idx == 0 {
                        panic!("poisoned page");
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<usize, BoxError>(chunk.len())
                },
                move |_len: usize, _idx| {
                    done_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;

        assert!(matches!(result, Err(DispatchError::ChunkPanicked { .. })));
        assert_eq!(done_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_worker_panic_becomes_error() {
        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                vec![1u32, 2, 3],
                1,
                |_chunk: Vec<u32>, idx| async move {
                    if idx == 1 {
                        panic!("malformed page");
                    }
                    Ok::<usize, BoxError>(1)
                },
                |_len: usize, _idx| Ok(()),
            )
            .await;

        match result {
            Err(DispatchError::ChunkPanicked { message }) => {
                assert!(message.contains("panic"));
            }
            other => panic!("expected ChunkPanicked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aggregation_error_is_surfaced() {
        let dispatcher = ChunkDispatcher::new();
        let result = dispatcher
            .run(
                vec![1u32, 2],
                0,
                |chunk: Vec<u32>, _idx| async move { Ok::<_, BoxError>(chunk.len()) },
                |_len: usize, _idx| Err::<(), BoxError>("accumulator full".into()),
            )
            .await;

        match result {
            Err(DispatchError::AggregationFailed { chunk, message }) => {
                assert_eq!(chunk, 0);
                assert!(message.contains("accumulator full"));
            }
            other => panic!("expected AggregationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_still_completes_all_chunks() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let dispatcher = ChunkDispatcher::new().with_concurrency_limit(1);
        let result = dispatcher
            .run(
                (0..8).collect::<Vec<u32>>(),
                2,
                counting_work!(invocations),
                |_len: usize, _idx| Ok(()),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
    }
}
