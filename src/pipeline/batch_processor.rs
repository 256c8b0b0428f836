//! Batch processor — drives the email processor over many emails in paced,
//! concurrent chunks.
//!
//! Each chunk fans out over `join_all` and is joined before the next one
//! starts. Progress and item errors are emitted as [`BatchEvent`]s from the
//! join point only, so the receiver sees them in order. Dropping the
//! receiver stops the batch before the next chunk. With a batch deadline set,
//! a receiver that stops draining cannot hold the batch past it: sends that
//! are still blocked at the deadline drop their event.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::BatchOptions;
use crate::costs::estimate_cost;
use crate::pipeline::email_processor::EmailProcessor;
use crate::pipeline::types::{
    BatchError, BatchEvent, BatchResult, EmailItem, ErrorSource, ItemError, ProcessingResult,
    UserContext,
};

/// Buffer for the event channel handed out by [`BatchProcessor::spawn_batch`].
const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
pub struct BatchProcessor {
    processor: Arc<EmailProcessor>,
}

impl BatchProcessor {
    pub fn new(processor: Arc<EmailProcessor>) -> Self {
        Self { processor }
    }

    /// Process `emails` and return the rollup. Never fails; per-email
    /// problems land in `BatchResult::errors`.
    pub async fn process_batch(
        &self,
        mut emails: Vec<EmailItem>,
        context: &UserContext,
        options: &BatchOptions,
        events: Option<mpsc::Sender<BatchEvent>>,
    ) -> BatchResult {
        let started = Instant::now();
        let deadline = options.deadline.map(|d| started + d);

        emails.truncate(options.max_emails);
        let total = emails.len();
        let mut result = BatchResult::empty();
        result.total_emails = total;
        if total == 0 {
            debug!("Empty batch — nothing to analyze");
            return result;
        }

        let batch_size = options.batch_size.max(1);
        let chunks: Vec<&[EmailItem]> = emails.chunks(batch_size).collect();
        info!(
            total,
            chunks = chunks.len(),
            batch_size,
            user_id = %context.user_id,
            "Processing email batch"
        );

        let mut completed = 0;
        for (index, chunk) in chunks.iter().enumerate() {
            if let Some((source, reason)) = halt_reason(events.as_ref(), deadline) {
                let remaining: Vec<&EmailItem> =
                    chunks[index..].iter().flat_map(|c| c.iter()).collect();
                warn!(
                    remaining = remaining.len(),
                    reason,
                    "Batch halted before all chunks ran"
                );
                for email in remaining {
                    let item = ProcessingResult::aborted(&email.id, ItemError::new(source, reason));
                    record(&mut result, item, events.as_ref(), deadline).await;
                }
                emit(
                    events.as_ref(),
                    BatchEvent::Progress {
                        completed: total,
                        total,
                    },
                    deadline,
                )
                .await;
                break;
            }

            let items = join_all(
                chunk
                    .iter()
                    .map(|email| self.process_item(email, context, options, deadline)),
            )
            .await;
            result.chunk_count += 1;
            completed += chunk.len();

            for item in items {
                record(&mut result, item, events.as_ref(), deadline).await;
            }
            emit(
                events.as_ref(),
                BatchEvent::Progress { completed, total },
                deadline,
            )
            .await;
            debug!(chunk = index + 1, completed, total, "Chunk complete");

            if index + 1 < chunks.len() && !options.delay_between_batches.is_zero() {
                tokio::time::sleep(options.delay_between_batches).await;
            }
        }

        result.total_time_ms = started.elapsed().as_millis() as u64;
        result.avg_time_per_email_ms = result.total_time_ms / total as u64;
        result.estimated_cost = estimate_cost(result.total_tokens_used);

        info!(
            total,
            succeeded = result.success_count,
            failed = result.failure_count,
            skipped = result.skipped_count,
            tokens = result.total_tokens_used,
            cost = %result.estimated_cost,
            elapsed_ms = result.total_time_ms,
            "Batch processing complete"
        );
        result
    }

    /// Run a batch on its own task and stream its events.
    ///
    /// The stream ends once the batch finishes. Dropping it cancels the
    /// chunks that have not started yet.
    pub fn spawn_batch(
        &self,
        emails: Vec<EmailItem>,
        context: UserContext,
        options: BatchOptions,
    ) -> (JoinHandle<BatchResult>, ReceiverStream<BatchEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.process_batch(emails, &context, &options, Some(tx))
                .await
        });
        (handle, ReceiverStream::new(rx))
    }

    /// One email, with its analysis bounded by the item timeout and the
    /// batch deadline.
    async fn process_item(
        &self,
        email: &EmailItem,
        context: &UserContext,
        options: &BatchOptions,
        batch_deadline: Option<Instant>,
    ) -> ProcessingResult {
        let item_deadline = options.item_timeout.map(|t| Instant::now() + t);
        let limit = match (item_deadline, batch_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        self.processor
            .process_until(email, context, &options.process, limit)
            .await
    }
}

/// Why the next chunk must not start, if anything.
fn halt_reason(
    events: Option<&mpsc::Sender<BatchEvent>>,
    deadline: Option<Instant>,
) -> Option<(ErrorSource, &'static str)> {
    if events.is_some_and(|tx| tx.is_closed()) {
        return Some((ErrorSource::Cancelled, "batch cancelled by caller"));
    }
    if deadline.is_some_and(|at| Instant::now() >= at) {
        return Some((ErrorSource::Deadline, "batch deadline passed"));
    }
    None
}

/// Fold one item into the rollup and forward its errors.
async fn record(
    result: &mut BatchResult,
    item: ProcessingResult,
    events: Option<&mpsc::Sender<BatchEvent>>,
    deadline: Option<Instant>,
) {
    if item.skipped {
        result.skipped_count += 1;
    } else if item.success {
        result.success_count += 1;
    } else {
        result.failure_count += 1;
    }
    result.total_tokens_used += item.tokens_used();

    for err in &item.errors {
        let batch_error = BatchError {
            email_id: item.email_id.clone(),
            source: err.source,
            message: err.message.clone(),
        };
        emit(events, BatchEvent::ItemError(batch_error.clone()), deadline).await;
        result.errors.push(batch_error);
    }

    result.results.insert(item.email_id.clone(), item);
}

/// Send one event. Past the batch deadline only a free slot is used.
async fn emit(
    events: Option<&mpsc::Sender<BatchEvent>>,
    event: BatchEvent,
    deadline: Option<Instant>,
) {
    let Some(tx) = events else {
        return;
    };
    let send = tx.send(event);
    let outcome = match deadline {
        None => send.await,
        Some(at) => match tokio::time::timeout_at(at, send).await {
            Ok(sent) => sent,
            Err(_) => {
                warn!("Batch event receiver not draining past the deadline; event dropped");
                return;
            }
        },
    };
    if outcome.is_err() {
        debug!("Batch event receiver dropped");
    }
}
