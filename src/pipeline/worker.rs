//! Background analysis worker — periodically analyzes emails that have been
//! synced but not analyzed yet.
//!
//! Each tick loads up to `max_emails` un-analyzed emails from the store and
//! runs them through [`BatchProcessor::process_batch`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::BatchOptions;
use crate::pipeline::batch_processor::BatchProcessor;
use crate::pipeline::types::{BatchResult, UserContext};
use crate::store::AnalysisStore;

/// Spawn the analysis timer loop.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop the loop
/// at its next tick.
pub fn spawn_analysis_worker(
    store: Arc<dyn AnalysisStore>,
    batch: BatchProcessor,
    context: UserContext,
    options: BatchOptions,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            user_id = %context.user_id,
            interval_ms = interval.as_millis() as u64,
            "Analysis worker started"
        );

        let mut tick = tokio::time::interval(interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Analysis worker shutting down");
                return;
            }

            analyze_pending(&*store, &batch, &context, &options).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run one cycle: load un-analyzed emails and analyze them.
///
/// Returns `None` when there was nothing to do or the store could not be read.
pub async fn analyze_pending(
    store: &dyn AnalysisStore,
    batch: &BatchProcessor,
    context: &UserContext,
    options: &BatchOptions,
) -> Option<BatchResult> {
    let emails = match store.get_unanalyzed_emails(options.max_emails).await {
        Ok(emails) => emails,
        Err(e) => {
            error!("Failed to load un-analyzed emails: {e}");
            return None;
        }
    };

    if emails.is_empty() {
        debug!("No emails awaiting analysis");
        return None;
    }

    let result = batch.process_batch(emails, context, options, None).await;
    info!(
        analyzed = result.success_count,
        failed = result.failure_count,
        cost = %result.estimated_cost,
        "Analysis cycle complete"
    );
    Some(result)
}
