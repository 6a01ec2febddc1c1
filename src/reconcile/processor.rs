//! Async event processing
//!
//! Runs events through the [`ReconciliationEngine`] with a timeout and
//! bounded retries. Only failures whose disposition is
//! [`Disposition::Retry`] are retried; unknown customers are acknowledged and
//! malformed payloads are rejected on the first attempt.
//!
//! # Architecture
//!
//! ```text
//! Event Parsed
//!       |
//!       v
//! [Queue Event] --> channel full? --> caller waits
//!       |
//!       v
//! [Spawn Task per Event]
//!       |
//!       v
//! [Engine::handle under timeout] --> Retry disposition? --> backoff, try again
//!       |
//!       v
//! [Record Duration]
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::config::ReconcilerConfig;
use crate::error::{Disposition, Error, ReconcileError};
use crate::event::BillingEvent;
use crate::metrics::{self, emit_observe};
use crate::provider::BillingProvider;
use crate::reconcile::engine::{Outcome, ReconciliationEngine};
use crate::store::AccountStore;
use crate::stripe::events::StripeEvent;

/// Final result of delivering one event
#[derive(Debug)]
pub enum Delivery {
    /// The engine applied the event
    Completed(Outcome),
    /// The event was accepted without changes, e.g. no account owns the customer
    Acknowledged(ReconcileError),
}

/// Totals reported when the background processor stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorSummary {
    /// Events the engine applied
    pub completed: u64,
    /// Events acknowledged without changes
    pub acknowledged: u64,
    /// Events rejected or out of retries
    pub failed: u64,
}

/// Event processor that hands events to background workers
pub struct EventProcessor<S: AccountStore, P: BillingProvider> {
    engine: Arc<ReconciliationEngine<S, P>>,
    config: ReconcilerConfig,
    task_sender: mpsc::Sender<ProcessingTask>,
}

struct ProcessingTask {
    event: BillingEvent,
}

impl<S: AccountStore, P: BillingProvider> EventProcessor<S, P> {
    /// Create a new event processor
    pub fn new(
        engine: Arc<ReconciliationEngine<S, P>>,
        config: ReconcilerConfig,
    ) -> (Self, ProcessorHandle<S, P>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));

        let processor = Self {
            engine: engine.clone(),
            config: config.clone(),
            task_sender: tx,
        };

        let handle = ProcessorHandle {
            engine,
            config,
            task_receiver: rx,
        };

        (processor, handle)
    }

    /// Queue an event for async processing
    pub async fn queue_event(&self, event: BillingEvent) -> Result<(), Error> {
        self.task_sender
            .send(ProcessingTask { event })
            .await
            .map_err(|e| Error::QueueClosed(e.to_string()))
    }

    /// Convert a Stripe event and queue it
    ///
    /// Malformed events are rejected here and never reach the queue.
    pub async fn queue_stripe_event(&self, event: &StripeEvent) -> Result<(), Error> {
        let billing_event = event.to_billing_event()?;
        self.queue_event(billing_event).await
    }

    /// Process an event inline, retries included
    pub async fn process_event_sync(&self, event: &BillingEvent) -> Result<Delivery, ReconcileError> {
        process_with_retry(&self.engine, event, &self.config).await
    }

    /// Shared engine
    pub fn engine(&self) -> &Arc<ReconciliationEngine<S, P>> {
        &self.engine
    }
}

/// Handle for running the background processor
pub struct ProcessorHandle<S: AccountStore, P: BillingProvider> {
    engine: Arc<ReconciliationEngine<S, P>>,
    config: ReconcilerConfig,
    task_receiver: mpsc::Receiver<ProcessingTask>,
}

impl<S: AccountStore, P: BillingProvider> ProcessorHandle<S, P> {
    /// Run the background processor until every [`EventProcessor`] is dropped
    ///
    /// In-flight events are drained before returning:
    ///
    /// ```rust,ignore
    /// let worker = tokio::spawn(handle.run());
    /// processor.queue_event(event).await?;
    /// drop(processor);
    /// let summary = worker.await?;
    /// ```
    pub async fn run(mut self) -> ProcessorSummary {
        tracing::info!("Starting billing event processor");

        let mut tasks = JoinSet::new();
        let mut summary = ProcessorSummary::default();

        loop {
            tokio::select! {
                task = self.task_receiver.recv() => {
                    let Some(task) = task else { break };
                    let engine = self.engine.clone();
                    let config = self.config.clone();

                    // Spawn each event in its own task; the engine serializes per account
                    tasks.spawn(async move {
                        process_with_retry(&engine, &task.event, &config).await
                    });
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    summary.record(joined);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(joined);
        }

        tracing::info!(
            completed = summary.completed,
            acknowledged = summary.acknowledged,
            failed = summary.failed,
            "Billing event processor shutting down"
        );
        summary
    }
}

impl ProcessorSummary {
    fn record(
        &mut self,
        joined: Result<Result<Delivery, ReconcileError>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(Delivery::Completed(_))) => self.completed += 1,
            Ok(Ok(Delivery::Acknowledged(_))) => self.acknowledged += 1,
            Ok(Err(_)) => self.failed += 1,
            Err(e) => {
                tracing::error!(error = %e, "Event processing task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Process a single event with retry logic
async fn process_with_retry<S: AccountStore, P: BillingProvider>(
    engine: &ReconciliationEngine<S, P>,
    event: &BillingEvent,
    config: &ReconcilerConfig,
) -> Result<Delivery, ReconcileError> {
    let event_id = event.event_id();
    let kind = event.kind();
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.retry_delay(attempt - 1);
            tracing::info!(
                event_id = %event_id,
                kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying event processing"
            );
            tokio::time::sleep(delay).await;
        }

        let err = match process_single_event(engine, event, config).await {
            Ok(outcome) => {
                tracing::debug!(
                    event_id = %event_id,
                    kind,
                    attempts = attempt + 1,
                    outcome = ?outcome,
                    "Event processed"
                );
                return Ok(Delivery::Completed(outcome));
            }
            Err(err) => err,
        };

        match err.disposition() {
            Disposition::Acknowledge => return Ok(Delivery::Acknowledged(err)),
            Disposition::Reject => {
                tracing::error!(event_id = %event_id, kind, error = %err, "Event rejected");
                return Err(err);
            }
            Disposition::Retry if attempt >= config.max_retries => {
                tracing::error!(
                    event_id = %event_id,
                    kind,
                    attempts = attempt + 1,
                    error = %err,
                    "Event processing failed, retries exhausted"
                );
                return Err(err);
            }
            Disposition::Retry => {
                tracing::warn!(
                    event_id = %event_id,
                    kind,
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    error = %err,
                    "Event processing failed"
                );
                attempt += 1;
            }
        }
    }
}

/// Process a single event
async fn process_single_event<S: AccountStore, P: BillingProvider>(
    engine: &ReconciliationEngine<S, P>,
    event: &BillingEvent,
    config: &ReconcilerConfig,
) -> Result<Outcome, ReconcileError> {
    let started = Instant::now();

    // Apply timeout to prevent hanging
    let result = match timeout(config.processing_timeout, engine.handle(event)).await {
        Ok(inner) => inner,
        Err(_) => Err(ReconcileError::ProviderUnavailable(format!(
            "Processing timed out after {:?}",
            config.processing_timeout
        ))),
    };

    let status = if result.is_ok() { "ok" } else { "error" };
    emit_observe(
        engine.sink().as_ref(),
        metrics::RECONCILE_DURATION,
        started.elapsed(),
        &[("kind", event.kind()), ("status", status)],
    );

    result
}
