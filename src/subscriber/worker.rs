//! Subscriber thread: pull → hand off to the runtime → settle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

use super::{ReceivedMessage, SubscriberError, Subscription};
use crate::config::{AckPolicy, PubSubConfig};
use crate::pipeline::{decode_message_data, JournalEventHandler, Outcome, PipelineError};

/// Shutdown is checked at least this often while idle.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(100);
/// Consecutive auth failures before the pull loop logs at error level.
const AUTH_FAILURE_ESCALATION: u32 = 3;

#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub ack_policy: AckPolicy,
    pub max_messages: u32,
    pub idle_interval: Duration,
    /// Lease requested for messages still being processed.
    pub ack_deadline_secs: u32,
    /// How often leases are renewed while a batch is in flight.
    pub lease_refresh: Duration,
}

impl SubscriberOptions {
    pub fn from_config(config: &PubSubConfig) -> Self {
        Self {
            ack_policy: config.ack_policy,
            max_messages: config.max_messages,
            idle_interval: config.idle_interval,
            ack_deadline_secs: config.ack_deadline_secs,
            lease_refresh: Duration::from_secs(u64::from(config.ack_deadline_secs / 2)),
        }
    }
}

/// Handle for the subscriber thread.
///
/// Stops the loop and joins the thread on `stop()` or `Drop`. Joining
/// blocks, so drop it off the async workers (e.g. in `spawn_blocking`).
pub struct SubscriberHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SubscriberHandle {
    /// Ask the loop to exit after the current batch.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Signal shutdown and wait for the thread to exit.
    pub fn stop(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Subscriber thread panicked");
            }
        }
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.join();
    }
}

/// Start the pull loop on a dedicated OS thread.
///
/// `connect` runs on that thread, so blocking clients are created outside
/// the async runtime. Handler invocations are spawned onto `runtime`.
pub fn start_subscriber<S, F>(
    connect: F,
    handler: Arc<JournalEventHandler>,
    runtime: Handle,
    options: SubscriberOptions,
) -> SubscriberHandle
where
    S: Subscription + 'static,
    F: FnOnce() -> Result<S, SubscriberError> + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    if options.ack_policy == AckPolicy::OnReceipt {
        tracing::warn!(
            "Ack policy is on_receipt: messages are acknowledged before processing and are lost if it fails"
        );
    }

    let handle = std::thread::Builder::new()
        .name("pubsub-subscriber".into())
        .spawn(move || {
            let subscription = match connect() {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Subscriber failed to connect; pull ingress disabled");
                    return;
                }
            };
            tracing::info!(
                ack_policy = ?options.ack_policy,
                max_messages = options.max_messages,
                "Subscriber started"
            );
            subscriber_loop(&subscription, &handler, &runtime, &options, &flag);
            tracing::info!("Subscriber stopped");
        });

    let handle = match handle {
        Ok(h) => Some(h),
        Err(e) => {
            tracing::error!(error = %e, "Failed to spawn subscriber thread");
            None
        }
    };

    SubscriberHandle { shutdown, handle }
}

fn subscriber_loop<S: Subscription>(
    subscription: &S,
    handler: &Arc<JournalEventHandler>,
    runtime: &Handle,
    options: &SubscriberOptions,
    shutdown: &AtomicBool,
) {
    let mut auth_failures = 0u32;
    while !shutdown.load(Ordering::Relaxed) {
        match subscription.pull(options.max_messages) {
            Ok(batch) => {
                auth_failures = 0;
                if batch.is_empty() {
                    idle(options.idle_interval, shutdown);
                } else {
                    process_batch(subscription, handler, runtime, options, batch);
                }
            }
            Err(e) => {
                auth_failures = if e.is_auth() { auth_failures.saturating_add(1) } else { 0 };
                if escalates(auth_failures) {
                    tracing::error!(
                        error = %e,
                        consecutive = auth_failures,
                        "Pull keeps failing authentication; no messages are being consumed"
                    );
                } else {
                    tracing::warn!(error = %e, "Pull failed; retrying");
                }
                idle(options.idle_interval, shutdown);
            }
        }
    }
}

fn escalates(consecutive_auth_failures: u32) -> bool {
    consecutive_auth_failures >= AUTH_FAILURE_ESCALATION
}

fn idle(interval: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + interval;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(SLEEP_GRANULARITY.min(deadline - now));
    }
}

struct InFlight {
    ack_id: String,
    message_id: String,
    task: JoinHandle<Result<Outcome, PipelineError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Nack,
}

/// Ack unless the broker redelivering could help.
fn settlement(result: &Result<Outcome, PipelineError>) -> Settlement {
    match result {
        Ok(_) => Settlement::Ack,
        Err(e) if !e.is_retryable() => Settlement::Ack,
        Err(_) => Settlement::Nack,
    }
}

fn flatten(joined: Result<Result<Outcome, PipelineError>, JoinError>) -> Result<Outcome, PipelineError> {
    joined.unwrap_or_else(|e| Err(PipelineError::Transient(format!("handler task failed: {e}"))))
}

fn process_batch<S: Subscription>(
    subscription: &S,
    handler: &Arc<JournalEventHandler>,
    runtime: &Handle,
    options: &SubscriberOptions,
    batch: Vec<ReceivedMessage>,
) {
    let mut acks = Vec::new();
    let mut in_flight = Vec::with_capacity(batch.len());

    for ReceivedMessage { ack_id, message } in batch {
        let message_id = message.message_id.unwrap_or_default();
        match decode_message_data(&message.data) {
            Ok(event) => {
                tracing::debug!(
                    %message_id,
                    publish_time = message.publish_time.as_deref().unwrap_or(""),
                    event_type = %event.event_type,
                    "Pulled message"
                );
                let handler = Arc::clone(handler);
                let task = runtime.spawn(async move { handler.handle_event(event).await });
                in_flight.push(InFlight {
                    ack_id,
                    message_id,
                    task,
                });
            }
            Err(e) => {
                // Redelivery cannot fix a payload that does not decode
                tracing::warn!(%message_id, error = %e, "Dropping undecodable message");
                acks.push(ack_id);
            }
        }
    }

    let mut nacks = Vec::new();
    match options.ack_policy {
        AckPolicy::OnReceipt => {
            for InFlight {
                ack_id,
                message_id,
                task,
            } in in_flight
            {
                acks.push(ack_id);
                runtime.spawn(async move {
                    log_result(&message_id, &flatten(task.await));
                });
            }
        }
        AckPolicy::AfterProcessing => {
            let leased: Vec<String> = in_flight.iter().map(|f| f.ack_id.clone()).collect();
            extend_leases(subscription, &leased, options.ack_deadline_secs);

            for (
                settled,
                InFlight {
                    ack_id,
                    message_id,
                    mut task,
                },
            ) in in_flight.into_iter().enumerate()
            {
                // Waits happen off the runtime so the blocking client can run between them
                let result = loop {
                    let waited = runtime.block_on(async {
                        tokio::time::timeout(options.lease_refresh, &mut task).await
                    });
                    match waited {
                        Ok(joined) => break flatten(joined),
                        Err(_) => extend_leases(subscription, &leased[settled..], options.ack_deadline_secs),
                    }
                };
                log_result(&message_id, &result);
                match settlement(&result) {
                    Settlement::Ack => acks.push(ack_id),
                    Settlement::Nack => nacks.push(ack_id),
                }
            }
        }
    }

    if let Err(e) = subscription.ack(&acks) {
        tracing::error!(error = %e, count = acks.len(), "Ack failed; messages will be redelivered");
    }
    if let Err(e) = subscription.nack(&nacks) {
        tracing::warn!(error = %e, count = nacks.len(), "Nack failed; messages redeliver after the ack deadline");
    }
}

fn extend_leases<S: Subscription>(subscription: &S, ack_ids: &[String], seconds: u32) {
    if ack_ids.is_empty() {
        return;
    }
    if let Err(e) = subscription.extend(ack_ids, seconds) {
        tracing::warn!(error = %e, count = ack_ids.len(), "Lease extension failed; messages may be redelivered");
    }
}

fn log_result(message_id: &str, result: &Result<Outcome, PipelineError>) {
    match result {
        Ok(outcome) => tracing::debug!(%message_id, status = ?outcome.status(), "Message handled"),
        Err(e) if e.is_retryable() => {
            tracing::error!(%message_id, kind = e.kind(), error = %e, "Message processing failed")
        }
        Err(e) => tracing::warn!(%message_id, kind = e.kind(), error = %e, "Message rejected"),
    }
}
