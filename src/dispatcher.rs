//! Bounded dispatch of inbound events.
//!
//! One loop pulls events from the source. Each event takes one of
//! `max_workers` slots and is processed on its own task; when all slots are
//! busy the loop waits, which is the only backpressure on the source.
//! Tasks are isolated: an error or panic in one is logged and dropped.

use std::sync::Arc;

use teloxide::types::ChatId;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::commands::CommandRouter;
use crate::config::Config;
use crate::delivery::DeliveryPipeline;
use crate::platform::{EventSource, InboundEvent, Notifier, Origin};

pub const UNSUPPORTED_NOTICE: &str =
    "Send me a PDF, EPUB, or MOBI file, or use /help for available commands";

/// Failure inside one event task. Logged at the task boundary, never returned
/// to the dispatch loop.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("event has no sender")]
    MissingSender,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("event source closed, last poll error: {0:#}")]
    Source(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    SourceClosed,
}

/// Routes one event to the pipeline, the command router or the fallback notice.
pub struct EventHandler {
    pipeline: DeliveryPipeline,
    commands: CommandRouter,
    notifier: Arc<dyn Notifier>,
}

impl EventHandler {
    pub fn new(
        pipeline: DeliveryPipeline,
        commands: CommandRouter,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pipeline,
            commands,
            notifier,
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> Result<(), TaskError> {
        match event {
            InboundEvent::Payload { origin, payload } => {
                let user_id = origin.user_id.ok_or(TaskError::MissingSender)?;
                // Terminal delivery errors were already reported to the user
                let _ = self
                    .pipeline
                    .deliver(origin.chat_id, user_id, &payload)
                    .await;
            }
            InboundEvent::Command { origin, name, args } => {
                let user_id = origin.user_id.ok_or(TaskError::MissingSender)?;
                self.commands
                    .handle(
                        origin.chat_id,
                        user_id,
                        origin.first_name.as_deref(),
                        &name,
                        &args,
                    )
                    .await;
            }
            InboundEvent::Unrecognized { origin } => {
                self.notifier.notify(origin.chat_id, UNSUPPORTED_NOTICE).await;
            }
        }
        Ok(())
    }
}

pub struct Dispatcher<S> {
    source: S,
    handler: Arc<EventHandler>,
    slots: Arc<Semaphore>,
    max_workers: usize,
    tasks: TaskTracker,
}

impl<S: EventSource> Dispatcher<S> {
    pub fn new(config: &Config, source: S, handler: EventHandler) -> Self {
        let max_workers = config.dispatcher.max_workers.max(1);
        Self {
            source,
            handler: Arc::new(handler),
            slots: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            tasks: TaskTracker::new(),
        }
    }

    /// Pull and dispatch events until `cancel` fires or the source closes.
    ///
    /// Events already handed to a task are allowed to finish before this
    /// returns; nothing in flight is aborted.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<StopReason, DispatchError> {
        info!(max_workers = self.max_workers, "Dispatcher started");
        let mut last_error: Option<anyhow::Error> = None;

        let reason = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                next = self.source.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => break StopReason::SourceClosed,
                Err(e) => {
                    warn!("Event source error: {:#}", e);
                    last_error = Some(e);
                    continue;
                }
            };

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                permit = self.slots.clone().acquire_owned() => permit,
            };

            // The semaphore is never closed, so this only guards the type
            let Ok(permit) = permit else {
                break StopReason::Cancelled;
            };

            self.spawn(event, permit);
        };

        if let Err(e) = self.source.shutdown().await {
            warn!("Failed to acknowledge events on shutdown: {:#}", e);
        }

        self.tasks.close();
        info!(
            ?reason,
            in_flight = self.tasks.len(),
            "Dispatcher stopped pulling events, waiting for in-flight tasks"
        );
        self.tasks.wait().await;

        match (reason, last_error) {
            (StopReason::SourceClosed, Some(e)) => Err(DispatchError::Source(e)),
            (reason, _) => Ok(reason),
        }
    }

    fn spawn(&self, event: InboundEvent, permit: OwnedSemaphorePermit) {
        let origin = event.origin().clone();
        let handler = Arc::clone(&self.handler);

        let worker = tokio::spawn(async move { handler.handle(event).await });

        // The supervisor holds the slot until the worker ends, however it ends
        self.tasks.spawn(async move {
            let _permit = permit;
            match worker.await {
                Ok(Ok(())) => debug!(chat_id = origin.chat_id.0, "Event handled"),
                Ok(Err(e)) => log_unexpected(&origin, &e.to_string()),
                Err(e) if e.is_panic() => log_unexpected(&origin, "task panicked"),
                Err(e) => log_unexpected(&origin, &e.to_string()),
            }
        });
    }
}

fn log_unexpected(origin: &Origin, reason: &str) {
    let ChatId(chat_id) = origin.chat_id;
    error!(
        user_id = ?origin.user_id,
        chat_id,
        "Unexpected failure while handling event: {}",
        reason
    );
}
