//! Consumer pipeline: flow-controlled consumption with manual acknowledgment.
//!
//! ```text
//! WAITING --delivery--> HANDLING --ack/nack--> WAITING
//!    |                                           |
//!    +--stop / expected count / stream end-------+--> STOPPED
//! ```
//!
//! The handler is never raced against the stop signal: a delivery that is
//! being handled when a stop arrives is completed and acknowledged first.

use std::any::Any;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bus::{BrokerChannel, BrokerLink, BusError, Delivery, Result};
use crate::envelope::ReceivedEnvelope;

/// Errors raised by a delivery handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler panicked: {0}")]
    Panicked(String),
}

/// Side effect applied to each delivery.
///
/// `Ok` acknowledges the delivery; `Err` (or a panic) negatively
/// acknowledges it with requeue.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// `seen` is the 1-based count of deliveries handled so far in this run.
    async fn handle(
        &self,
        seen: u64,
        envelope: &ReceivedEnvelope,
    ) -> std::result::Result<(), HandlerError>;
}

/// Prints one line per delivery to stdout.
pub struct ConsoleHandler {
    name: String,
}

impl ConsoleHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn format_line(&self, seen: u64, envelope: &ReceivedEnvelope) -> String {
        let n = envelope
            .body
            .sequence_number()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!(
            "[{}] got #{} (msg_id={}, from={}) n={} text={}",
            self.name,
            seen,
            envelope.message_id.as_deref().unwrap_or("-"),
            envelope.producer_id.as_deref().unwrap_or("-"),
            n,
            envelope.body.text(),
        )
    }
}

#[async_trait]
impl DeliveryHandler for ConsoleHandler {
    async fn handle(
        &self,
        seen: u64,
        envelope: &ReceivedEnvelope,
    ) -> std::result::Result<(), HandlerError> {
        let line = self.format_line(seen, envelope);
        writeln!(std::io::stdout().lock(), "{}", line)
            .map_err(|e| HandlerError::Failed(format!("stdout: {}", e)))
    }
}

/// Settings for one consumer run.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    /// Worker name used in output and the consumer tag.
    pub name: String,
    pub queue: String,
    /// Maximum unacknowledged deliveries held at once.
    pub prefetch: u16,
    /// Stop after this many deliveries. `Some(0)` means no limit.
    pub expect: Option<u64>,
    /// Log progress every this many deliveries; 0 disables.
    pub progress_every: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            name: "Worker".to_string(),
            queue: "work.queue".to_string(),
            prefetch: 1000,
            expect: None,
            progress_every: 10_000,
        }
    }
}

impl ConsumerOptions {
    /// Delivery count that ends the run, if any.
    pub fn limit(&self) -> Option<u64> {
        self.expect.filter(|&n| n > 0)
    }

    pub fn consumer_tag(&self) -> String {
        format!("warren-{}", self.name)
    }
}

/// Where the consumer loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Waiting,
    Handling,
    Stopped,
}

/// Why the consumer loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The expected number of deliveries was reached.
    Expected,
    /// A stop was requested (Ctrl+C).
    Interrupted,
    /// The channel or connection closed.
    StreamEnded,
    /// The delivery stream reported an error.
    StreamFailed(String),
}

/// Outcome of a consumer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub consumed: u64,
    pub acked: u64,
    pub nacked: u64,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

impl ConsumerReport {
    /// Turn a run that ended on a failed delivery stream into an error.
    ///
    /// Other stop reasons are normal terminations.
    pub fn ensure_clean(&self) -> Result<()> {
        match &self.stop_reason {
            StopReason::StreamFailed(reason) => Err(BusError::Consume(format!(
                "Delivery stream failed after {} messages: {}",
                self.consumed, reason
            ))),
            _ => Ok(()),
        }
    }
}

/// Per-run mutable context threaded through the loop.
struct RunContext {
    state: ConsumerState,
    consumed: u64,
    acked: u64,
    nacked: u64,
}

impl RunContext {
    fn new() -> Self {
        Self {
            state: ConsumerState::Waiting,
            consumed: 0,
            acked: 0,
            nacked: 0,
        }
    }

    fn transition(&mut self, next: ConsumerState) {
        trace!(from = ?self.state, to = ?next, "Consumer state");
        self.state = next;
    }
}

/// Consume from `options.queue` until the expected count is reached, a stop
/// is requested on `stop`, or the broker ends the stream. The link is closed
/// before returning, whatever the outcome.
#[instrument(name = "consumer.run", skip_all, fields(queue = %options.queue, name = %options.name))]
pub async fn run(
    link: &dyn BrokerLink,
    channel: &dyn BrokerChannel,
    options: &ConsumerOptions,
    handler: &dyn DeliveryHandler,
    stop: watch::Receiver<bool>,
) -> Result<ConsumerReport> {
    let start = Instant::now();
    let mut ctx = RunContext::new();

    let outcome = consume(channel, options, handler, stop, &mut ctx).await;
    ctx.transition(ConsumerState::Stopped);

    if let Err(e) = link.close().await {
        warn!(error = %e, "Failed to close connection");
    }

    let stop_reason = outcome?;
    let elapsed = start.elapsed();

    info!(
        consumed = ctx.consumed,
        acked = ctx.acked,
        nacked = ctx.nacked,
        reason = ?stop_reason,
        elapsed_ms = elapsed.as_millis() as u64,
        "Consumer done"
    );

    Ok(ConsumerReport {
        consumed: ctx.consumed,
        acked: ctx.acked,
        nacked: ctx.nacked,
        elapsed,
        stop_reason,
    })
}

async fn consume(
    channel: &dyn BrokerChannel,
    options: &ConsumerOptions,
    handler: &dyn DeliveryHandler,
    mut stop: watch::Receiver<bool>,
    ctx: &mut RunContext,
) -> Result<StopReason> {
    channel.set_prefetch(options.prefetch).await?;
    let mut stream = channel
        .consume(&options.queue, &options.consumer_tag())
        .await?;

    let limit = options.limit();
    info!(prefetch = options.prefetch, expect = ?limit, "Waiting for messages");

    // Once every sender is gone no stop can arrive; stop polling the channel.
    let mut stop_open = true;

    loop {
        if *stop.borrow() {
            return Ok(StopReason::Interrupted);
        }

        let next = tokio::select! {
            biased;
            changed = stop.changed(), if stop_open => {
                if changed.is_err() {
                    stop_open = false;
                }
                continue;
            }
            next = stream.next_delivery() => next,
        };

        let delivery = match next {
            None => {
                info!("Delivery stream ended");
                return Ok(StopReason::StreamEnded);
            }
            Some(Err(e)) => {
                error!(error = %e, "Delivery stream failed");
                return Ok(StopReason::StreamFailed(e.to_string()));
            }
            Some(Ok(delivery)) => delivery,
        };

        ctx.transition(ConsumerState::Handling);
        handle_delivery(delivery, handler, ctx).await;
        ctx.transition(ConsumerState::Waiting);

        if options.progress_every > 0 && ctx.consumed % options.progress_every == 0 {
            info!(consumed = ctx.consumed, "Consuming");
        }

        if let Some(expect) = limit {
            if ctx.consumed >= expect {
                return Ok(StopReason::Expected);
            }
        }
    }
}

/// Run the handler on one delivery and complete it on its own channel.
///
/// Ack/nack transport failures are logged and otherwise ignored: the broker
/// redelivers anything left unacknowledged once the channel closes.
async fn handle_delivery(
    delivery: Delivery,
    handler: &dyn DeliveryHandler,
    ctx: &mut RunContext,
) {
    let Delivery { message, handle } = delivery;
    ctx.consumed += 1;

    let envelope = ReceivedEnvelope::from_message(&message);
    if envelope.redelivered {
        debug!(
            delivery_tag = handle.delivery_tag(),
            message_id = ?envelope.message_id,
            "Redelivered message"
        );
    }

    let outcome = match AssertUnwindSafe(handler.handle(ctx.consumed, &envelope))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
    };

    match outcome {
        Ok(()) => match handle.ack().await {
            Ok(()) => ctx.acked += 1,
            Err(e) => warn!(error = %e, "Ack failed, broker will redeliver"),
        },
        Err(e) => {
            error!(
                error = %e,
                message_id = ?envelope.message_id,
                "Handler failed, requeueing"
            );
            match handle.nack(true).await {
                Ok(()) => ctx.nacked += 1,
                Err(e) => warn!(error = %e, "Nack failed, broker will redeliver"),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
