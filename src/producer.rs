//! Producer pipeline: publish a bounded run of enveloped messages.

use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::bus::{BrokerChannel, BusError, DeliveryMode, QueueSpec, Result};
use crate::envelope::{Envelope, ProducerIdentity};
use crate::topology::TopologyDescriptor;

/// Settings for one producer run.
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Number of messages to publish.
    pub count: u64,
    /// Text carried in every payload.
    pub text: String,
    /// Publish persistent messages.
    pub durable: bool,
    /// Drop ready messages from every topology queue before publishing.
    pub purge: bool,
    /// Log progress every this many messages; 0 disables.
    pub progress_every: u64,
    pub identity: ProducerIdentity,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            count: 10_000,
            text: "Hello World".to_string(),
            durable: false,
            purge: false,
            progress_every: 10_000,
            identity: ProducerIdentity::current(),
        }
    }
}

/// Outcome of a producer run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerReport {
    pub published: u64,
    /// Messages removed by the pre-run purge, over all queues.
    pub purged: u64,
    /// Ready messages on the primary queue after publishing. Informational
    /// only: a concurrent consumer may already be draining the queue.
    pub ready_after: u32,
    pub elapsed: Duration,
}

/// Publish `options.count` envelopes to the topology's exchange.
///
/// There is no retry: the first failed publish aborts the run.
#[instrument(name = "producer.run", skip_all, fields(queue = %topology.primary_queue(), count = options.count))]
pub async fn run(
    channel: &dyn BrokerChannel,
    topology: &TopologyDescriptor,
    options: &ProducerOptions,
) -> Result<ProducerReport> {
    topology.validate()?;
    let purged = if options.purge {
        purge(channel, topology).await?
    } else {
        0
    };

    let mode = DeliveryMode::from_durable(options.durable);
    let exchange = topology.exchange_name();
    let start = Instant::now();

    for n in 1..=options.count {
        let envelope = Envelope::new(n, &options.text, &options.identity);
        let message = envelope
            .to_message(mode)
            .map_err(|e| BusError::Publish(format!("Failed to encode message {}: {}", n, e)))?;

        channel
            .publish(exchange, &topology.routing_key, &message)
            .await?;

        if options.progress_every > 0 && n % options.progress_every == 0 {
            info!(published = n, total = options.count, "Publishing");
        }
    }

    let ready_after = channel
        .declare_queue(&QueueSpec::named(topology.primary_queue()), true)
        .await?
        .message_count;
    let elapsed = start.elapsed();

    info!(
        published = options.count,
        in_queue_ready = ready_after,
        elapsed_ms = elapsed.as_millis() as u64,
        "Producer done"
    );

    Ok(ProducerReport {
        published: options.count,
        purged,
        ready_after,
        elapsed,
    })
}

/// Purge every queue of the topology. Destructive; only called on request.
pub async fn purge(channel: &dyn BrokerChannel, topology: &TopologyDescriptor) -> Result<u64> {
    let mut total = 0u64;
    for queue in &topology.queues {
        let purged = channel.purge_queue(queue).await?;
        info!(queue = %queue, purged, "Purged queue");
        total += u64::from(purged);
    }
    Ok(total)
}
