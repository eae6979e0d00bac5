//! warren-producer: publish a run of messages to the work queue.
//!
//! ## Topology
//! ```text
//! [producer] --(routing key)--> [direct exchange] --+--> work queue
//!                                                   +--> audit queue (optional)
//! ```
//!
//! ## Configuration
//! - `warren.yaml`, `--config` / `WARREN_CONFIG`, `WARREN__BROKER__*`
//! - WARREN_LOG: log filter (default: info)

use clap::Parser;
use tracing::{error, warn};

use warren::bus::{AmqpLink, BrokerLink};
use warren::config::cli::{broker_config, BrokerArgs, ConfigArgs};
use warren::envelope::ProducerIdentity;
use warren::producer::{self, ProducerOptions, ProducerReport};
use warren::topology::{self, TopologyDescriptor};
use warren::utils::bootstrap::init_tracing;
use warren::utils::identity;

#[derive(Parser, Debug)]
#[command(name = "warren-producer", version, about = "Publish N messages to a direct exchange")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    broker: BrokerArgs,

    #[arg(long, default_value = "direct.exchange")]
    exchange: String,

    #[arg(long, default_value = "work.queue")]
    queue: String,

    /// Second queue receiving a copy of every message; empty to disable.
    #[arg(long, default_value = "audit.queue")]
    audit_queue: String,

    #[arg(long, default_value = "work")]
    routing_key: String,

    /// Number of messages to publish.
    #[arg(long, default_value_t = 10_000)]
    count: u64,

    #[arg(long, default_value = "Hello World")]
    text: String,

    /// Durable queues and persistent messages.
    #[arg(long)]
    durable: bool,

    /// Disk-backed (lazy) queues for large backlogs.
    #[arg(long)]
    lazy: bool,

    /// Purge the queues before publishing.
    #[arg(long)]
    purge: bool,

    #[arg(long, default_value_t = 10_000)]
    progress_every: u64,

    /// Logical producer name; defaults to the current OS user.
    #[arg(long)]
    producer_id: Option<String>,
}

impl Args {
    fn topology(&self) -> TopologyDescriptor {
        let mut topology = TopologyDescriptor::queue(&self.queue)
            .with_exchange(&self.exchange, &self.routing_key)
            .durable(self.durable)
            .lazy(self.lazy);
        if !self.audit_queue.is_empty() {
            topology = topology.with_queue(&self.audit_queue);
        }
        topology
    }

    fn options(&self, host: &str) -> ProducerOptions {
        let producer_id = self
            .producer_id
            .clone()
            .unwrap_or_else(identity::current_user);
        ProducerOptions {
            count: self.count,
            text: self.text.clone(),
            durable: self.durable,
            purge: self.purge,
            progress_every: self.progress_every,
            identity: ProducerIdentity::new(producer_id, host),
        }
    }
}

async fn publish(link: &AmqpLink, args: &Args, host: &str) -> warren::bus::Result<ProducerReport> {
    let topology = args.topology();
    let channel = link.open_channel().await?;
    let channel = topology::ensure(link, channel, &topology).await?;

    let report = producer::run(channel.as_ref(), &topology, &args.options(host)).await?;
    if report.purged > 0 {
        println!("[producer] purged {} messages", report.purged);
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let broker = broker_config(&args.config, &args.broker)?;
    let host = identity::hostname();
    let link = AmqpLink::connect(broker.link_params(format!("RabbitMQ Producer ({})", host))).await?;

    let result = publish(&link, &args, &host).await;
    if let Err(e) = link.close().await {
        warn!(error = %e, "Failed to close connection");
    }

    let report = result.inspect_err(|e| error!(error = %e, "Producer failed"))?;
    println!(
        "[producer] done. published={}, in_queue_ready={}, time={:.2}s",
        report.published,
        report.ready_after,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
