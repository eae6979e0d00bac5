//! warren-consumer: print and acknowledge messages from the work queue.
//!
//! Manual acknowledgment with a prefetch window; Ctrl+C lets the message in
//! hand finish, then prints the summary and exits. Losing the connection
//! mid-run still prints the summary, then exits non-zero.
//!
//! ## Configuration
//! - `warren.yaml`, `--config` / `WARREN_CONFIG`, `WARREN__BROKER__*`
//! - WARREN_LOG: log filter (default: info)

use std::time::Instant;

use clap::Parser;
use tracing::{error, warn};

use warren::bus::{AmqpLink, BrokerChannel, BrokerLink};
use warren::config::cli::{broker_config, BrokerArgs, ConfigArgs};
use warren::consumer::{self, ConsoleHandler, ConsumerOptions, StopReason};
use warren::topology::{self, TopologyDescriptor};
use warren::utils::bootstrap::{init_tracing, stop_on_ctrl_c};
use warren::utils::identity;

#[derive(Parser, Debug)]
#[command(name = "warren-consumer", version, about = "Consume from a work queue with manual acks")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    broker: BrokerArgs,

    #[arg(long, default_value = "work.queue")]
    queue: String,

    /// Worker name shown in output and the connection label.
    #[arg(long, default_value = "Worker")]
    name: String,

    /// Maximum unacknowledged messages held at once.
    #[arg(long, default_value_t = 1000)]
    prefetch: u16,

    /// Stop after this many messages; 0 means no limit.
    #[arg(long)]
    expect: Option<u64>,

    #[arg(long, default_value_t = 10_000)]
    progress_every: u64,

    /// Declare the queue disk-backed if it has to be created.
    #[arg(long)]
    lazy: bool,
}

impl Args {
    fn options(&self) -> ConsumerOptions {
        ConsumerOptions {
            name: self.name.clone(),
            queue: self.queue.clone(),
            prefetch: self.prefetch,
            expect: self.expect,
            progress_every: self.progress_every,
        }
    }
}

async fn prepare(link: &AmqpLink, args: &Args) -> warren::bus::Result<Box<dyn BrokerChannel>> {
    let channel = link.open_channel().await?;
    topology::ensure(link, channel, &TopologyDescriptor::queue(&args.queue).lazy(args.lazy)).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let broker = broker_config(&args.config, &args.broker)?;
    let host = identity::hostname();
    let link = AmqpLink::connect(
        broker.link_params(format!("RabbitMQ Consumer {} ({})", args.name, host)),
    )
    .await?;

    let channel = match prepare(&link, &args).await {
        Ok(channel) => channel,
        Err(e) => {
            error!(error = %e, queue = %args.queue, "Queue setup failed");
            if let Err(close) = link.close().await {
                warn!(error = %close, "Failed to close connection");
            }
            return Err(e.into());
        }
    };

    let stop = stop_on_ctrl_c(&args.name);
    println!("[{}] waiting for messages... Press Ctrl+C to stop", args.name);

    let handler = ConsoleHandler::new(&args.name);
    let start = Instant::now();
    let result = consumer::run(&link, channel.as_ref(), &args.options(), &handler, stop).await;

    // The summary is printed on every exit path; setup failures consumed nothing.
    let (consumed, elapsed) = match &result {
        Ok(report) => (report.consumed, report.elapsed),
        Err(_) => (0, start.elapsed()),
    };
    if matches!(&result, Ok(report) if report.stop_reason == StopReason::Interrupted) {
        println!("[{}] Ctrl+C, stopped", args.name);
    }
    println!(
        "[{}] done. consumed={}, time={:.2}s",
        args.name,
        consumed,
        elapsed.as_secs_f64()
    );

    let report = result.inspect_err(|e| error!(error = %e, "Consumer failed"))?;
    report
        .ensure_clean()
        .inspect_err(|e| error!(error = %e, "Connection lost while consuming"))?;
    Ok(())
}
