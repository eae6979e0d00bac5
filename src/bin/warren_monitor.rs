//! warren-monitor: report queues, consumers and connections from the
//! management API, once or every N seconds.
//!
//! ## Configuration
//! - `warren.yaml`, `--config` / `WARREN_CONFIG`, `WARREN__MANAGEMENT__*`
//! - WARREN_LOG: log filter (default: info)

use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;

use warren::config::cli::{management_config, ConfigArgs, ManagementArgs};
use warren::monitor::{self, ManagementClient, MonitorOptions};
use warren::utils::bootstrap::{init_tracing, stop_on_ctrl_c};

#[derive(Parser, Debug)]
#[command(name = "warren-monitor", version, about = "RabbitMQ monitor (management API)")]
struct Args {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(flatten)]
    management: ManagementArgs,

    /// Refresh every N seconds; 0 runs once.
    #[arg(long, default_value_t = 3)]
    watch: u64,

    /// Run once and exit (same as --watch 0).
    #[arg(long)]
    once: bool,
}

impl Args {
    fn interval(&self) -> Duration {
        if self.once {
            Duration::ZERO
        } else {
            Duration::from_secs(self.watch)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let management = management_config(&args.config, &args.management)?;
    let client = ManagementClient::new(&management.params())?;

    let stdout = std::io::stdout();
    let options = MonitorOptions {
        interval: args.interval(),
        clear_screen: stdout.is_terminal(),
    };
    let stop = stop_on_ctrl_c("monitor");

    monitor::run(&client, &options, stop, &mut stdout.lock()).await?;
    Ok(())
}
