//! Read-only monitor over the broker's management API.
//!
//! Polls the API, renders a plain-text report and, in watch mode, keeps a
//! short log of notable changes between polls.

pub mod format;
pub mod management;
pub mod render;
pub mod snapshot;

use std::io::Write;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

pub use management::{BrokerStats, ManagementClient, ManagementParams, StatsSource};
pub use snapshot::{Activity, ActivityTracker, EventLog, Snapshot};

/// ANSI sequence that clears the terminal and homes the cursor.
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// Errors raised by the monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Settings for a monitor run.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Delay between polls; zero polls once and exits.
    pub interval: Duration,
    /// Clear the terminal before each report in watch mode.
    pub clear_screen: bool,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            clear_screen: false,
        }
    }
}

/// Fetch one snapshot. A failed fetch is logged and yields `None`.
pub async fn poll(source: &dyn StatsSource) -> Option<Snapshot> {
    match source.fetch().await {
        Ok(stats) => Some(Snapshot::from_stats(stats)),
        Err(e) => {
            error!(error = %e, "Error contacting management API");
            None
        }
    }
}

/// Run the monitor, writing reports to `out`. Returns the number of polls.
///
/// In watch mode the loop runs until `stop` turns true. A failed poll
/// renders an empty report and leaves the change tracker untouched, so
/// a brief outage does not produce spurious activity.
pub async fn run<W: Write>(
    source: &dyn StatsSource,
    options: &MonitorOptions,
    mut stop: watch::Receiver<bool>,
    out: &mut W,
) -> Result<u64, MonitorError> {
    if options.interval.is_zero() {
        let snapshot = poll(source).await.unwrap_or_default();
        out.write_all(render::render(&snapshot, None).as_bytes())?;
        out.flush()?;
        return Ok(1);
    }

    info!(interval_secs = options.interval.as_secs_f64(), "Watching broker");

    let mut tracker = ActivityTracker::new();
    let mut events = EventLog::default();
    let mut polls = 0u64;

    while !*stop.borrow() {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let snapshot = match poll(source).await {
            Some(snapshot) => {
                for activity in tracker.observe(&snapshot) {
                    debug!(activity = %activity, "Broker activity");
                    events.push(&now, &activity);
                }
                snapshot
            }
            None => Snapshot::default(),
        };
        polls += 1;

        if options.clear_screen {
            out.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        writeln!(out, "Last updated: {}", now)?;
        out.write_all(render::render(&snapshot, Some(&events)).as_bytes())?;
        out.flush()?;

        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(options.interval) => {}
        }
    }

    writeln!(out, "Monitor stopped")?;
    out.flush()?;
    Ok(polls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::management::QueueStats;
    use crate::utils::bootstrap::stop_channel;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned poll results; requests a stop once they run out.
    struct ScriptedSource {
        results: Mutex<VecDeque<Result<BrokerStats, MonitorError>>>,
        stop: watch::Sender<bool>,
    }

    #[async_trait]
    impl StatsSource for ScriptedSource {
        async fn fetch(&self) -> Result<BrokerStats, MonitorError> {
            let mut results = self.results.lock().unwrap();
            let next = results
                .pop_front()
                .unwrap_or_else(|| Ok(BrokerStats::default()));
            if results.is_empty() {
                let _ = self.stop.send(true);
            }
            next
        }
    }

    fn stats(ready: u64) -> BrokerStats {
        BrokerStats {
            queues: vec![QueueStats {
                name: "work.queue".to_string(),
                messages_ready: ready,
                messages: ready,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn watch_options() -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(5),
            clear_screen: false,
        }
    }

    #[tokio::test]
    async fn test_once_renders_single_report() {
        let (tx, rx) = stop_channel();
        let source = ScriptedSource {
            results: Mutex::new(VecDeque::from(vec![Ok(stats(7))])),
            stop: tx,
        };
        let options = MonitorOptions {
            interval: Duration::ZERO,
            ..Default::default()
        };

        let mut out = Vec::new();
        let polls = run(&source, &options, rx, &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(polls, 1);
        assert!(text.contains("work.queue"));
        assert!(!text.contains("Last updated"));
        assert!(!text.contains("Monitor stopped"));
    }

    #[tokio::test]
    async fn test_watch_logs_activity_between_polls() {
        let (tx, rx) = stop_channel();
        let source = ScriptedSource {
            results: Mutex::new(VecDeque::from(vec![Ok(stats(0)), Ok(stats(5_000))])),
            stop: tx,
        };

        let mut out = Vec::new();
        let polls = run(&source, &watch_options(), rx, &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(polls, 2);
        assert!(text.contains("work.queue: +5.0K messages published"));
        assert!(text.ends_with("Monitor stopped\n"));
    }

    #[tokio::test]
    async fn test_failed_poll_renders_empty_report_and_keeps_state() {
        let (tx, rx) = stop_channel();
        let source = ScriptedSource {
            results: Mutex::new(VecDeque::from(vec![
                Ok(stats(40)),
                Err(MonitorError::Config("unreachable".to_string())),
                Ok(stats(40)),
            ])),
            stop: tx,
        };

        let mut out = Vec::new();
        let polls = run(&source, &watch_options(), rx, &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(polls, 3);
        assert!(text.contains("No queues found"));
        // The outage did not make the queue look new again.
        assert!(text.contains("(last 1 events)"));
        assert!(!text.contains("(last 2 events)"));
    }

    #[tokio::test]
    async fn test_stop_before_first_poll() {
        let (tx, rx) = stop_channel();
        tx.send(true).unwrap();
        let (unused_tx, _) = stop_channel();
        let source = ScriptedSource {
            results: Mutex::new(VecDeque::new()),
            stop: unused_tx,
        };

        let mut out = Vec::new();
        let polls = run(&source, &watch_options(), rx, &mut out)
            .await
            .unwrap();

        assert_eq!(polls, 0);
        assert_eq!(String::from_utf8(out).unwrap(), "Monitor stopped\n");
    }
}
