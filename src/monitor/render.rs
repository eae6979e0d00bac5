//! Plain-text report for one snapshot.

use std::fmt::Write;

use super::format::{format_bytes, format_number, format_uptime, percent};
use super::snapshot::{EventLog, Snapshot};

const RULE_WIDTH: usize = 65;

/// Render the summary, queue, consumer, connection and activity sections.
pub fn render(snapshot: &Snapshot, events: Option<&EventLog>) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_report(&mut out, snapshot, events);
    out
}

fn write_report(
    out: &mut String,
    snapshot: &Snapshot,
    events: Option<&EventLog>,
) -> std::fmt::Result {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "{}", rule)?;
    writeln!(out, "  RabbitMQ Monitor Summary")?;
    writeln!(out, "{}", rule)?;
    writeln!(
        out,
        "  Queues: {:<3}  Consumers: {:<3}  Connections: {:<3}",
        snapshot.queues.len(),
        snapshot.consumers.len(),
        snapshot.connections.len()
    )?;
    writeln!(
        out,
        "  Ready: {:>6}  Unacked: {:>6}  Active: {}/{}",
        format_number(snapshot.total_ready()),
        format_number(snapshot.total_unacked()),
        snapshot.active_queues(),
        snapshot.queues.len()
    )?;

    let r = &snapshot.resources;
    if r.is_known() {
        writeln!(out, "{}", rule)?;
        writeln!(
            out,
            "  Memory: {:>6} / {:<6} ({:>4.1}%)",
            format_bytes(r.memory_used),
            format_bytes(r.memory_limit),
            percent(r.memory_used, r.memory_limit)
        )?;
        writeln!(
            out,
            "  Disk Free: {:>8}  File Desc: {:>4}/{:<4} ({:>4.1}%)",
            format_bytes(r.disk_free),
            r.fd_used,
            r.fd_total,
            percent(r.fd_used, r.fd_total)
        )?;
        writeln!(
            out,
            "  Uptime: {:<8}  Sockets: {:>4}/{:<4}",
            format_uptime(r.uptime),
            r.sockets_used,
            r.sockets_total
        )?;
    }
    writeln!(out, "{}", rule)?;
    writeln!(out)?;

    if snapshot.queues.is_empty() {
        writeln!(out, "No queues found")?;
    } else {
        writeln!(out, "--- QUEUES ---")?;
        for q in &snapshot.queues {
            let mut activity = Vec::new();
            if q.is_publishing() {
                activity.push("Publishing");
            }
            if q.is_consuming() {
                activity.push("Consuming");
            }
            let activity = if activity.is_empty() {
                "Idle".to_string()
            } else {
                activity.join(", ")
            };

            writeln!(out, "{} {}  [{}]", q.backlog().marker(), q.name, activity)?;
            writeln!(
                out,
                "  Messages: Ready={:>6}  Unacked={:>6}  Total={:>6}",
                format_number(q.ready),
                format_number(q.unacked),
                format_number(q.total)
            )?;

            let mut rates = Vec::new();
            if q.publish_rate > 0.0 {
                rates.push(format!("Pub={:.1}/s", q.publish_rate));
            }
            if q.deliver_rate > 0.0 {
                rates.push(format!("Del={:.1}/s", q.deliver_rate));
            }
            if q.ack_rate > 0.0 {
                rates.push(format!("Ack={:.1}/s", q.ack_rate));
            }
            if !rates.is_empty() {
                writeln!(out, "  Activity: {}", rates.join("  "))?;
            }
            if q.consumers > 0 {
                writeln!(out, "  {} active consumer(s)", q.consumers)?;
            }
            writeln!(out)?;
        }
    }

    if snapshot.consumers.is_empty() {
        writeln!(out, "No active consumers")?;
    } else {
        writeln!(out, "--- CONSUMERS ({}) ---", snapshot.consumers.len())?;
        for c in &snapshot.consumers {
            writeln!(out, "  Queue: {}", c.queue)?;
            writeln!(out, "  Tag: {}", c.tag)?;
            writeln!(out, "  Connection: {}", c.connection)?;
            writeln!(out)?;
        }
    }

    if snapshot.connections.is_empty() {
        writeln!(out, "No active connections")?;
    } else {
        writeln!(out, "--- CONNECTIONS ({}) ---", snapshot.connections.len())?;
        for c in &snapshot.connections {
            writeln!(out, "  {}", c.display_name())?;
            writeln!(out, "  User: {}", c.user)?;
            writeln!(out)?;
        }
    }

    if let Some(log) = events.filter(|log| !log.is_empty()) {
        writeln!(out, "--- RECENT ACTIVITY (last {} events) ---", log.len())?;
        for line in log.iter() {
            writeln!(out, "  {}", line)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::snapshot::{
        Activity, ConnectionRow, ConsumerRow, QueueRow, Resources,
    };

    fn busy_snapshot() -> Snapshot {
        Snapshot {
            queues: vec![QueueRow {
                name: "work.queue".to_string(),
                ready: 1_500,
                unacked: 10,
                total: 1_510,
                publish_rate: 250.0,
                deliver_rate: 0.0,
                ack_rate: 12.3,
                consumers: 1,
            }],
            consumers: vec![ConsumerRow {
                queue: "work.queue".to_string(),
                tag: "warren-Worker".to_string(),
                connection: "Consumer Worker (box-1)".to_string(),
            }],
            connections: vec![ConnectionRow {
                name: "127.0.0.1:5000 -> 127.0.0.1:5672".to_string(),
                user: "guest".to_string(),
                client_name: String::new(),
            }],
            resources: Resources {
                memory_used: 128 * 1024 * 1024,
                memory_limit: 1024 * 1024 * 1024,
                uptime: 90 * 60 * 1000,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_empty_snapshot_sections() {
        let text = render(&Snapshot::default(), None);
        assert!(text.contains("Queues: 0"));
        assert!(text.contains("No queues found"));
        assert!(text.contains("No active consumers"));
        assert!(text.contains("No active connections"));
        assert!(!text.contains("Memory:"));
        assert!(!text.contains("RECENT ACTIVITY"));
    }

    #[test]
    fn test_busy_queue_lines() {
        let text = render(&busy_snapshot(), None);
        assert!(text.contains("[!] work.queue  [Publishing, Consuming]"));
        assert!(text.contains("Ready=  1.5K"));
        assert!(text.contains("Activity: Pub=250.0/s  Ack=12.3/s"));
        assert!(text.contains("1 active consumer(s)"));
        assert!(text.contains("Tag: warren-Worker"));
    }

    #[test]
    fn test_resources_shown_when_known() {
        let text = render(&busy_snapshot(), None);
        assert!(text.contains("Memory:  128MB / 1.0GB"));
        assert!(text.contains("(12.5%)"));
        assert!(text.contains("Uptime: 1h 30m"));
    }

    #[test]
    fn test_connection_falls_back_to_peer_name() {
        let text = render(&busy_snapshot(), None);
        assert!(text.contains("  127.0.0.1:5000 -> 127.0.0.1:5672\n"));
    }

    #[test]
    fn test_activity_section() {
        let mut log = EventLog::default();
        log.push("2026-01-01 10:00:00", &Activity::ConsumerConnected { total: 1 });
        let text = render(&busy_snapshot(), Some(&log));
        assert!(text.contains("--- RECENT ACTIVITY (last 1 events) ---"));
        assert!(text.contains("[2026-01-01 10:00:00] Consumer connected (total: 1)"));
    }
}
