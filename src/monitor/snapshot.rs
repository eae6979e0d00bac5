//! Point-in-time view of the broker and change detection between polls.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use super::format::format_number;
use super::management::BrokerStats;

/// Minimum change in a queue counter, in messages, worth an activity event.
pub const ACTIVITY_THRESHOLD: u64 = 100;
/// Number of activity events kept for display.
pub const EVENT_LOG_CAPACITY: usize = 10;

/// Queue backlog bucket, used as the status marker in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backlog {
    Empty,
    Low,
    High,
}

impl Backlog {
    pub fn of(ready: u64, unacked: u64) -> Self {
        match ready + unacked {
            0 => Backlog::Empty,
            n if n < 1_000 => Backlog::Low,
            _ => Backlog::High,
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Backlog::Empty => "[ ]",
            Backlog::Low => "[~]",
            Backlog::High => "[!]",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueRow {
    pub name: String,
    pub ready: u64,
    pub unacked: u64,
    pub total: u64,
    /// Messages per second.
    pub publish_rate: f64,
    pub deliver_rate: f64,
    pub ack_rate: f64,
    pub consumers: u32,
}

impl QueueRow {
    pub fn is_publishing(&self) -> bool {
        self.publish_rate > 0.0
    }

    pub fn is_consuming(&self) -> bool {
        self.deliver_rate > 0.0 || self.ack_rate > 0.0
    }

    pub fn is_active(&self) -> bool {
        self.publish_rate > 0.0 || self.deliver_rate > 0.0
    }

    pub fn backlog(&self) -> Backlog {
        Backlog::of(self.ready, self.unacked)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerRow {
    pub queue: String,
    pub tag: String,
    pub connection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRow {
    pub name: String,
    pub user: String,
    /// Client supplied label, if any.
    pub client_name: String,
}

impl ConnectionRow {
    pub fn display_name(&self) -> &str {
        if self.client_name.is_empty() {
            &self.name
        } else {
            &self.client_name
        }
    }
}

/// Node resources (first node) plus cluster-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    pub memory_used: u64,
    pub memory_limit: u64,
    pub disk_free: u64,
    pub disk_limit: u64,
    pub fd_used: u64,
    pub fd_total: u64,
    pub sockets_used: u64,
    pub sockets_total: u64,
    pub proc_used: u64,
    pub proc_total: u64,
    /// Milliseconds.
    pub uptime: u64,
    pub total_messages: u64,
    pub total_ready: u64,
    pub total_unacked: u64,
    pub total_queues: u64,
    pub total_connections: u64,
    pub total_channels: u64,
    pub total_consumers: u64,
}

impl Resources {
    /// Whether node figures were reported at all.
    pub fn is_known(&self) -> bool {
        self.memory_limit > 0 || self.uptime > 0
    }
}

/// Everything the monitor shows for one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Sorted by name.
    pub queues: Vec<QueueRow>,
    pub consumers: Vec<ConsumerRow>,
    pub connections: Vec<ConnectionRow>,
    pub resources: Resources,
}

impl Snapshot {
    pub fn from_stats(stats: BrokerStats) -> Self {
        let mut queues: Vec<QueueRow> = stats
            .queues
            .into_iter()
            .map(|q| QueueRow {
                name: q.name,
                ready: q.messages_ready,
                unacked: q.messages_unacknowledged,
                total: q.messages,
                publish_rate: q.message_stats.publish_details.rate,
                deliver_rate: q.message_stats.deliver_get_details.rate,
                ack_rate: q.message_stats.ack_details.rate,
                consumers: q.consumers,
            })
            .collect();
        queues.sort_by(|a, b| a.name.cmp(&b.name));

        let consumers = stats
            .consumers
            .into_iter()
            .map(|c| ConsumerRow {
                queue: c.queue.name,
                tag: c.consumer_tag,
                connection: c.channel_details.connection_name,
            })
            .collect();

        let connections = stats
            .connections
            .into_iter()
            .map(|c| ConnectionRow {
                name: c.name,
                user: c.user,
                client_name: c.client_properties.connection_name,
            })
            .collect();

        let node = stats.nodes.into_iter().next().unwrap_or_default();
        let totals = stats.overview.queue_totals;
        let objects = stats.overview.object_totals;
        let resources = Resources {
            memory_used: node.mem_used,
            memory_limit: node.mem_limit,
            disk_free: node.disk_free,
            disk_limit: node.disk_free_limit,
            fd_used: node.fd_used,
            fd_total: node.fd_total,
            sockets_used: node.sockets_used,
            sockets_total: node.sockets_total,
            proc_used: node.proc_used,
            proc_total: node.proc_total,
            uptime: node.uptime,
            total_messages: totals.messages,
            total_ready: totals.messages_ready,
            total_unacked: totals.messages_unacknowledged,
            total_queues: objects.queues,
            total_connections: objects.connections,
            total_channels: objects.channels,
            total_consumers: objects.consumers,
        };

        Self {
            queues,
            consumers,
            connections,
            resources,
        }
    }

    pub fn total_ready(&self) -> u64 {
        self.queues.iter().map(|q| q.ready).sum()
    }

    pub fn total_unacked(&self) -> u64 {
        self.queues.iter().map(|q| q.unacked).sum()
    }

    pub fn active_queues(&self) -> usize {
        self.queues.iter().filter(|q| q.is_active()).count()
    }
}

/// Notable change between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    Published { queue: String, delta: u64 },
    Consumed { queue: String, delta: u64 },
    UnackedGrew { queue: String, delta: u64 },
    Acknowledged { queue: String, delta: u64 },
    NewQueue { queue: String, total: u64 },
    ConsumerConnected { total: usize },
    ConsumerDisconnected { total: usize },
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Published { queue, delta } => {
                write!(f, "{}: +{} messages published", queue, format_number(*delta))
            }
            Activity::Consumed { queue, delta } => {
                write!(f, "{}: -{} messages consumed", queue, format_number(*delta))
            }
            Activity::UnackedGrew { queue, delta } => write!(
                f,
                "{}: +{} unacked (consumer active)",
                queue,
                format_number(*delta)
            ),
            Activity::Acknowledged { queue, delta } => write!(
                f,
                "{}: {} messages acknowledged",
                queue,
                format_number(*delta)
            ),
            Activity::NewQueue { queue, total } => write!(
                f,
                "{}: New queue created with {} messages",
                queue,
                format_number(*total)
            ),
            Activity::ConsumerConnected { total } => {
                write!(f, "Consumer connected (total: {})", total)
            }
            Activity::ConsumerDisconnected { total } => {
                write!(f, "Consumer disconnected (total: {})", total)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueCounters {
    ready: u64,
    unacked: u64,
}

/// Remembers the previous poll and reports what changed since.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    queues: HashMap<String, QueueCounters>,
    consumer_count: usize,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `snapshot` against the previous one and remember it.
    pub fn observe(&mut self, snapshot: &Snapshot) -> Vec<Activity> {
        let mut events = Vec::new();
        let mut current = HashMap::with_capacity(snapshot.queues.len());

        for queue in &snapshot.queues {
            let counters = QueueCounters {
                ready: queue.ready,
                unacked: queue.unacked,
            };
            current.insert(queue.name.clone(), counters);

            let Some(prev) = self.queues.get(&queue.name) else {
                if queue.total > 0 {
                    events.push(Activity::NewQueue {
                        queue: queue.name.clone(),
                        total: queue.total,
                    });
                }
                continue;
            };

            if counters.ready > prev.ready + ACTIVITY_THRESHOLD {
                events.push(Activity::Published {
                    queue: queue.name.clone(),
                    delta: counters.ready - prev.ready,
                });
            } else if counters.ready + ACTIVITY_THRESHOLD < prev.ready {
                events.push(Activity::Consumed {
                    queue: queue.name.clone(),
                    delta: prev.ready - counters.ready,
                });
            }

            if counters.unacked > prev.unacked + ACTIVITY_THRESHOLD {
                events.push(Activity::UnackedGrew {
                    queue: queue.name.clone(),
                    delta: counters.unacked - prev.unacked,
                });
            } else if counters.unacked + ACTIVITY_THRESHOLD < prev.unacked {
                events.push(Activity::Acknowledged {
                    queue: queue.name.clone(),
                    delta: prev.unacked - counters.unacked,
                });
            }
        }

        let consumer_count = snapshot.consumers.len();
        if consumer_count > self.consumer_count {
            events.push(Activity::ConsumerConnected {
                total: consumer_count,
            });
        } else if consumer_count < self.consumer_count {
            events.push(Activity::ConsumerDisconnected {
                total: consumer_count,
            });
        }

        self.queues = current;
        self.consumer_count = consumer_count;
        events
    }
}

/// Bounded, oldest-first log of timestamped activity lines.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, timestamp: &str, activity: &Activity) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(format!("[{}] {}", timestamp, activity));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::management::{
        ConsumerStats, MessageStats, NodeStats, QueueStats, RateDetails,
    };

    fn queue(name: &str, ready: u64, unacked: u64) -> QueueRow {
        QueueRow {
            name: name.to_string(),
            ready,
            unacked,
            total: ready + unacked,
            ..Default::default()
        }
    }

    fn snapshot(queues: Vec<QueueRow>, consumers: usize) -> Snapshot {
        Snapshot {
            queues,
            consumers: (0..consumers)
                .map(|i| ConsumerRow {
                    queue: "work.queue".to_string(),
                    tag: format!("tag-{}", i),
                    connection: "conn".to_string(),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_stats_sorts_queues_and_reads_first_node() {
        let stats = BrokerStats {
            queues: vec![
                QueueStats {
                    name: "zeta".to_string(),
                    ..Default::default()
                },
                QueueStats {
                    name: "alpha".to_string(),
                    messages_ready: 5,
                    message_stats: MessageStats {
                        publish_details: RateDetails { rate: 2.0 },
                        ..Default::default()
                    },
                    ..Default::default()
                },
            ],
            consumers: vec![ConsumerStats::default()],
            nodes: vec![
                NodeStats {
                    mem_used: 10,
                    mem_limit: 100,
                    ..Default::default()
                },
                NodeStats {
                    mem_used: 99,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let snapshot = Snapshot::from_stats(stats);
        let names: Vec<&str> = snapshot.queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(snapshot.active_queues(), 1);
        assert_eq!(snapshot.total_ready(), 5);
        assert_eq!(snapshot.resources.memory_used, 10);
        assert!(snapshot.resources.is_known());
    }

    #[test]
    fn test_empty_snapshot_has_unknown_resources() {
        assert!(!Snapshot::default().resources.is_known());
    }

    #[test]
    fn test_backlog_buckets() {
        assert_eq!(Backlog::of(0, 0), Backlog::Empty);
        assert_eq!(Backlog::of(500, 499), Backlog::Low);
        assert_eq!(Backlog::of(999, 1), Backlog::High);
    }

    #[test]
    fn test_first_poll_reports_new_queues_with_messages() {
        let mut tracker = ActivityTracker::new();
        let events = tracker.observe(&snapshot(
            vec![queue("empty", 0, 0), queue("work.queue", 40, 0)],
            1,
        ));
        assert_eq!(
            events,
            vec![
                Activity::NewQueue {
                    queue: "work.queue".to_string(),
                    total: 40
                },
                Activity::ConsumerConnected { total: 1 },
            ]
        );
    }

    #[test]
    fn test_changes_at_threshold_are_ignored() {
        let mut tracker = ActivityTracker::new();
        tracker.observe(&snapshot(vec![queue("q", 1_000, 200)], 0));
        let events = tracker.observe(&snapshot(vec![queue("q", 1_100, 100)], 0));
        assert!(events.is_empty());
    }

    #[test]
    fn test_published_and_unacked_growth() {
        let mut tracker = ActivityTracker::new();
        tracker.observe(&snapshot(vec![queue("q", 0, 0)], 0));
        let events = tracker.observe(&snapshot(vec![queue("q", 5_000, 250)], 0));
        assert_eq!(
            events,
            vec![
                Activity::Published {
                    queue: "q".to_string(),
                    delta: 5_000
                },
                Activity::UnackedGrew {
                    queue: "q".to_string(),
                    delta: 250
                },
            ]
        );
    }

    #[test]
    fn test_consumed_acknowledged_and_disconnect() {
        let mut tracker = ActivityTracker::new();
        tracker.observe(&snapshot(vec![queue("q", 5_000, 1_000)], 2));
        let events = tracker.observe(&snapshot(vec![queue("q", 1_000, 0)], 1));
        assert_eq!(
            events,
            vec![
                Activity::Consumed {
                    queue: "q".to_string(),
                    delta: 4_000
                },
                Activity::Acknowledged {
                    queue: "q".to_string(),
                    delta: 1_000
                },
                Activity::ConsumerDisconnected { total: 1 },
            ]
        );
    }

    #[test]
    fn test_activity_text() {
        let event = Activity::Published {
            queue: "work.queue".to_string(),
            delta: 12_500,
        };
        assert_eq!(event.to_string(), "work.queue: +12.5K messages published");
    }

    #[test]
    fn test_event_log_keeps_last_entries() {
        let mut log = EventLog::default();
        for total in 1..=12 {
            log.push("12:00:00", &Activity::ConsumerConnected { total });
        }
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(
            log.iter().next(),
            Some("[12:00:00] Consumer connected (total: 3)")
        );
    }
}
