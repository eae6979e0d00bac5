//! RabbitMQ management HTTP API client.
//!
//! Reads queues, consumers, connections, the cluster overview and node
//! resource figures. The wire types accept partial documents: any missing
//! or oddly shaped field falls back to its default.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use super::MonitorError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deserialize `T`, substituting its default for null or mistyped values.
///
/// The management API reports some nested objects as `[]` when empty.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateDetails {
    pub rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessageStats {
    #[serde(deserialize_with = "lenient")]
    pub publish_details: RateDetails,
    #[serde(deserialize_with = "lenient")]
    pub deliver_get_details: RateDetails,
    #[serde(deserialize_with = "lenient")]
    pub ack_details: RateDetails,
}

/// Entry of `/api/queues`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub name: String,
    pub messages_ready: u64,
    pub messages_unacknowledged: u64,
    pub messages: u64,
    pub consumers: u32,
    #[serde(deserialize_with = "lenient")]
    pub message_stats: MessageStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueRef {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelDetails {
    pub connection_name: String,
}

/// Entry of `/api/consumers`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumerStats {
    #[serde(deserialize_with = "lenient")]
    pub queue: QueueRef,
    pub consumer_tag: String,
    #[serde(deserialize_with = "lenient")]
    pub channel_details: ChannelDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientProperties {
    pub connection_name: String,
}

/// Entry of `/api/connections`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionStats {
    pub name: String,
    pub user: String,
    #[serde(deserialize_with = "lenient")]
    pub client_properties: ClientProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueueTotals {
    pub messages: u64,
    pub messages_ready: u64,
    pub messages_unacknowledged: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ObjectTotals {
    pub queues: u64,
    pub connections: u64,
    pub channels: u64,
    pub consumers: u64,
}

/// `/api/overview`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Overview {
    #[serde(deserialize_with = "lenient")]
    pub queue_totals: QueueTotals,
    #[serde(deserialize_with = "lenient")]
    pub object_totals: ObjectTotals,
}

/// Entry of `/api/nodes`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeStats {
    pub name: String,
    pub mem_used: u64,
    pub mem_limit: u64,
    pub disk_free: u64,
    pub disk_free_limit: u64,
    pub fd_used: u64,
    pub fd_total: u64,
    pub sockets_used: u64,
    pub sockets_total: u64,
    pub proc_used: u64,
    pub proc_total: u64,
    /// Milliseconds.
    pub uptime: u64,
}

/// Everything one poll reads from the management API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrokerStats {
    pub queues: Vec<QueueStats>,
    pub consumers: Vec<ConsumerStats>,
    pub connections: Vec<ConnectionStats>,
    pub overview: Overview,
    pub nodes: Vec<NodeStats>,
}

/// Source of broker statistics for the monitor loop.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(&self) -> Result<BrokerStats, MonitorError>;
}

/// Management API connection settings.
#[derive(Debug, Clone)]
pub struct ManagementParams {
    /// Base URL, e.g. `http://localhost:15672`.
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

impl Default for ManagementParams {
    fn default() -> Self {
        Self {
            url: "http://localhost:15672".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// HTTP client for the management API.
pub struct ManagementClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl ManagementClient {
    pub fn new(params: &ManagementParams) -> Result<Self, MonitorError> {
        if params.url.trim().is_empty() {
            return Err(MonitorError::Config(
                "management URL not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(params.timeout)
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self {
            client,
            base_url: params.url.trim_end_matches('/').to_string(),
            username: params.username.clone(),
            password: params.password.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, MonitorError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?
            .error_for_status()?;

        let body = response.json::<T>().await?;
        debug!(url = %url, "Fetched management endpoint");
        Ok(body)
    }
}

#[async_trait]
impl StatsSource for ManagementClient {
    async fn fetch(&self) -> Result<BrokerStats, MonitorError> {
        let (queues, consumers, connections, overview, nodes) = tokio::try_join!(
            self.get::<Vec<QueueStats>>("/api/queues"),
            self.get::<Vec<ConsumerStats>>("/api/consumers"),
            self.get::<Vec<ConnectionStats>>("/api/connections"),
            self.get::<Overview>("/api/overview"),
            self.get::<Vec<NodeStats>>("/api/nodes"),
        )?;

        Ok(BrokerStats {
            queues,
            consumers,
            connections,
            overview,
            nodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_with_rates() {
        let raw = r#"{
            "name": "work.queue",
            "messages_ready": 10,
            "messages_unacknowledged": 3,
            "messages": 13,
            "consumers": 1,
            "message_stats": {
                "publish_details": {"rate": 120.5},
                "deliver_get_details": {"rate": 80.0},
                "ack_details": {"rate": 79.5}
            }
        }"#;
        let queue: QueueStats = serde_json::from_str(raw).unwrap();
        assert_eq!(queue.messages, 13);
        assert_eq!(queue.message_stats.publish_details.rate, 120.5);
        assert_eq!(queue.message_stats.ack_details.rate, 79.5);
    }

    #[test]
    fn test_idle_queue_without_stats_defaults_to_zero() {
        let queue: QueueStats = serde_json::from_str(r#"{"name": "idle"}"#).unwrap();
        assert_eq!(queue.messages_ready, 0);
        assert_eq!(queue.message_stats, MessageStats::default());
    }

    #[test]
    fn test_empty_list_in_place_of_object() {
        let raw = r#"{"queue": {"name": "q"}, "consumer_tag": "t", "channel_details": []}"#;
        let consumer: ConsumerStats = serde_json::from_str(raw).unwrap();
        assert_eq!(consumer.queue.name, "q");
        assert_eq!(consumer.channel_details.connection_name, "");
    }

    #[test]
    fn test_connection_name_from_client_properties() {
        let raw = r#"{
            "name": "127.0.0.1:5000 -> 127.0.0.1:5672",
            "user": "guest",
            "client_properties": {"connection_name": "Consumer Worker (box-1)", "product": "lapin"}
        }"#;
        let connection: ConnectionStats = serde_json::from_str(raw).unwrap();
        assert_eq!(
            connection.client_properties.connection_name,
            "Consumer Worker (box-1)"
        );
    }

    #[test]
    fn test_overview_totals() {
        let raw = r#"{
            "queue_totals": {"messages": 5, "messages_ready": 4, "messages_unacknowledged": 1},
            "object_totals": {"queues": 2, "connections": 3, "channels": 3, "consumers": 1},
            "rabbitmq_version": "3.13.0"
        }"#;
        let overview: Overview = serde_json::from_str(raw).unwrap();
        assert_eq!(overview.queue_totals.messages_ready, 4);
        assert_eq!(overview.object_totals.connections, 3);
    }

    #[test]
    fn test_client_rejects_empty_url() {
        let params = ManagementParams {
            url: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ManagementClient::new(&params),
            Err(MonitorError::Config(_))
        ));
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let params = ManagementParams {
            url: "http://rabbit:15672/".to_string(),
            ..Default::default()
        };
        let client = ManagementClient::new(&params).unwrap();
        assert_eq!(client.base_url(), "http://rabbit:15672");
    }
}
