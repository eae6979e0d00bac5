//! Broker link: connection, channels and the primitive broker operations.
//!
//! This module contains:
//! - `BrokerLink` trait: one logical connection that hands out channels
//! - `BrokerChannel` trait: declare, bind, purge, publish, prefetch, consume
//! - `DeliveryStream` trait: pull-based sequence of deliveries
//! - `DeliveryHandle`: channel-scoped token that must be acked or nacked once
//! - Implementations: AMQP (RabbitMQ via lapin), Mock (in-memory)

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use tracing::debug;

// Implementation modules
pub mod amqp;
pub mod mock;

// Re-exports
pub use amqp::{AmqpLink, LinkParams};
pub use mock::{MockBroker, MockLink};

/// Queue argument selecting the queue implementation.
pub const QUEUE_TYPE_ARG: &str = "x-queue-type";
/// Queue argument selecting the storage mode.
pub const QUEUE_MODE_ARG: &str = "x-queue-mode";
/// Classic queue type value.
pub const QUEUE_TYPE_CLASSIC: &str = "classic";
/// Disk-backed storage mode value.
pub const QUEUE_MODE_LAZY: &str = "lazy";

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Topology mismatch: {0}")]
    TopologyMismatch(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Declare failed: {0}")]
    Declare(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Ack failed: {0}")]
    Ack(String),
}

impl BusError {
    /// True when a passive declare reported the entity as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BusError::NotFound(_))
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// Exchange routing type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Topic,
    Fanout,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Fanout => "fanout",
        }
    }
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeSpec {
    /// Durable direct exchange.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
        }
    }
}

/// Queue declaration arguments (`x-queue-type`, `x-queue-mode`, ...).
pub type QueueArguments = BTreeMap<String, String>;

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub arguments: QueueArguments,
}

impl QueueSpec {
    /// Spec carrying only the name, for passive declares.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            arguments: QueueArguments::new(),
        }
    }

    /// Classic queue, optionally in lazy (disk-backed) mode.
    pub fn classic(name: impl Into<String>, durable: bool, lazy: bool) -> Self {
        let mut arguments = QueueArguments::new();
        arguments.insert(QUEUE_TYPE_ARG.to_string(), QUEUE_TYPE_CLASSIC.to_string());
        if lazy {
            arguments.insert(QUEUE_MODE_ARG.to_string(), QUEUE_MODE_LAZY.to_string());
        }
        Self {
            name: name.into(),
            durable,
            arguments,
        }
    }
}

/// Queue to exchange binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Queue state as reported by a declare.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

// ============================================================================
// Messages
// ============================================================================

/// AMQP delivery mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    #[default]
    Transient,
    Persistent,
}

impl DeliveryMode {
    pub fn from_durable(durable: bool) -> Self {
        if durable {
            DeliveryMode::Persistent
        } else {
            DeliveryMode::Transient
        }
    }

    /// Wire value: 1 = transient, 2 = persistent.
    pub fn as_u8(&self) -> u8 {
        match self {
            DeliveryMode::Transient => 1,
            DeliveryMode::Persistent => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(DeliveryMode::Transient),
            2 => Some(DeliveryMode::Persistent),
            _ => None,
        }
    }
}

/// Basic properties carried with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub delivery_mode: Option<DeliveryMode>,
    pub app_id: Option<String>,
    pub message_id: Option<String>,
    pub timestamp: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

impl MessageProperties {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Message as received from a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

// ============================================================================
// Deliveries
// ============================================================================

/// Completes a single delivery on the channel that delivered it.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn nack(&self, requeue: bool) -> Result<()>;
}

/// Token correlating a received message with its delivering channel.
///
/// `ack` and `nack` take the handle by value, so each delivery is completed
/// at most once.
pub struct DeliveryHandle {
    delivery_tag: u64,
    channel_id: u16,
    acker: Box<dyn Acknowledger>,
}

impl DeliveryHandle {
    pub fn new(delivery_tag: u64, channel_id: u16, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            delivery_tag,
            channel_id,
            acker,
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Channel the delivery arrived on.
    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// Positive acknowledgment: the broker may discard the message.
    pub async fn ack(self) -> Result<()> {
        debug!(
            channel = self.channel_id,
            delivery_tag = self.delivery_tag,
            "ack"
        );
        self.acker.ack().await
    }

    /// Negative acknowledgment; `requeue` returns the message to the queue.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        debug!(
            channel = self.channel_id,
            delivery_tag = self.delivery_tag,
            requeue,
            "nack"
        );
        self.acker.nack(requeue).await
    }
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryHandle")
            .field("delivery_tag", &self.delivery_tag)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

/// A received message together with the handle needed to complete it.
#[derive(Debug)]
pub struct Delivery {
    pub message: InboundMessage,
    pub handle: DeliveryHandle,
}

// ============================================================================
// Traits
// ============================================================================

/// Pull-based sequence of deliveries from one consumer.
///
/// Returns `None` once the consumer is cancelled or its channel or
/// connection closes.
#[async_trait]
pub trait DeliveryStream: Send {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

/// One multiplexed channel on a broker link.
///
/// Implementations:
/// - `AmqpChannel`: RabbitMQ via lapin
/// - `MockChannel`: In-memory broker for testing
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Channel number on the connection.
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    /// Declare an exchange, or with `passive` only check that it exists.
    async fn declare_exchange(&self, spec: &ExchangeSpec, passive: bool) -> Result<()>;

    /// Declare a queue, or with `passive` only check that it exists.
    ///
    /// A failed declare closes the channel; callers must open a new one.
    async fn declare_queue(&self, spec: &QueueSpec, passive: bool) -> Result<QueueInfo>;

    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()>;

    /// Remove all ready messages, returning how many were dropped.
    async fn purge_queue(&self, queue: &str) -> Result<u32>;

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutgoingMessage,
    ) -> Result<()>;

    /// Limit unacknowledged deliveries on this channel. Zero means unlimited.
    async fn set_prefetch(&self, count: u16) -> Result<()>;

    /// Start a manual-ack consumer on `queue`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn DeliveryStream>>;
}

/// A single logical connection to the broker.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>>;

    /// Close the connection. Closing an already closed link is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests;
