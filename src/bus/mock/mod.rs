//! In-memory broker implementing the broker link contract.
//!
//! Models the parts of AMQP 0-9-1 the pipelines rely on: direct and default
//! exchange routing, passive/active declares that close the channel on
//! failure, per-channel prefetch, manual ack/nack with requeue, and
//! redelivery of unacknowledged messages when a channel closes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{
    Acknowledger, BindingSpec, BrokerChannel, BrokerLink, BusError, Delivery, DeliveryHandle,
    DeliveryStream, ExchangeSpec, InboundMessage, MessageProperties, OutgoingMessage, QueueInfo,
    QueueSpec, Result,
};

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    redelivered: bool,
    properties: MessageProperties,
    body: Vec<u8>,
}

struct MockQueue {
    spec: QueueSpec,
    ready: VecDeque<StoredMessage>,
    consumers: u32,
}

struct ChannelEntry {
    link_id: u64,
    open: Arc<AtomicBool>,
    prefetch: u16,
    in_flight: usize,
    max_in_flight: usize,
    consuming: Vec<String>,
}

struct Unacked {
    queue: String,
    message: StoredMessage,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeSpec>,
    queues: HashMap<String, MockQueue>,
    bindings: Vec<BindingSpec>,
    channels: HashMap<u16, ChannelEntry>,
    links: HashMap<u64, Arc<AtomicBool>>,
    unacked: HashMap<(u16, u64), Unacked>,
    next_channel_id: u16,
    next_link_id: u64,
    next_delivery_tag: u64,
    active_declares: usize,
    fail_on_publish: bool,
}

impl BrokerState {
    /// Close a channel and return its unacknowledged messages to their queues.
    fn close_channel(&mut self, channel_id: u16) {
        let Some(entry) = self.channels.get_mut(&channel_id) else {
            return;
        };
        if !entry.open.swap(false, Ordering::SeqCst) {
            return;
        }
        entry.in_flight = 0;
        let consuming = std::mem::take(&mut entry.consuming);
        for queue in consuming {
            if let Some(q) = self.queues.get_mut(&queue) {
                q.consumers = q.consumers.saturating_sub(1);
            }
        }

        let mut tags: Vec<u64> = self
            .unacked
            .keys()
            .filter(|(id, _)| *id == channel_id)
            .map(|(_, tag)| *tag)
            .collect();
        // Newest first so push_front restores delivery order.
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&(channel_id, tag)) {
                self.requeue(unacked);
            }
        }
        debug!(channel = channel_id, "Mock channel closed");
    }

    fn requeue(&mut self, unacked: Unacked) {
        if let Some(q) = self.queues.get_mut(&unacked.queue) {
            let mut message = unacked.message;
            message.redelivered = true;
            q.ready.push_front(message);
        }
    }

    fn channel_open(&self, channel_id: u16) -> bool {
        self.channels
            .get(&channel_id)
            .map(|c| c.open.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn ensure_open(&self, channel_id: u16) -> Result<()> {
        if self.channel_open(channel_id) {
            Ok(())
        } else {
            Err(BusError::ChannelClosed(format!(
                "channel {} is closed",
                channel_id
            )))
        }
    }

    fn route(&mut self, exchange: &str, routing_key: &str, message: &OutgoingMessage) -> usize {
        let targets: Vec<String> = if exchange.is_empty() {
            if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            }
        } else {
            self.bindings
                .iter()
                .filter(|b| b.exchange == exchange && b.routing_key == routing_key)
                .map(|b| b.queue.clone())
                .collect()
        };

        for target in &targets {
            if let Some(q) = self.queues.get_mut(target) {
                q.ready.push_back(StoredMessage {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    redelivered: false,
                    properties: message.properties.clone(),
                    body: message.body.clone(),
                });
            }
        }
        targets.len()
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
}

/// Ready/unacked counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    pub ready: usize,
    pub unacked: usize,
    pub consumers: u32,
}

/// In-memory broker. Cloning shares the same broker state.
#[derive(Clone)]
pub struct MockBroker {
    shared: Arc<Shared>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState {
                    next_channel_id: 1,
                    next_delivery_tag: 1,
                    ..Default::default()
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Open a new link (connection) to this broker.
    pub async fn connect(&self) -> MockLink {
        let mut state = self.shared.state.lock().await;
        let id = state.next_link_id;
        state.next_link_id += 1;
        let open = Arc::new(AtomicBool::new(true));
        state.links.insert(id, Arc::clone(&open));
        MockLink {
            shared: Arc::clone(&self.shared),
            id,
            open,
        }
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.shared.state.lock().await.fail_on_publish = fail;
    }

    /// Put a raw message straight onto a queue, bypassing exchanges.
    pub async fn inject(&self, queue: &str, properties: MessageProperties, body: &[u8]) -> bool {
        let mut state = self.shared.state.lock().await;
        let injected = match state.queues.get_mut(queue) {
            Some(q) => {
                q.ready.push_back(StoredMessage {
                    exchange: String::new(),
                    routing_key: queue.to_string(),
                    redelivered: false,
                    properties,
                    body: body.to_vec(),
                });
                true
            }
            None => false,
        };
        drop(state);
        self.shared.notify.notify_waiters();
        injected
    }

    pub async fn queue_depth(&self, queue: &str) -> Option<QueueDepth> {
        let state = self.shared.state.lock().await;
        let q = state.queues.get(queue)?;
        let unacked = state.unacked.values().filter(|u| u.queue == queue).count();
        Some(QueueDepth {
            ready: q.ready.len(),
            unacked,
            consumers: q.consumers,
        })
    }

    pub async fn queue_spec(&self, queue: &str) -> Option<QueueSpec> {
        let state = self.shared.state.lock().await;
        state.queues.get(queue).map(|q| q.spec.clone())
    }

    pub async fn has_exchange(&self, exchange: &str) -> bool {
        self.shared.state.lock().await.exchanges.contains_key(exchange)
    }

    pub async fn bindings(&self) -> Vec<BindingSpec> {
        self.shared.state.lock().await.bindings.clone()
    }

    /// Number of non-passive queue and exchange declares seen.
    pub async fn active_declares(&self) -> usize {
        self.shared.state.lock().await.active_declares
    }

    /// Highest unacked count ever held by a single channel.
    pub async fn max_in_flight(&self) -> usize {
        let state = self.shared.state.lock().await;
        state
            .channels
            .values()
            .map(|c| c.max_in_flight)
            .max()
            .unwrap_or(0)
    }

    /// Broker-initiated shutdown of every link and channel.
    pub async fn close_connections(&self) {
        let mut state = self.shared.state.lock().await;
        let ids: Vec<u16> = state.channels.keys().copied().collect();
        for id in ids {
            state.close_channel(id);
        }
        for open in state.links.values() {
            open.store(false, Ordering::SeqCst);
        }
        drop(state);
        self.shared.notify.notify_waiters();
    }
}

// ============================================================================
// Link
// ============================================================================

/// Connection to a `MockBroker`.
pub struct MockLink {
    shared: Arc<Shared>,
    id: u64,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn open_channel(&self) -> Result<Box<dyn BrokerChannel>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(BusError::Connection("connection is closed".to_string()));
        }
        let mut state = self.shared.state.lock().await;
        let id = state.next_channel_id;
        state.next_channel_id = state.next_channel_id.wrapping_add(1).max(1);
        let open = Arc::new(AtomicBool::new(true));
        state.channels.insert(
            id,
            ChannelEntry {
                link_id: self.id,
                open: Arc::clone(&open),
                prefetch: 0,
                in_flight: 0,
                max_in_flight: 0,
                consuming: Vec::new(),
            },
        );
        Ok(Box::new(MockChannel {
            shared: Arc::clone(&self.shared),
            id,
            open,
        }))
    }

    async fn close(&self) -> Result<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.shared.state.lock().await;
        let ids: Vec<u16> = state
            .channels
            .iter()
            .filter(|(_, c)| c.link_id == self.id)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            state.close_channel(id);
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Channel on a `MockLink`.
pub struct MockChannel {
    shared: Arc<Shared>,
    id: u16,
    open: Arc<AtomicBool>,
}

impl MockChannel {
    /// Close the channel with an error, as the broker does on a failed declare.
    fn fail(&self, state: &mut BrokerState, err: BusError) -> BusError {
        state.close_channel(self.id);
        self.shared.notify.notify_waiters();
        err
    }
}

#[async_trait]
impl BrokerChannel for MockChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec, passive: bool) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        let existing = state.exchanges.get(&spec.name).cloned();
        match existing {
            None if passive => Err(self.fail(
                &mut state,
                BusError::NotFound(format!("no exchange '{}'", spec.name)),
            )),
            Some(existing) if !passive && &existing != spec => Err(self.fail(
                &mut state,
                BusError::TopologyMismatch(format!(
                    "exchange '{}' exists with different settings",
                    spec.name
                )),
            )),
            Some(_) if passive => Ok(()),
            _ => {
                state.active_declares += 1;
                state
                    .exchanges
                    .entry(spec.name.clone())
                    .or_insert_with(|| spec.clone());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: &QueueSpec, passive: bool) -> Result<QueueInfo> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        let exists = state.queues.get(&spec.name).map(|q| q.spec.clone());
        match exists {
            None if passive => {
                return Err(self.fail(
                    &mut state,
                    BusError::NotFound(format!("no queue '{}'", spec.name)),
                ))
            }
            Some(existing)
                if !passive
                    && (existing.durable != spec.durable
                        || existing.arguments != spec.arguments) =>
            {
                return Err(self.fail(
                    &mut state,
                    BusError::TopologyMismatch(format!(
                        "queue '{}' exists with different arguments",
                        spec.name
                    )),
                ))
            }
            Some(_) => {
                if !passive {
                    state.active_declares += 1;
                }
            }
            None => {
                state.active_declares += 1;
                state.queues.insert(
                    spec.name.clone(),
                    MockQueue {
                        spec: spec.clone(),
                        ready: VecDeque::new(),
                        consumers: 0,
                    },
                );
            }
        }

        let q = &state.queues[&spec.name];
        Ok(QueueInfo {
            name: spec.name.clone(),
            message_count: q.ready.len() as u32,
            consumer_count: q.consumers,
        })
    }

    async fn bind_queue(&self, binding: &BindingSpec) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        if !state.queues.contains_key(&binding.queue) {
            return Err(self.fail(
                &mut state,
                BusError::NotFound(format!("no queue '{}'", binding.queue)),
            ));
        }
        if !state.exchanges.contains_key(&binding.exchange) {
            return Err(self.fail(
                &mut state,
                BusError::NotFound(format!("no exchange '{}'", binding.exchange)),
            ));
        }
        if !state.bindings.contains(binding) {
            state.bindings.push(binding.clone());
        }
        Ok(())
    }

    async fn purge_queue(&self, queue: &str) -> Result<u32> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        match state.queues.get_mut(queue) {
            Some(q) => {
                let purged = q.ready.len() as u32;
                q.ready.clear();
                Ok(purged)
            }
            None => Err(self.fail(
                &mut state,
                BusError::NotFound(format!("no queue '{}'", queue)),
            )),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &OutgoingMessage,
    ) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        if state.fail_on_publish {
            return Err(BusError::Publish("Mock publish failure".to_string()));
        }
        if !exchange.is_empty() && !state.exchanges.contains_key(exchange) {
            return Err(self.fail(
                &mut state,
                BusError::NotFound(format!("no exchange '{}'", exchange)),
            ));
        }

        let routed = state.route(exchange, routing_key, message);
        if routed == 0 {
            debug!(exchange = %exchange, routing_key = %routing_key, "Mock message unroutable, dropped");
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;
        if let Some(entry) = state.channels.get_mut(&self.id) {
            entry.prefetch = count;
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<Box<dyn DeliveryStream>> {
        let mut state = self.shared.state.lock().await;
        state.ensure_open(self.id)?;

        match state.queues.get_mut(queue) {
            Some(q) => q.consumers += 1,
            None => {
                return Err(self.fail(
                    &mut state,
                    BusError::NotFound(format!("no queue '{}'", queue)),
                ))
            }
        }
        if let Some(entry) = state.channels.get_mut(&self.id) {
            entry.consuming.push(queue.to_string());
        }

        debug!(queue = %queue, consumer_tag = %consumer_tag, channel = self.id, "Mock consumer started");

        Ok(Box::new(MockDeliveryStream {
            shared: Arc::clone(&self.shared),
            channel_id: self.id,
            queue: queue.to_string(),
        }))
    }
}

// ============================================================================
// Deliveries
// ============================================================================

struct MockDeliveryStream {
    shared: Arc<Shared>,
    channel_id: u16,
    queue: String,
}

impl MockDeliveryStream {
    /// Take the next ready message if the prefetch window allows it.
    ///
    /// `Err(())` means the channel is gone and the stream has ended.
    fn try_take(&self, state: &mut BrokerState) -> std::result::Result<Option<Delivery>, ()> {
        if !state.channel_open(self.channel_id) {
            return Err(());
        }
        let Some(entry) = state.channels.get(&self.channel_id) else {
            return Err(());
        };
        if entry.prefetch != 0 && entry.in_flight >= usize::from(entry.prefetch) {
            return Ok(None);
        }
        let Some(message) = state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.ready.pop_front())
        else {
            return Ok(None);
        };

        let tag = state.next_delivery_tag;
        state.next_delivery_tag += 1;
        if let Some(entry) = state.channels.get_mut(&self.channel_id) {
            entry.in_flight += 1;
            entry.max_in_flight = entry.max_in_flight.max(entry.in_flight);
        }
        state.unacked.insert(
            (self.channel_id, tag),
            Unacked {
                queue: self.queue.clone(),
                message: message.clone(),
            },
        );

        let inbound = InboundMessage {
            exchange: message.exchange,
            routing_key: message.routing_key,
            redelivered: message.redelivered,
            properties: message.properties,
            body: message.body,
        };
        let handle = DeliveryHandle::new(
            tag,
            self.channel_id,
            Box::new(MockAcker {
                shared: Arc::clone(&self.shared),
                channel_id: self.channel_id,
                delivery_tag: tag,
            }),
        );
        Ok(Some(Delivery {
            message: inbound,
            handle,
        }))
    }
}

#[async_trait]
impl DeliveryStream for MockDeliveryStream {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                match self.try_take(&mut state) {
                    Ok(Some(delivery)) => return Some(Ok(delivery)),
                    Ok(None) => {}
                    Err(()) => return None,
                }
            }

            notified.await;
        }
    }
}

struct MockAcker {
    shared: Arc<Shared>,
    channel_id: u16,
    delivery_tag: u64,
}

impl MockAcker {
    async fn complete(&self, requeue: Option<bool>) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        if !state.channel_open(self.channel_id) {
            return Err(BusError::Ack(format!(
                "channel {} is closed",
                self.channel_id
            )));
        }
        let unacked = state
            .unacked
            .remove(&(self.channel_id, self.delivery_tag))
            .ok_or_else(|| {
                BusError::Ack(format!("unknown delivery tag {}", self.delivery_tag))
            })?;
        if let Some(entry) = state.channels.get_mut(&self.channel_id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        if requeue == Some(true) {
            state.requeue(unacked);
        }
        drop(state);
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MockAcker {
    async fn ack(&self) -> Result<()> {
        self.complete(None).await
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        self.complete(Some(requeue)).await
    }
}
