//! Topology bootstrap: make sure the exchange, queues and bindings exist
//! before any traffic flows.
//!
//! The bootstrap first probes with passive declares so an existing queue is
//! never redeclared with different arguments. Only when something is missing
//! does it open a fresh channel (the failed probe closed the old one) and
//! declare everything actively.

use tracing::{debug, info};

use crate::bus::{
    BindingSpec, BrokerChannel, BrokerLink, BusError, ExchangeSpec, QueueSpec, Result,
};

/// Exchange, queues and bindings a pipeline works against.
///
/// The first queue is the primary queue; any further queues receive a copy
/// of every message through the same binding key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyDescriptor {
    /// `None` publishes through the default exchange.
    pub exchange: Option<ExchangeSpec>,
    pub queues: Vec<String>,
    pub routing_key: String,
    pub durable: bool,
    /// Request disk-backed (lazy) queues.
    pub lazy: bool,
}

impl TopologyDescriptor {
    /// A single queue on the default exchange.
    pub fn queue(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            exchange: None,
            routing_key: name.clone(),
            queues: vec![name],
            durable: true,
            lazy: false,
        }
    }

    /// Route through a durable direct exchange with the given binding key.
    pub fn with_exchange(
        mut self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        self.exchange = Some(ExchangeSpec::direct(exchange));
        self.routing_key = routing_key.into();
        self
    }

    /// Bind an additional queue to the same exchange and key.
    pub fn with_queue(mut self, name: impl Into<String>) -> Self {
        self.queues.push(name.into());
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// First queue of the descriptor; empty when there are none.
    pub fn primary_queue(&self) -> &str {
        self.queues.first().map(String::as_str).unwrap_or("")
    }

    /// Reject descriptors without a primary queue.
    pub fn validate(&self) -> Result<()> {
        if self.queues.is_empty() {
            return Err(BusError::Declare(
                "Topology must name at least one queue".to_string(),
            ));
        }
        Ok(())
    }

    /// Exchange name to publish to; empty for the default exchange.
    pub fn exchange_name(&self) -> &str {
        self.exchange.as_ref().map(|e| e.name.as_str()).unwrap_or("")
    }

    pub fn queue_specs(&self) -> Vec<QueueSpec> {
        self.queues
            .iter()
            .map(|name| QueueSpec::classic(name.clone(), self.durable, self.lazy))
            .collect()
    }

    pub fn bindings(&self) -> Vec<BindingSpec> {
        let Some(exchange) = &self.exchange else {
            return Vec::new();
        };
        self.queues
            .iter()
            .map(|queue| BindingSpec {
                queue: queue.clone(),
                exchange: exchange.name.clone(),
                routing_key: self.routing_key.clone(),
            })
            .collect()
    }
}

/// Ensure the topology exists and return the channel to use for it.
///
/// Returns `channel` unchanged when every entity already exists. Otherwise
/// returns a newly opened channel on `link` on which the topology was
/// declared. Errors other than a missing entity, and any failure of the
/// active declare, are returned as is.
pub async fn ensure(
    link: &dyn BrokerLink,
    channel: Box<dyn BrokerChannel>,
    topology: &TopologyDescriptor,
) -> Result<Box<dyn BrokerChannel>> {
    topology.validate()?;
    match probe(channel.as_ref(), topology).await {
        Ok(()) => {
            debug!(queue = %topology.primary_queue(), "Topology already present");
            Ok(channel)
        }
        Err(e) if e.is_not_found() => {
            info!(
                queue = %topology.primary_queue(),
                reason = %e,
                "Topology missing, declaring on a fresh channel"
            );
            let fresh = link.open_channel().await?;
            declare(fresh.as_ref(), topology).await?;
            Ok(fresh)
        }
        Err(e) => Err(e),
    }
}

async fn probe(channel: &dyn BrokerChannel, topology: &TopologyDescriptor) -> Result<()> {
    if let Some(exchange) = &topology.exchange {
        channel.declare_exchange(exchange, true).await?;
    }
    for queue in &topology.queues {
        channel.declare_queue(&QueueSpec::named(queue.clone()), true).await?;
    }
    Ok(())
}

/// Actively declare exchange, queues and bindings. Idempotent when the
/// broker already holds matching declarations.
pub async fn declare(channel: &dyn BrokerChannel, topology: &TopologyDescriptor) -> Result<()> {
    if let Some(exchange) = &topology.exchange {
        channel.declare_exchange(exchange, false).await?;
    }
    for spec in topology.queue_specs() {
        channel.declare_queue(&spec, false).await?;
        info!(
            queue = %spec.name,
            durable = spec.durable,
            lazy = topology.lazy,
            "Declared queue"
        );
    }
    for binding in topology.bindings() {
        channel.bind_queue(&binding).await?;
        debug!(
            queue = %binding.queue,
            exchange = %binding.exchange,
            routing_key = %binding.routing_key,
            "Bound queue to exchange"
        );
    }
    Ok(())
}
