//! Warren - RabbitMQ work queue toolkit
//!
//! Producer, consumer and monitor pipelines for exercising a durable work
//! queue: topology bootstrap, enveloped publishing, flow-controlled
//! consumption with manual acknowledgment, and management API reporting.

pub mod bus;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod monitor;
pub mod producer;
pub mod topology;
pub mod utils;
