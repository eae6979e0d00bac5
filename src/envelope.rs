//! Message envelope exchanged between producer and consumer.
//!
//! The body is a JSON record `{"n", "text", "sent_by"}`; identity and
//! correlation data travel in the basic properties and headers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bus::{DeliveryMode, InboundMessage, MessageProperties, OutgoingMessage};
use crate::utils::identity;

/// Content type of encoded envelopes.
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// `app_id` property set by the producer.
pub const PRODUCER_APP_ID: &str = "warren.producer";
/// Header naming the logical producer.
pub const PRODUCER_ID_HEADER: &str = "producer_id";
/// Header naming the producer's host.
pub const HOST_HEADER: &str = "host";

/// Structured message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Sequence number within the producing run.
    pub n: u64,
    pub text: String,
    pub sent_by: String,
}

/// Logical producer (user or service) plus the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerIdentity {
    pub producer_id: String,
    pub host: String,
}

impl ProducerIdentity {
    pub fn new(producer_id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            host: host.into(),
        }
    }

    /// Identity of the current OS user on this host.
    pub fn current() -> Self {
        Self::new(identity::current_user(), identity::hostname())
    }

    /// Identity with an explicit producer id on this host.
    pub fn on_this_host(producer_id: impl Into<String>) -> Self {
        Self::new(producer_id, identity::hostname())
    }
}

impl fmt::Display for ProducerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.producer_id, self.host)
    }
}

/// One unit of work as published by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sequence_number: u64,
    pub message_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub producer: ProducerIdentity,
    pub payload: Payload,
}

impl Envelope {
    /// Envelope with a fresh message id and the current time.
    pub fn new(sequence_number: u64, text: &str, producer: &ProducerIdentity) -> Self {
        let timestamp = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self {
            sequence_number,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            producer: producer.clone(),
            payload: Payload {
                n: sequence_number,
                text: text.to_string(),
                sent_by: producer.producer_id.clone(),
            },
        }
    }

    /// Encode to wire properties and a JSON body.
    pub fn to_message(&self, mode: DeliveryMode) -> Result<OutgoingMessage, serde_json::Error> {
        let body = serde_json::to_vec(&self.payload)?;

        let mut properties = MessageProperties {
            content_type: Some(CONTENT_TYPE_JSON.to_string()),
            delivery_mode: Some(mode),
            app_id: Some(PRODUCER_APP_ID.to_string()),
            message_id: Some(self.message_id.clone()),
            timestamp: Some(self.timestamp),
            ..Default::default()
        };
        properties.headers.insert(
            PRODUCER_ID_HEADER.to_string(),
            self.producer.producer_id.clone(),
        );
        properties
            .headers
            .insert(HOST_HEADER.to_string(), self.producer.host.clone());

        Ok(OutgoingMessage { properties, body })
    }
}

/// Result of decoding a message body. Decoding never fails: anything that is
/// not a structured payload is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBody {
    Structured(Payload),
    Raw(String),
}

impl DecodedBody {
    pub fn sequence_number(&self) -> Option<u64> {
        match self {
            DecodedBody::Structured(payload) => Some(payload.n),
            DecodedBody::Raw(_) => None,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            DecodedBody::Structured(payload) => &payload.text,
            DecodedBody::Raw(text) => text,
        }
    }
}

pub fn decode(body: &[u8]) -> DecodedBody {
    match serde_json::from_slice::<Payload>(body) {
        Ok(payload) => DecodedBody::Structured(payload),
        Err(_) => DecodedBody::Raw(String::from_utf8_lossy(body).into_owned()),
    }
}

/// What a consumer knows about a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedEnvelope {
    pub message_id: Option<String>,
    pub producer_id: Option<String>,
    pub host: Option<String>,
    pub timestamp: Option<u64>,
    pub redelivered: bool,
    pub body: DecodedBody,
}

impl ReceivedEnvelope {
    pub fn from_message(message: &InboundMessage) -> Self {
        let properties = &message.properties;
        Self {
            message_id: properties.message_id.clone(),
            producer_id: properties.header(PRODUCER_ID_HEADER).map(str::to_string),
            host: properties.header(HOST_HEADER).map(str::to_string),
            timestamp: properties.timestamp,
            redelivered: message.redelivered,
            body: decode(&message.body),
        }
    }
}
