//! Producer, consumer and topology working together on the in-memory broker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use warren::bus::{BrokerLink, MockBroker};
use warren::consumer::{self, ConsumerOptions, DeliveryHandler, HandlerError, StopReason};
use warren::envelope::{ProducerIdentity, ReceivedEnvelope};
use warren::producer::{self, ProducerOptions};
use warren::topology::{self, TopologyDescriptor};
use warren::utils::bootstrap::stop_channel;

fn work_topology() -> TopologyDescriptor {
    TopologyDescriptor::queue("work.queue")
        .with_exchange("direct.exchange", "work")
        .with_queue("audit.queue")
}

async fn produce(broker: &MockBroker, count: u64) {
    let link = broker.connect().await;
    let channel = link.open_channel().await.unwrap();
    let channel = topology::ensure(&link, channel, &work_topology())
        .await
        .unwrap();
    let options = ProducerOptions {
        count,
        durable: true,
        progress_every: 0,
        identity: ProducerIdentity::new("alice", "box-1"),
        ..Default::default()
    };
    producer::run(channel.as_ref(), &work_topology(), &options)
        .await
        .unwrap();
    link.close().await.unwrap();
}

/// Counts deliveries across workers and requests a stop at `target`.
struct SharedCounter {
    handled: AtomicU64,
    target: u64,
    stop: watch::Sender<bool>,
}

#[async_trait]
impl DeliveryHandler for SharedCounter {
    async fn handle(&self, _seen: u64, envelope: &ReceivedEnvelope) -> Result<(), HandlerError> {
        if envelope.producer_id.as_deref() != Some("alice") {
            return Err(HandlerError::Failed("unknown producer".to_string()));
        }
        if self.handled.fetch_add(1, Ordering::SeqCst) + 1 >= self.target {
            let _ = self.stop.send(true);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_competing_consumers_share_the_queue() {
    let broker = MockBroker::new();
    produce(&broker, 200).await;

    let (tx, rx) = stop_channel();
    let handler = Arc::new(SharedCounter {
        handled: AtomicU64::new(0),
        target: 200,
        stop: tx,
    });

    let mut workers = Vec::new();
    for name in ["A", "B"] {
        let broker = broker.clone();
        let handler = Arc::clone(&handler);
        let stop = rx.clone();
        workers.push(tokio::spawn(async move {
            let link = broker.connect().await;
            let channel = link.open_channel().await.unwrap();
            let channel = topology::ensure(&link, channel, &TopologyDescriptor::queue("work.queue"))
                .await
                .unwrap();
            let options = ConsumerOptions {
                name: name.to_string(),
                queue: "work.queue".to_string(),
                prefetch: 5,
                expect: None,
                progress_every: 0,
            };
            consumer::run(&link, channel.as_ref(), &options, handler.as_ref(), stop)
                .await
                .unwrap()
        }));
    }

    let mut acked = 0;
    for worker in workers {
        let report = worker.await.unwrap();
        assert_eq!(report.stop_reason, StopReason::Interrupted);
        assert_eq!(report.nacked, 0);
        acked += report.acked;
    }

    assert_eq!(acked, 200);
    let work = broker.queue_depth("work.queue").await.unwrap();
    assert_eq!((work.ready, work.unacked, work.consumers), (0, 0, 0));
    // The audit copy is untouched by the workers.
    assert_eq!(broker.queue_depth("audit.queue").await.unwrap().ready, 200);
    assert!(broker.max_in_flight().await <= 5);
}

#[tokio::test]
async fn test_consumer_first_then_producer() {
    let broker = MockBroker::new();

    // A consumer that starts first creates the queue on its own.
    let link = broker.connect().await;
    let channel = link.open_channel().await.unwrap();
    let channel = topology::ensure(&link, channel, &TopologyDescriptor::queue("work.queue"))
        .await
        .unwrap();

    // The producer still declares its exchange and binds the existing queue.
    produce(&broker, 10).await;
    assert!(broker.has_exchange("direct.exchange").await);

    let (tx, rx) = stop_channel();
    let handler = SharedCounter {
        handled: AtomicU64::new(0),
        target: u64::MAX,
        stop: tx,
    };
    let options = ConsumerOptions {
        name: "late".to_string(),
        queue: "work.queue".to_string(),
        prefetch: 100,
        expect: Some(10),
        progress_every: 0,
    };
    let report = consumer::run(&link, channel.as_ref(), &options, &handler, rx)
        .await
        .unwrap();

    assert_eq!(report.acked, 10);
    assert_eq!(report.stop_reason, StopReason::Expected);
}

#[tokio::test]
async fn test_purging_run_replaces_backlog() {
    let broker = MockBroker::new();
    produce(&broker, 30).await;

    let link = broker.connect().await;
    let channel = link.open_channel().await.unwrap();
    let channel = topology::ensure(&link, channel, &work_topology())
        .await
        .unwrap();
    let options = ProducerOptions {
        count: 5,
        purge: true,
        progress_every: 0,
        identity: ProducerIdentity::new("alice", "box-1"),
        ..Default::default()
    };
    let report = producer::run(channel.as_ref(), &work_topology(), &options)
        .await
        .unwrap();

    assert_eq!(report.purged, 60);
    assert_eq!(report.ready_after, 5);
    assert_eq!(broker.queue_depth("audit.queue").await.unwrap().ready, 5);
}
