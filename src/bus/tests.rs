use super::*;

#[test]
fn test_classic_queue_arguments() {
    let spec = QueueSpec::classic("work.queue", true, false);
    assert!(spec.durable);
    assert_eq!(
        spec.arguments.get(QUEUE_TYPE_ARG).map(String::as_str),
        Some(QUEUE_TYPE_CLASSIC)
    );
    assert!(!spec.arguments.contains_key(QUEUE_MODE_ARG));
}

#[test]
fn test_lazy_queue_arguments() {
    let spec = QueueSpec::classic("work.queue", false, true);
    assert_eq!(
        spec.arguments.get(QUEUE_MODE_ARG).map(String::as_str),
        Some(QUEUE_MODE_LAZY)
    );
}

#[test]
fn test_named_queue_spec_has_no_arguments() {
    let spec = QueueSpec::named("work.queue");
    assert!(spec.arguments.is_empty());
}

#[test]
fn test_delivery_mode_wire_values() {
    assert_eq!(DeliveryMode::from_durable(true).as_u8(), 2);
    assert_eq!(DeliveryMode::from_durable(false).as_u8(), 1);
    assert_eq!(DeliveryMode::from_u8(2), Some(DeliveryMode::Persistent));
    assert_eq!(DeliveryMode::from_u8(9), None);
}

#[test]
fn test_direct_exchange_is_durable() {
    let spec = ExchangeSpec::direct("direct.exchange");
    assert_eq!(spec.kind, ExchangeKind::Direct);
    assert_eq!(spec.kind.as_str(), "direct");
    assert!(spec.durable);
}

#[test]
fn test_not_found_classification() {
    assert!(BusError::NotFound("q".to_string()).is_not_found());
    assert!(!BusError::TopologyMismatch("q".to_string()).is_not_found());
}

#[test]
fn test_header_lookup() {
    let mut properties = MessageProperties::default();
    properties
        .headers
        .insert("producer_id".to_string(), "alice".to_string());
    assert_eq!(properties.header("producer_id"), Some("alice"));
    assert_eq!(properties.header("host"), None);
}
