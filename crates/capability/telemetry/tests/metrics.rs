use ems_telemetry::{ConnectorMetrics, metrics, new_cycle_id, record_parsed_values, record_raw_message};

#[test]
fn cycle_ids_are_unique() {
    let first = new_cycle_id();
    let second = new_cycle_id();
    assert!(!first.is_empty());
    assert_ne!(first, second);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_raw_message();
    record_parsed_values(3);
    let after = metrics().snapshot();
    assert!(after.raw_messages >= before.raw_messages + 1);
    assert!(after.parsed_values >= before.parsed_values + 3);
}

#[test]
fn fresh_metrics_start_at_zero() {
    let snapshot = ConnectorMetrics::new().snapshot();
    assert_eq!(snapshot.published_values, 0);
    assert_eq!(snapshot.reconnects, 0);
}
