use ems_config::{ConfigError, ConnectorConfig, DispatchSetting, TransportKind};
use std::collections::HashMap;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

const BASE: [(&str, &str); 4] = [
    ("EMS_CONNECTOR_NAME", "modbus-plant"),
    ("EMS_TRANSPORT", "modbus_tcp"),
    ("EMS_TRANSPORT_CONFIG", r#"{"host":"10.0.0.2","points":[]}"#),
    ("EMS_DATAPOINTS", "[]"),
];

#[test]
fn load_config_with_defaults() {
    let config = ConnectorConfig::from_lookup(lookup_from(&BASE)).expect("config");
    assert_eq!(config.connector_name, "modbus-plant");
    assert_eq!(config.transport, TransportKind::ModbusTcp);
    assert_eq!(config.mqtt_topic_root, "modbus-plant");
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.heartbeat_interval_seconds, 30);
    assert_eq!(config.poll_interval_ms, 5000);
    assert!(config.dispatch_mode.is_none());
    assert!(!config.actuator_ack);
    assert!(config.status_addr.is_none());
}

#[test]
fn load_config_overrides() {
    let mut pairs = BASE.to_vec();
    pairs.extend([
        ("EMS_MQTT_TOPIC_ROOT", "/site/plant/"),
        ("EMS_MQTT_PORT", "8883"),
        ("EMS_DISPATCH_MODE", "event"),
        ("EMS_ACTUATOR_ACK", "on"),
        ("EMS_STATUS_ADDR", "127.0.0.1:8090"),
    ]);
    let config = ConnectorConfig::from_lookup(lookup_from(&pairs)).expect("config");
    assert_eq!(config.mqtt_topic_root, "site/plant");
    assert_eq!(config.mqtt_port, 8883);
    assert_eq!(config.dispatch_mode, Some(DispatchSetting::Event));
    assert!(config.actuator_ack);
    assert_eq!(config.status_addr.as_deref(), Some("127.0.0.1:8090"));
}

#[test]
fn missing_connector_name_is_fatal() {
    let pairs: Vec<_> = BASE
        .iter()
        .copied()
        .filter(|(key, _)| *key != "EMS_CONNECTOR_NAME")
        .collect();
    let err = ConnectorConfig::from_lookup(lookup_from(&pairs)).expect_err("missing");
    assert!(matches!(err, ConfigError::Missing(ref key) if key == "EMS_CONNECTOR_NAME"));
}

#[test]
fn invalid_values_are_rejected() {
    let mut pairs = BASE.to_vec();
    pairs.push(("EMS_POLL_INTERVAL_MS", "0"));
    let err = ConnectorConfig::from_lookup(lookup_from(&pairs)).expect_err("zero period");
    assert_eq!(err.to_string(), "invalid value for EMS_POLL_INTERVAL_MS: 0");

    let mut pairs = BASE.to_vec();
    pairs[1] = ("EMS_TRANSPORT", "bacnet");
    let err = ConnectorConfig::from_lookup(lookup_from(&pairs)).expect_err("transport");
    assert!(matches!(err, ConfigError::Invalid(ref key, _) if key == "EMS_TRANSPORT"));

    let mut pairs = BASE.to_vec();
    pairs[0] = ("EMS_CONNECTOR_NAME", "plant/#");
    assert!(ConnectorConfig::from_lookup(lookup_from(&pairs)).is_err());
}

#[test]
fn datapoints_file_is_required_without_inline_json() {
    let pairs: Vec<_> = BASE
        .iter()
        .copied()
        .filter(|(key, _)| *key != "EMS_DATAPOINTS")
        .collect();
    let err = ConnectorConfig::from_lookup(lookup_from(&pairs)).expect_err("missing");
    assert!(matches!(err, ConfigError::Missing(_)));
}
