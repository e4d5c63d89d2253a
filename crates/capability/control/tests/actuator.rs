use async_trait::async_trait;
use domain::{CommandErrorMessage, RawMessage, TypedValue, ValueMessage, WireValue, from_epoch_ms};
use ems_bridge::{BridgeError, CommandKind, InboundCommand, OutboundMessage, Publisher};
use ems_codec::TypedCodec;
use ems_control::{ActuatorError, ActuatorFlow, ActuatorOutcome, ActuatorSettings};
use ems_protocol::{ReadMode, Transport, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DATAPOINTS: &str = r#"[
  { "key": "temp_1", "direction": "sensor", "data_format": "continuous_numeric" },
  { "key": "setpoint_1", "direction": "actuator", "data_format": "continuous_numeric",
    "min_value": 10, "max_value": 30,
    "wire": { "type": "modbus", "data_type": "int16", "scale": 0.1 } },
  { "key": "mode", "direction": "actuator", "data_format": "discrete_text",
    "allowed_values": ["auto", "manual"] }
]"#;

#[derive(Default)]
struct FakeTransport {
    writes: Mutex<Vec<(String, WireValue)>>,
    fail_writes: bool,
    stall_writes: bool,
    /// 未调用 `connect()` 时拒绝写入（模拟断线后清空的连接上下文）。
    needs_connect: bool,
    connected: AtomicBool,
    connects: AtomicUsize,
}

impl FakeTransport {
    fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Polled
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        Err(TransportError::NotConnected)
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        if self.stall_writes {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.needs_connect && !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        if self.fail_writes {
            return Err(TransportError::Connection("device offline".to_string()));
        }
        self.writes
            .lock()
            .expect("writes lock")
            .push((key.to_string(), value.clone()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingPublisher {
    fn topics(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .map(|message| message.topic.clone())
            .collect()
    }

    fn last_on(&self, topic: &str) -> Option<Vec<u8>> {
        self.sent
            .lock()
            .expect("sent lock")
            .iter()
            .rev()
            .find(|message| message.topic == topic)
            .map(|message| message.payload.clone())
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), BridgeError> {
        self.sent.lock().expect("sent lock").push(message);
        Ok(())
    }
}

fn flow(
    transport: Arc<FakeTransport>,
    publisher: Arc<RecordingPublisher>,
    ack: bool,
) -> ActuatorFlow {
    let codec = TypedCodec::from_json(DATAPOINTS).expect("codec");
    ActuatorFlow::new(
        transport,
        Arc::new(codec),
        publisher,
        ActuatorSettings {
            write_timeout: Duration::from_secs(1),
            ack,
        },
    )
}

fn command(key: &str, kind: CommandKind, payload: &str) -> InboundCommand {
    let base = format!("plant/{}", key);
    InboundCommand {
        topic: format!("{}/{}", base, kind.as_str()),
        base,
        kind,
        payload: payload.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn value_command_is_encoded_written_and_acknowledged() {
    let transport = Arc::new(FakeTransport::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher.clone(), true);

    let outcome = flow
        .execute(
            "setpoint_1",
            &command("setpoint_1", CommandKind::Value, r#"{"value": 21.5, "timestamp": 1}"#),
        )
        .await
        .expect("written");
    assert_eq!(outcome, ActuatorOutcome::Written(TypedValue::Number(21.5)));
    assert_eq!(
        transport.writes.lock().expect("writes").as_slice(),
        &[("setpoint_1".to_string(), WireValue::Registers(vec![215]))]
    );

    let ack: ValueMessage = serde_json::from_slice(
        &publisher
            .last_on("plant/setpoint_1/value/ack")
            .expect("ack published"),
    )
    .expect("ack json");
    assert_eq!(ack.value, TypedValue::Number(21.5));
}

#[tokio::test]
async fn out_of_range_setpoint_is_rejected_on_error_topic() {
    let transport = Arc::new(FakeTransport::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher.clone(), false);

    let err = flow
        .execute("setpoint_1", &command("setpoint_1", CommandKind::Value, "35"))
        .await
        .expect_err("out of range");
    assert!(err.is_rejection());
    assert!(transport.writes.lock().expect("writes").is_empty());

    let body: CommandErrorMessage = serde_json::from_slice(
        &publisher
            .last_on("plant/setpoint_1/value/error")
            .expect("error published"),
    )
    .expect("error json");
    assert!(body.error.contains("35 > max 30"), "{}", body.error);
    assert_eq!(publisher.topics(), vec!["plant/setpoint_1/value/error"]);
}

#[tokio::test]
async fn duplicate_delivery_writes_at_most_twice() {
    let transport = Arc::new(FakeTransport::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher, false);

    let delivered = command("mode", CommandKind::Value, "manual");
    for _ in 0..2 {
        flow.execute("mode", &delivered).await.expect("written");
    }
    let writes = transport.writes.lock().expect("writes");
    assert_eq!(writes.len(), 2);
    assert!(
        writes
            .iter()
            .all(|(key, value)| key == "mode" && *value == WireValue::Text("manual".to_string()))
    );
}

#[tokio::test]
async fn write_failure_is_reported_not_retried() {
    let transport = Arc::new(FakeTransport {
        fail_writes: true,
        ..FakeTransport::default()
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher.clone(), true);

    let err = flow
        .execute("mode", &command("mode", CommandKind::Value, "auto"))
        .await
        .expect_err("write failure");
    assert!(matches!(err, ActuatorError::Transport(_)));
    assert!(!err.is_rejection());
    assert_eq!(publisher.topics(), vec!["plant/mode/value/error"]);
}

#[tokio::test(start_paused = true)]
async fn stalled_write_times_out() {
    let transport = Arc::new(FakeTransport {
        stall_writes: true,
        ..FakeTransport::default()
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport, publisher, false);

    let err = flow
        .execute("mode", &command("mode", CommandKind::Value, "auto"))
        .await
        .expect_err("timeout");
    assert!(matches!(err, ActuatorError::Timeout(1000)));
}

#[tokio::test]
async fn schedule_is_validated_as_a_whole() {
    let transport = Arc::new(FakeTransport::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher.clone(), false);

    let payload = r#"{"schedule": [{"value": 20}, {"from_timestamp": 5000, "value": 45}]}"#;
    let err = flow
        .execute_at(
            "setpoint_1",
            &command("setpoint_1", CommandKind::Schedule, payload),
            from_epoch_ms(1_000).expect("ts"),
        )
        .await
        .expect_err("second item out of range");
    assert!(err.is_rejection());
    assert!(transport.writes.lock().expect("writes").is_empty());
    assert!(flow.plans().is_empty());
    assert_eq!(publisher.topics(), vec!["plant/setpoint_1/schedule/error"]);
}

#[tokio::test]
async fn setpoint_plan_applies_now_and_later() {
    let transport = Arc::new(FakeTransport::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher, false);

    let payload = r#"{"setpoint": [
        {"to_timestamp": 5000, "preferred_value": 18},
        {"from_timestamp": 5000, "preferred_value": 22}
    ], "timestamp": 900}"#;
    let outcome = flow
        .execute_at(
            "setpoint_1",
            &command("setpoint_1", CommandKind::Setpoint, payload),
            from_epoch_ms(1_000).expect("ts"),
        )
        .await
        .expect("scheduled");
    assert_eq!(
        outcome,
        ActuatorOutcome::Scheduled {
            applied: Some(TypedValue::Number(18.0)),
            pending: 2
        }
    );

    assert_eq!(flow.apply_due(from_epoch_ms(4_000).expect("ts")).await, 0);
    assert_eq!(flow.apply_due(from_epoch_ms(5_000).expect("ts")).await, 1);
    assert_eq!(
        transport.writes.lock().expect("writes").as_slice(),
        &[
            ("setpoint_1".to_string(), WireValue::Registers(vec![180])),
            ("setpoint_1".to_string(), WireValue::Registers(vec![220])),
        ]
    );

    // 直接写值会清除计划
    flow.execute("setpoint_1", &command("setpoint_1", CommandKind::Value, "19"))
        .await
        .expect("written");
    assert!(flow.plans().is_empty());
}

#[tokio::test]
async fn write_reconnects_a_dropped_link_before_writing() {
    let transport = Arc::new(FakeTransport {
        needs_connect: true,
        ..FakeTransport::default()
    });
    let publisher = Arc::new(RecordingPublisher::default());
    let mut flow = flow(transport.clone(), publisher.clone(), false);

    flow.execute("mode", &command("mode", CommandKind::Value, "auto"))
        .await
        .expect("first write connects");
    transport.drop_link();
    flow.execute("mode", &command("mode", CommandKind::Value, "manual"))
        .await
        .expect("write after link drop");

    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    assert_eq!(transport.writes.lock().expect("writes").len(), 2);
    assert!(publisher.topics().is_empty());
}
