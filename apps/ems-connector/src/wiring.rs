//! 配置 -> 运行时组件。

use ems_bridge::BridgeConfig;
use ems_config::{ConfigError, ConnectorConfig, DispatchSetting, TransportKind};
use ems_control::ActuatorSettings;
use ems_pipeline::{ConnectorSettings, DispatchMode};
use ems_protocol::{
    HttpPollTransport, KnxIpTransport, ModbusTcpTransport, MqttUpstreamTransport, ReadMode,
    TcpClientTransport, Transport,
};
use std::sync::Arc;
use std::time::Duration;

/// event 调度下接收失败后的等待时间。
const EVENT_FAILURE_BACKOFF: Duration = Duration::from_secs(1);

/// 按 `EMS_TRANSPORT` 构造设备传输；配置错误在建立任何连接前返回。
pub fn build_transport(kind: TransportKind, json: &str) -> Result<Arc<dyn Transport>, ConfigError> {
    let invalid = |err: ems_protocol::TransportError| {
        ConfigError::Invalid("EMS_TRANSPORT_CONFIG".to_string(), err.to_string())
    };
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::ModbusTcp => Arc::new(ModbusTcpTransport::from_json(json).map_err(invalid)?),
        TransportKind::TcpClient => Arc::new(TcpClientTransport::from_json(json).map_err(invalid)?),
        TransportKind::Http => Arc::new(HttpPollTransport::from_json(json).map_err(invalid)?),
        TransportKind::Mqtt => Arc::new(MqttUpstreamTransport::from_json(json).map_err(invalid)?),
        TransportKind::Knx => Arc::new(KnxIpTransport::from_json(json).map_err(invalid)?),
    };
    Ok(transport)
}

/// 显式配置优先，否则跟随传输层的自然读取方式。
pub fn dispatch_mode(setting: Option<DispatchSetting>, read_mode: ReadMode, poll_interval_ms: u64) -> DispatchMode {
    let period = Duration::from_millis(poll_interval_ms);
    match setting {
        Some(DispatchSetting::Interval) => DispatchMode::Interval(period),
        Some(DispatchSetting::Event) => DispatchMode::Event,
        None => DispatchMode::natural(read_mode, period),
    }
}

pub fn bridge_config(config: &ConnectorConfig) -> BridgeConfig {
    BridgeConfig {
        client_id: format!("ems-connector-{}", config.connector_name),
        host: config.mqtt_host.clone(),
        port: config.mqtt_port,
        username: config.mqtt_username.clone(),
        password: config.mqtt_password.clone(),
        keep_alive_seconds: config.mqtt_keep_alive_seconds,
        channel_capacity: config.mqtt_channel_capacity,
        topic_root: config.mqtt_topic_root.clone(),
        reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        backlog_capacity: config.publish_backlog,
        heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
        event_capacity: config.event_queue,
    }
}

pub fn connector_settings(config: &ConnectorConfig, dispatch: DispatchMode) -> ConnectorSettings {
    ConnectorSettings {
        emitter: config.connector_name.clone(),
        dispatch,
        actuator: ActuatorSettings {
            write_timeout: Duration::from_millis(config.actuator_write_timeout_ms),
            ack: config.actuator_ack,
        },
        schedule_tick: Duration::from_millis(config.schedule_tick_ms),
        failure_backoff: EVENT_FAILURE_BACKOFF,
        command_queue: config.event_queue,
    }
}
