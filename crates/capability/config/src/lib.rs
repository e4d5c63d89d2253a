//! 连接器运行配置加载。
//!
//! 配置只在启动时读取一次；任何错误都属于致命的配置错误，进程应在建立连接前以非零码退出。

use std::env;
use std::fmt;
use std::str::FromStr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 设备传输类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ModbusTcp,
    TcpClient,
    Http,
    Mqtt,
    Knx,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "modbus_tcp" | "modbus" => Ok(Self::ModbusTcp),
            "tcp_client" | "socket" => Ok(Self::TcpClient),
            "http" => Ok(Self::Http),
            "mqtt" => Ok(Self::Mqtt),
            "knx" | "knx_ip" => Ok(Self::Knx),
            other => Err(format!("unknown transport: {}", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TransportKind::ModbusTcp => "modbus_tcp",
            TransportKind::TcpClient => "tcp_client",
            TransportKind::Http => "http",
            TransportKind::Mqtt => "mqtt",
            TransportKind::Knx => "knx",
        };
        f.write_str(text)
    }
}

/// 调度方式。未配置时由传输层的自然模式决定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSetting {
    Interval,
    Event,
}

impl FromStr for DispatchSetting {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(Self::Interval),
            "event" => Ok(Self::Event),
            other => Err(format!("unknown dispatch mode: {}", other)),
        }
    }
}

/// 连接器运行配置。
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub connector_name: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_root: String,
    pub mqtt_keep_alive_seconds: u64,
    pub mqtt_channel_capacity: usize,
    pub heartbeat_interval_seconds: u64,
    pub reconnect_delay_ms: u64,
    pub publish_backlog: usize,
    pub event_queue: usize,
    pub poll_interval_ms: u64,
    pub dispatch_mode: Option<DispatchSetting>,
    pub transport: TransportKind,
    /// 传输层配置（JSON），由对应适配器解析。
    pub transport_config: String,
    /// 数据点配置（JSON 数组），由编解码器解析。
    pub datapoints: String,
    pub actuator_write_timeout_ms: u64,
    pub actuator_ack: bool,
    pub schedule_tick_ms: u64,
    pub status_addr: Option<String>,
    pub log_retention: usize,
}

impl ConnectorConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（便于测试）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let connector_name = read_required(&lookup, "EMS_CONNECTOR_NAME")?;
        ensure_topic_segment("EMS_CONNECTOR_NAME", &connector_name)?;
        let transport = read_parsed::<TransportKind, _>(&lookup, "EMS_TRANSPORT")?;
        let transport_config = read_required(&lookup, "EMS_TRANSPORT_CONFIG")?;
        let datapoints = match read_optional(&lookup, "EMS_DATAPOINTS") {
            Some(value) => value,
            None => {
                let path = read_optional(&lookup, "EMS_DATAPOINTS_FILE").ok_or_else(|| {
                    ConfigError::Missing("EMS_DATAPOINTS or EMS_DATAPOINTS_FILE".to_string())
                })?;
                std::fs::read_to_string(&path).map_err(|err| {
                    ConfigError::Invalid("EMS_DATAPOINTS_FILE".to_string(), format!("{}: {}", path, err))
                })?
            }
        };

        let mqtt_host = read_optional(&lookup, "EMS_MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = read_with_default(&lookup, "EMS_MQTT_PORT", 1883u16)?;
        let mqtt_username = read_optional(&lookup, "EMS_MQTT_USERNAME");
        let mqtt_password = read_optional(&lookup, "EMS_MQTT_PASSWORD");
        let mqtt_topic_root = read_optional(&lookup, "EMS_MQTT_TOPIC_ROOT")
            .map(|root| root.trim_matches('/').to_string())
            .unwrap_or_else(|| connector_name.clone());
        if mqtt_topic_root.is_empty() || mqtt_topic_root.contains(['+', '#']) {
            return Err(ConfigError::Invalid(
                "EMS_MQTT_TOPIC_ROOT".to_string(),
                mqtt_topic_root,
            ));
        }
        let mqtt_keep_alive_seconds = read_with_default(&lookup, "EMS_MQTT_KEEP_ALIVE_SECONDS", 30u64)?;
        let mqtt_channel_capacity = read_with_default(&lookup, "EMS_MQTT_CHANNEL_CAPACITY", 64usize)?;
        let heartbeat_interval_seconds =
            read_positive(&lookup, "EMS_HEARTBEAT_INTERVAL_SECONDS", 30u64)?;
        let reconnect_delay_ms = read_with_default(&lookup, "EMS_RECONNECT_DELAY_MS", 1000u64)?;
        let publish_backlog = read_with_default(&lookup, "EMS_PUBLISH_BACKLOG", 1000usize)?;
        let event_queue = read_positive(&lookup, "EMS_EVENT_QUEUE", 256usize)?;
        let poll_interval_ms = read_positive(&lookup, "EMS_POLL_INTERVAL_MS", 5000u64)?;
        let dispatch_mode = match read_optional(&lookup, "EMS_DISPATCH_MODE") {
            Some(value) => Some(
                value
                    .parse::<DispatchSetting>()
                    .map_err(|_| ConfigError::Invalid("EMS_DISPATCH_MODE".to_string(), value))?,
            ),
            None => None,
        };
        let actuator_write_timeout_ms =
            read_positive(&lookup, "EMS_ACTUATOR_WRITE_TIMEOUT_MS", 5000u64)?;
        let actuator_ack = read_bool_with_default(&lookup, "EMS_ACTUATOR_ACK", false);
        let schedule_tick_ms = read_positive(&lookup, "EMS_SCHEDULE_TICK_MS", 1000u64)?;
        let status_addr = read_optional(&lookup, "EMS_STATUS_ADDR");
        let log_retention = read_with_default(&lookup, "EMS_LOG_RETENTION", 500usize)?;

        Ok(Self {
            connector_name,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_root,
            mqtt_keep_alive_seconds,
            mqtt_channel_capacity,
            heartbeat_interval_seconds,
            reconnect_delay_ms,
            publish_backlog,
            event_queue,
            poll_interval_ms,
            dispatch_mode,
            transport,
            transport_config,
            datapoints,
            actuator_write_timeout_ms,
            actuator_ack,
            schedule_tick_ms,
            status_addr,
            log_retention,
        })
    }
}

fn read_required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    read_optional(lookup, key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn read_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

fn read_parsed<T, F>(lookup: &F, key: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = read_required(lookup, key)?;
    value
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_with_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = match read_optional(lookup, key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + fmt::Display + Copy,
    F: Fn(&str) -> Option<String>,
{
    let value = read_with_default(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(key.to_string(), value.to_string()));
    }
    Ok(value)
}

fn read_bool_with_default<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match read_optional(lookup, key) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        None => default,
    }
}

fn ensure_topic_segment(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.contains(['/', '+', '#']) {
        return Err(ConfigError::Invalid(key.to_string(), value.to_string()));
    }
    Ok(())
}
