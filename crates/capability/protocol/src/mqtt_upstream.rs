//! 上游 MQTT 设备传输
//!
//! 订阅设备侧 Broker 上的 topic，每条 publish 作为一条原始报文。
//! key 为去掉 `topic_prefix` 之后的 topic 路径，`/` 替换为 `__`。

use crate::Transport;
use crate::error::TransportError;
use crate::types::{ReadMode, wire_to_text};
use async_trait::async_trait;
use domain::{RawMessage, RawPayload, WireValue};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// key 中代替 topic 分隔符的字符串。
const KEY_SEPARATOR: &str = "__";

/// 上游 MQTT 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttUpstreamConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 设备 topic 前缀，订阅 `{topic_prefix}/#`
    pub topic_prefix: String,
    /// 写入 topic 前缀，缺省时不支持写入
    #[serde(default)]
    pub write_topic_prefix: Option<String>,
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_port() -> u16 {
    1883
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive() -> u64 {
    30
}

fn default_channel_capacity() -> usize {
    256
}

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// 上游 MQTT 传输
pub struct MqttUpstreamTransport {
    config: MqttUpstreamConfig,
    session: Mutex<Option<Session>>,
    receiver: Mutex<Option<mpsc::Receiver<RawMessage>>>,
}

impl MqttUpstreamTransport {
    pub fn new(config: MqttUpstreamConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: MqttUpstreamConfig =
            serde_json::from_str(json).map_err(|e| TransportError::ConfigParse(e.to_string()))?;
        if config.topic_prefix.contains(['+', '#']) {
            return Err(TransportError::ConfigParse(format!(
                "topic_prefix must not contain wildcards: {}",
                config.topic_prefix
            )));
        }
        Ok(Self::new(config))
    }

    fn subscription(&self) -> String {
        let prefix = self.config.topic_prefix.trim_matches('/');
        if prefix.is_empty() {
            "#".to_string()
        } else {
            format!("{}/#", prefix)
        }
    }
}

/// 从 topic 推导数据点 key。
pub fn topic_to_key(prefix: &str, topic: &str) -> Option<String> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        topic
    } else {
        let rest = topic.strip_prefix(prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        rest
    };
    let rest = rest.trim_start_matches('/');
    if rest.is_empty() {
        return None;
    }
    Some(rest.replace('/', KEY_SEPARATOR))
}

fn key_to_topic(prefix: &str, key: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        key.replace(KEY_SEPARATOR, "/")
    )
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[async_trait]
impl Transport for MqttUpstreamTransport {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Pushed
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let client_id = format!("ems-connector-upstream-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_seconds));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let prefix = self.config.topic_prefix.clone();
        let topic = self.subscription();
        let qos = qos_from_u8(self.config.qos);
        let subscriber = client.clone();

        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // clean session：每次连上都重新订阅
                        if let Err(err) = subscriber.try_subscribe(topic.clone(), qos) {
                            warn!(target: "ems.protocol", error = %err, "upstream_subscribe_failed");
                        } else {
                            info!(target: "ems.protocol", topic = %topic, "upstream_subscribed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(key) = topic_to_key(&prefix, &publish.topic) else {
                            debug!(target: "ems.protocol", topic = %publish.topic, "upstream_topic_skipped");
                            continue;
                        };
                        let value = match std::str::from_utf8(&publish.payload) {
                            Ok(text) => WireValue::Text(text.trim().to_string()),
                            Err(_) => WireValue::Bytes(publish.payload.to_vec()),
                        };
                        let raw = RawMessage::new(RawPayload::Fields(vec![(key, value)]));
                        if tx.send(raw).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "ems.protocol", error = %err, "upstream_eventloop_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        *self.receiver.lock().await = Some(rx);
        *session = Some(Session { client, task });
        info!(
            target: "ems.protocol",
            host = %self.config.host,
            port = self.config.port,
            "upstream_session_started"
        );
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or(TransportError::NotConnected)?;
        match receiver.recv().await {
            Some(raw) => Ok(raw),
            None => {
                guard.take();
                self.session.lock().await.take();
                Err(TransportError::ChannelClosed)
            }
        }
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        let prefix = self
            .config
            .write_topic_prefix
            .as_ref()
            .ok_or_else(|| TransportError::Unsupported("upstream mqtt has no write_topic_prefix".to_string()))?;
        let guard = self.session.lock().await;
        let session = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let topic = key_to_topic(prefix, key);
        session
            .client
            .publish(topic, qos_from_u8(self.config.qos), false, wire_to_text(value))
            .await
            .map_err(|e| TransportError::Mqtt(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(session) = self.session.lock().await.take() {
            let _ = session.client.try_disconnect();
            session.task.abort();
            info!(target: "ems.protocol", host = %self.config.host, "upstream_session_closed");
        }
        self.receiver.lock().await.take();
        Ok(())
    }
}
