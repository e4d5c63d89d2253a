//! HTTP 轮询传输实现

use crate::Transport;
use crate::error::TransportError;
use crate::types::{ReadMode, millis, wire_to_json};
use async_trait::async_trait;
use domain::{RawMessage, RawPayload, WireValue};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// HTTP 轮询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPollConfig {
    /// 读取地址（GET）
    pub url: String,
    /// 写入地址（POST `{"key": value}`），缺省时不支持写入
    #[serde(default)]
    pub write_url: Option<String>,
    /// 请求超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
    /// 额外请求头
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout() -> u64 {
    5000
}

/// HTTP 轮询传输
pub struct HttpPollTransport {
    config: HttpPollConfig,
    client: RwLock<Option<Client>>,
}

impl HttpPollTransport {
    pub fn new(config: HttpPollConfig) -> Self {
        Self {
            config,
            client: RwLock::new(None),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: HttpPollConfig =
            serde_json::from_str(json).map_err(|e| TransportError::ConfigParse(e.to_string()))?;
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(TransportError::ConfigParse(format!(
                "invalid url: {}",
                config.url
            )));
        }
        Ok(Self::new(config))
    }

    async fn client(&self) -> Result<Client, TransportError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn with_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }
        request
    }
}

fn map_http_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Http(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpPollTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Polled
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.client.write().await;
        if guard.is_some() {
            return Ok(());
        }
        let client = Client::builder()
            .timeout(millis(self.config.timeout_ms))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        info!(target: "ems.protocol", url = %self.config.url, "http_client_ready");
        *guard = Some(client);
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        let client = self.client().await?;
        let response = self
            .with_headers(client.get(&self.config.url))
            .send()
            .await
            .map_err(map_http_error)?
            .error_for_status()
            .map_err(map_http_error)?;
        let body = response.text().await.map_err(map_http_error)?;
        debug!(target: "ems.protocol", url = %self.config.url, size = body.len(), "http_body_received");
        Ok(RawMessage::new(RawPayload::Text(body)))
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        let url = self
            .config
            .write_url
            .as_ref()
            .ok_or_else(|| TransportError::Unsupported("http transport has no write_url".to_string()))?;
        let client = self.client().await?;
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), wire_to_json(value));
        self.with_headers(client.post(url))
            .json(&serde_json::Value::Object(body))
            .send()
            .await
            .map_err(map_http_error)?
            .error_for_status()
            .map_err(map_http_error)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client.write().await.take();
        Ok(())
    }
}
