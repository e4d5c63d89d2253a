//! TCP 客户端传输实现
//!
//! 主动连接设备，按行分帧。配置了 `request_command` 时每次读取先发送请求（轮询），
//! 否则阻塞等待设备主动上报的下一行（上报）。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let transport = TcpClientTransport::from_json(r#"{"host":"192.168.1.50","port":9000}"#)?;
//! transport.connect().await?;
//! let raw = transport.read_raw().await?;
//! ```

use crate::Transport;
use crate::error::TransportError;
use crate::types::{ReadMode, default_connect_timeout, default_read_timeout, millis, wire_to_json};
use async_trait::async_trait;
use domain::{RawMessage, RawPayload, WireValue};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

/// TCP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpClientConfig {
    /// 服务器主机地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 轮询模式下等待响应的超时（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 请求命令（可选，用于主动请求数据）
    pub request_command: Option<String>,
}

/// TCP 客户端传输
pub struct TcpClientTransport {
    config: TcpClientConfig,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpClientTransport {
    pub fn new(config: TcpClientConfig) -> Self {
        Self {
            config,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: TcpClientConfig =
            serde_json::from_str(json).map_err(|e| TransportError::ConfigParse(e.to_string()))?;
        Ok(Self::new(config))
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let framed = if line.ends_with('\n') {
            line.to_string()
        } else {
            format!("{}\n", line)
        };
        let result = async {
            writer.write_all(framed.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = result {
            drop(guard);
            // 上报模式下读端会自行发现断线
            if self.read_mode() == ReadMode::Polled {
                self.reset().await;
            }
            return Err(TransportError::Io(err));
        }
        Ok(())
    }

    async fn reset(&self) {
        *self.reader.lock().await = None;
        *self.writer.lock().await = None;
    }
}

#[async_trait]
impl Transport for TcpClientTransport {
    fn name(&self) -> &str {
        "tcp_client"
    }

    fn read_mode(&self) -> ReadMode {
        if self.config.request_command.is_some() {
            ReadMode::Polled
        } else {
            ReadMode::Pushed
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let addr = self.addr();
        info!(target: "ems.protocol", addr = %addr, "tcp_connecting");
        let stream = timeout(millis(self.config.connect_timeout_ms), TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(format!("connect {}", addr)))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(BufReader::new(read_half));
        *writer = Some(write_half);
        info!(target: "ems.protocol", addr = %addr, "tcp_connected");
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        if let Some(command) = &self.config.request_command {
            self.send_line(command).await?;
            debug!(target: "ems.protocol", command = %command, "tcp_request_sent");
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let mut line = String::new();
        let read = if self.config.request_command.is_some() {
            match timeout(millis(self.config.read_timeout_ms), reader.read_line(&mut line)).await {
                Ok(result) => result,
                Err(_) => return Err(TransportError::Timeout("tcp response".to_string())),
            }
        } else {
            reader.read_line(&mut line).await
        };

        match read {
            Ok(0) => {
                drop(guard);
                self.reset().await;
                Err(TransportError::Connection("connection closed".to_string()))
            }
            Ok(_) => {
                let data = line.trim().to_string();
                debug!(target: "ems.protocol", response = %data, "tcp_line_received");
                Ok(RawMessage::new(RawPayload::Text(data)))
            }
            Err(err) => {
                drop(guard);
                self.reset().await;
                Err(TransportError::Io(err))
            }
        }
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        let mut body = serde_json::Map::new();
        body.insert(key.to_string(), wire_to_json(value));
        let line = serde_json::Value::Object(body).to_string();
        self.send_line(&line).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        *self.reader.lock().await = None;
        Ok(())
    }
}
