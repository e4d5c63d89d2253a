//! Modbus TCP 传输实现
//!
//! 连接 Modbus 从设备，一次读取遍历整张点位表。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let transport = ModbusTcpTransport::from_json(r#"{"host":"192.168.1.100","points":[...]}"#)?;
//! transport.connect().await?;
//! let raw = transport.read_raw().await?;
//! ```

use crate::Transport;
use crate::error::TransportError;
use crate::types::{ReadMode, default_connect_timeout, default_read_timeout, millis};
use async_trait::async_trait;
use domain::{RawMessage, RawPayload, WireValue};
use ems_codec::TranscodeError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Modbus TCP 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 默认从站 ID
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// 读取超时（毫秒）
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// 点位表
    #[serde(default)]
    pub points: Vec<ModbusPoint>,
}

/// 单个点位
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusPoint {
    /// 数据点 key
    pub key: String,
    /// 从站 ID，缺省使用连接级配置
    #[serde(default)]
    pub slave_id: Option<u8>,
    /// 功能码：1 线圈 / 2 离散输入 / 3 保持寄存器 / 4 输入寄存器
    #[serde(default = "default_function_code")]
    pub function_code: u8,
    /// 寄存器起始地址
    pub register_address: u16,
    /// 寄存器数量
    #[serde(default = "default_register_count")]
    pub register_count: u16,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_slave_id() -> u8 {
    1
}

fn default_function_code() -> u8 {
    3
}

fn default_register_count() -> u16 {
    1
}

/// Modbus TCP 传输
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    ctx: Mutex<Option<Context>>,
}

impl ModbusTcpTransport {
    /// 创建新的 Modbus TCP 传输
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
        }
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, TransportError> {
        let config: ModbusTcpConfig =
            serde_json::from_str(json).map_err(|e| TransportError::ConfigParse(e.to_string()))?;
        for point in &config.points {
            if !matches!(point.function_code, 1..=4) {
                return Err(TransportError::ConfigParse(format!(
                    "unsupported function code {} for {}",
                    point.function_code, point.key
                )));
            }
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    fn point(&self, key: &str) -> Option<&ModbusPoint> {
        self.config.points.iter().find(|point| point.key == key)
    }

    /// 读取单个点位。
    ///
    /// 外层错误（IO、超时）表示连接不可用；内层错误为从站异常，只影响该点位。
    async fn read_point(
        &self,
        ctx: &mut Context,
        point: &ModbusPoint,
    ) -> Result<Result<WireValue, String>, TransportError> {
        ctx.set_slave(Slave(point.slave_id.unwrap_or(self.config.slave_id)));
        let deadline = millis(self.config.read_timeout_ms);
        let address = point.register_address;
        let count = point.register_count;

        let value = match point.function_code {
            1 | 2 => {
                let response = if point.function_code == 1 {
                    timeout(deadline, ctx.read_coils(address, count)).await
                } else {
                    timeout(deadline, ctx.read_discrete_inputs(address, count)).await
                };
                let bits = response
                    .map_err(|_| TransportError::Timeout(format!("read {}", point.key)))?
                    .map_err(|e| TransportError::Modbus(e.to_string()))?;
                bits.map(|bits| {
                    if bits.len() == 1 {
                        WireValue::Bool(bits[0])
                    } else {
                        WireValue::Registers(bits.into_iter().map(u16::from).collect())
                    }
                })
                .map_err(|e| format!("exception: {:?}", e))
            }
            3 | 4 => {
                let response = if point.function_code == 3 {
                    timeout(deadline, ctx.read_holding_registers(address, count)).await
                } else {
                    timeout(deadline, ctx.read_input_registers(address, count)).await
                };
                response
                    .map_err(|_| TransportError::Timeout(format!("read {}", point.key)))?
                    .map_err(|e| TransportError::Modbus(e.to_string()))?
                    .map(WireValue::Registers)
                    .map_err(|e| format!("exception: {:?}", e))
            }
            other => Err(format!("unsupported function code: {}", other)),
        };
        Ok(value)
    }

    /// 写入单个点位，返回值的分层含义同 `read_point`。
    async fn write_point(
        &self,
        ctx: &mut Context,
        point: &ModbusPoint,
        value: &WireValue,
    ) -> Result<Result<(), String>, TransportError> {
        ctx.set_slave(Slave(point.slave_id.unwrap_or(self.config.slave_id)));
        let deadline = millis(self.config.read_timeout_ms);
        let address = point.register_address;

        let response = match value {
            WireValue::Bool(flag) => timeout(deadline, ctx.write_single_coil(address, *flag)).await,
            WireValue::Registers(words) if words.len() == 1 => {
                timeout(deadline, ctx.write_single_register(address, words[0])).await
            }
            WireValue::Registers(words) => {
                timeout(deadline, ctx.write_multiple_registers(address, words)).await
            }
            other => return Ok(Err(format!("unexpected wire value {:?}", other))),
        };

        Ok(response
            .map_err(|_| TransportError::Timeout(format!("write {}", point.key)))?
            .map_err(|e| TransportError::Modbus(e.to_string()))?
            .map_err(|e| format!("exception: {:?}", e)))
    }
}

/// 检查写入值与点位功能码是否匹配。
fn check_writable(point: &ModbusPoint, value: &WireValue) -> Result<(), TransportError> {
    match (point.function_code, value) {
        (1, WireValue::Bool(_)) => Ok(()),
        (3, WireValue::Registers(words)) if !words.is_empty() => Ok(()),
        (2 | 4, _) => Err(TransportError::Unsupported(format!(
            "{} is read-only (function code {})",
            point.key, point.function_code
        ))),
        (_, other) => {
            Err(TranscodeError::Unsupported(point.key.clone(), format!("{:?}", other)).into())
        }
    }
}

#[async_trait]
impl Transport for ModbusTcpTransport {
    fn name(&self) -> &str {
        "modbus_tcp"
    }

    fn read_mode(&self) -> ReadMode {
        ReadMode::Polled
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.ctx.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| TransportError::ConfigParse(format!("invalid address: {}", e)))?;

        info!(
            target: "ems.protocol",
            addr = %addr,
            points = self.config.points.len(),
            "modbus_connecting"
        );

        let ctx = timeout(millis(self.config.connect_timeout_ms), tcp::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(format!("connect {}", addr)))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        info!(target: "ems.protocol", addr = %addr, "modbus_connected");
        *guard = Some(ctx);
        Ok(())
    }

    async fn read_raw(&self) -> Result<RawMessage, TransportError> {
        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let mut fields = Vec::with_capacity(self.config.points.len());
        for point in &self.config.points {
            match self.read_point(ctx, point).await {
                Ok(Ok(value)) => {
                    debug!(
                        target: "ems.protocol",
                        key = %point.key,
                        register = point.register_address,
                        value = %value,
                        "modbus_point_read"
                    );
                    fields.push((point.key.clone(), value));
                }
                Ok(Err(reason)) => {
                    warn!(
                        target: "ems.protocol",
                        key = %point.key,
                        register = point.register_address,
                        error = %reason,
                        "modbus_point_skipped"
                    );
                }
                Err(err) => {
                    // 连接已不可用，丢弃上下文，下次 connect() 重建
                    *guard = None;
                    return Err(err);
                }
            }
        }

        Ok(RawMessage::new(RawPayload::Fields(fields)))
    }

    async fn write_raw(&self, key: &str, value: &WireValue) -> Result<(), TransportError> {
        let point = self
            .point(key)
            .ok_or_else(|| TransportError::Unsupported(format!("no modbus point for {}", key)))?;
        check_writable(point, value)?;

        let mut guard = self.ctx.lock().await;
        let ctx = guard.as_mut().ok_or(TransportError::NotConnected)?;
        match self.write_point(ctx, point, value).await {
            Ok(Ok(())) => {
                debug!(target: "ems.protocol", key = %key, value = %value, "modbus_point_written");
                Ok(())
            }
            Ok(Err(reason)) => Err(TransportError::Modbus(reason)),
            Err(err) => {
                *guard = None;
                Err(err)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.ctx.lock().await.take().is_some() {
            info!(target: "ems.protocol", host = %self.config.host, "modbus_disconnected");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "host": "192.168.1.100",
            "port": 502,
            "points": [
                {"key": "temp_1", "register_address": 100},
                {"key": "relay", "function_code": 1, "register_address": 5, "slave_id": 2}
            ]
        }"#;
        let transport = ModbusTcpTransport::from_json(json).unwrap();
        assert_eq!(transport.config.host, "192.168.1.100");
        assert_eq!(transport.config.slave_id, 1);
        assert_eq!(transport.config.points[0].function_code, 3);
        assert_eq!(transport.config.points[0].register_count, 1);
        assert_eq!(transport.point("relay").unwrap().slave_id, Some(2));
        assert_eq!(transport.read_mode(), ReadMode::Polled);
    }

    #[test]
    fn test_reject_unknown_function_code() {
        let json = r#"{"host": "h", "points": [{"key": "a", "function_code": 16, "register_address": 1}]}"#;
        assert!(matches!(
            ModbusTcpTransport::from_json(json),
            Err(TransportError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_check_writable() {
        let coil = ModbusPoint {
            key: "relay".to_string(),
            slave_id: None,
            function_code: 1,
            register_address: 5,
            register_count: 1,
        };
        assert!(check_writable(&coil, &WireValue::Bool(true)).is_ok());
        assert!(matches!(
            check_writable(&coil, &WireValue::Registers(vec![1])),
            Err(TransportError::Transcode(_))
        ));
        let input = ModbusPoint {
            function_code: 4,
            ..coil
        };
        assert!(matches!(
            check_writable(&input, &WireValue::Registers(vec![1])),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_read_before_connect_fails() {
        let transport = ModbusTcpTransport::from_json(r#"{"host": "127.0.0.1"}"#).unwrap();
        assert!(matches!(
            transport.read_raw().await,
            Err(TransportError::NotConnected)
        ));
    }
}
