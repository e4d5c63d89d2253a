//! # 编解码能力模块
//!
//! 在传输层的线路值（`WireValue`）与总线上的规范类型值（`TypedValue`）之间转换。
//! 转换是纯函数，每个 key 的行为由启动时加载的 `WireType` 描述决定。
//!
//! ## 配置格式
//!
//! ```json
//! [
//!   { "key": "temp_1", "direction": "sensor", "data_format": "continuous_numeric", "unit": "°C" },
//!   { "key": "setpoint_1", "direction": "actuator", "data_format": "continuous_numeric",
//!     "min_value": 10, "max_value": 30,
//!     "wire": { "type": "modbus", "data_type": "int16", "scale": 0.1 } },
//!   { "key": "1/2/3", "direction": "sensor", "data_format": "continuous_numeric",
//!     "wire": { "type": "knx", "dpt": "9.001" } }
//! ]
//! ```

mod descriptor;
mod error;
pub mod knx;
pub mod modbus;
mod validate;

pub use descriptor::{DatapointConfig, WireType, check_datapoints, load_datapoints};
pub use error::{CodecError, TranscodeError, ValidationError};
pub use validate::{conform, validate};

use domain::{DatapointMeta, TypedValue, WireValue, data::parse_bool_text};
use std::collections::BTreeMap;

/// 解码结果。
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Value(TypedValue),
    /// 编解码器未登记的 key，发布时静默丢弃。
    Unmapped,
}

/// 线路值 <-> 规范类型值的转换器抽象。
pub trait Codec: Send + Sync {
    fn decode(&self, key: &str, wire: &WireValue) -> Result<Decoded, TranscodeError>;

    fn encode(&self, key: &str, value: &TypedValue) -> Result<WireValue, TranscodeError>;

    fn metadata(&self, key: &str) -> Option<&DatapointMeta>;

    /// 所有已配置的数据点（按 key 排序）。
    fn datapoints(&self) -> Vec<&DatapointMeta>;
}

#[derive(Debug, Clone)]
struct CodecEntry {
    meta: DatapointMeta,
    wire: WireType,
}

/// 基于 `WireType` 描述的通用编解码器。
#[derive(Debug, Clone, Default)]
pub struct TypedCodec {
    entries: BTreeMap<String, CodecEntry>,
}

impl TypedCodec {
    pub fn new(configs: Vec<DatapointConfig>) -> Result<Self, CodecError> {
        check_datapoints(&configs)?;
        let entries = configs
            .into_iter()
            .map(|config| {
                let wire = config.wire_type();
                (
                    config.meta.key.clone(),
                    CodecEntry {
                        meta: config.meta,
                        wire,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        Self::new(load_datapoints(json)?)
    }
}

impl Codec for TypedCodec {
    fn decode(&self, key: &str, wire: &WireValue) -> Result<Decoded, TranscodeError> {
        let entry = match self.entries.get(key) {
            Some(entry) => entry,
            None => return Ok(Decoded::Unmapped),
        };
        let raw = match &entry.wire {
            WireType::Text => wire_to_typed(key, wire)?,
            WireType::Number { scale, offset } => {
                TypedValue::Number(wire_to_f64(key, wire)? * scale + offset)
            }
            WireType::Bool => TypedValue::Bool(wire_to_bool(key, wire)?),
            WireType::Modbus {
                data_type,
                scale,
                offset,
            } => {
                let raw = match wire {
                    WireValue::Registers(registers) => modbus::decode_registers(registers, *data_type)
                        .map_err(|reason| TranscodeError::Malformed(key.to_string(), reason))?,
                    WireValue::Bool(flag) => {
                        if *flag {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    other => return Err(unsupported(key, other)),
                };
                TypedValue::Number(raw * scale + offset)
            }
            WireType::Knx { dpt } => TypedValue::Number(
                knx::decode(*dpt, wire)
                    .map_err(|reason| TranscodeError::Malformed(key.to_string(), reason))?,
            ),
        };
        conform(entry.meta.data_format, raw)
            .map(Decoded::Value)
            .ok_or_else(|| {
                TranscodeError::Malformed(
                    key.to_string(),
                    format!("{} is not valid {:?}", wire, entry.meta.data_format),
                )
            })
    }

    fn encode(&self, key: &str, value: &TypedValue) -> Result<WireValue, TranscodeError> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| TranscodeError::UnknownKey(key.to_string()))?;
        let value = conform(entry.meta.data_format, value.clone()).ok_or_else(|| {
            TranscodeError::Malformed(
                key.to_string(),
                format!("{} is not valid {:?}", value, entry.meta.data_format),
            )
        })?;
        match &entry.wire {
            WireType::Text => Ok(WireValue::Text(value.to_string())),
            WireType::Number { scale, offset } => {
                let number = typed_to_f64(key, &value)?;
                Ok(WireValue::Number((number - offset) / scale))
            }
            WireType::Bool => value
                .as_bool()
                .map(WireValue::Bool)
                .ok_or_else(|| TranscodeError::Malformed(key.to_string(), value.to_string())),
            WireType::Modbus {
                data_type,
                scale,
                offset,
            } => {
                let number = typed_to_f64(key, &value)?;
                if *data_type == modbus::ModbusDataType::Coil {
                    return Ok(WireValue::Bool(number != 0.0));
                }
                modbus::encode_registers((number - offset) / scale, *data_type)
                    .map(WireValue::Registers)
                    .map_err(|reason| TranscodeError::OutOfRange(key.to_string(), reason))
            }
            WireType::Knx { dpt } => knx::encode(*dpt, typed_to_f64(key, &value)?)
                .map_err(|reason| TranscodeError::OutOfRange(key.to_string(), reason)),
        }
    }

    fn metadata(&self, key: &str) -> Option<&DatapointMeta> {
        self.entries.get(key).map(|entry| &entry.meta)
    }

    fn datapoints(&self) -> Vec<&DatapointMeta> {
        self.entries.values().map(|entry| &entry.meta).collect()
    }
}

fn unsupported(key: &str, wire: &WireValue) -> TranscodeError {
    TranscodeError::Unsupported(key.to_string(), format!("{:?}", wire))
}

fn wire_to_typed(key: &str, wire: &WireValue) -> Result<TypedValue, TranscodeError> {
    match wire {
        WireValue::Text(text) => Ok(TypedValue::Text(text.clone())),
        WireValue::Number(number) => Ok(TypedValue::Number(*number)),
        WireValue::Bool(flag) => Ok(TypedValue::Bool(*flag)),
        WireValue::Bits(bits) => Ok(TypedValue::Number(*bits as f64)),
        WireValue::Registers(registers) if registers.len() == 1 => {
            Ok(TypedValue::Number(registers[0] as f64))
        }
        WireValue::Bytes(bytes) => String::from_utf8(bytes.clone())
            .map(TypedValue::Text)
            .map_err(|err| TranscodeError::Malformed(key.to_string(), err.to_string())),
        other => Err(unsupported(key, other)),
    }
}

fn wire_to_f64(key: &str, wire: &WireValue) -> Result<f64, TranscodeError> {
    let number = match wire {
        WireValue::Number(number) => Some(*number),
        WireValue::Text(text) => text.trim().parse::<f64>().ok(),
        WireValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        WireValue::Bits(bits) => Some(*bits as f64),
        WireValue::Registers(registers) if registers.len() == 1 => Some(registers[0] as f64),
        WireValue::Bytes(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok()),
        other => return Err(unsupported(key, other)),
    };
    number
        .filter(|value| value.is_finite())
        .ok_or_else(|| TranscodeError::Malformed(key.to_string(), wire.to_string()))
}

fn wire_to_bool(key: &str, wire: &WireValue) -> Result<bool, TranscodeError> {
    let flag = match wire {
        WireValue::Bool(flag) => Some(*flag),
        WireValue::Number(number) if *number == 0.0 => Some(false),
        WireValue::Number(number) if *number == 1.0 => Some(true),
        WireValue::Text(text) => parse_bool_text(text),
        WireValue::Bits(bits) => Some(bits & 0x01 == 1),
        WireValue::Registers(registers) if registers.len() == 1 => Some(registers[0] != 0),
        _ => None,
    };
    flag.ok_or_else(|| TranscodeError::Malformed(key.to_string(), wire.to_string()))
}

fn typed_to_f64(key: &str, value: &TypedValue) -> Result<f64, TranscodeError> {
    value
        .as_f64()
        .ok_or_else(|| TranscodeError::Malformed(key.to_string(), value.to_string()))
}
