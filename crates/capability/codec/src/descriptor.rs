//! 数据点配置：元数据 + 线路类型描述。

use crate::error::CodecError;
use crate::knx::KnxDpt;
use crate::modbus::ModbusDataType;
use domain::{DataFormat, DatapointMeta, Direction};
use serde::Deserialize;
use std::collections::HashSet;

/// 线路类型描述，决定一个 key 的线路值如何与规范类型值互转。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireType {
    Text,
    Number {
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    Bool,
    Modbus {
        #[serde(default)]
        data_type: ModbusDataType,
        #[serde(default = "default_scale")]
        scale: f64,
        #[serde(default)]
        offset: f64,
    },
    Knx {
        dpt: KnxDpt,
    },
}

fn default_scale() -> f64 {
    1.0
}

impl WireType {
    /// 未显式配置时按数据格式推导。
    pub fn for_format(format: DataFormat) -> Self {
        if format.is_numeric() {
            WireType::Number {
                scale: 1.0,
                offset: 0.0,
            }
        } else {
            WireType::Text
        }
    }
}

/// 单个数据点配置。
#[derive(Debug, Clone, Deserialize)]
pub struct DatapointConfig {
    #[serde(flatten)]
    pub meta: DatapointMeta,
    #[serde(default)]
    pub wire: Option<WireType>,
}

impl DatapointConfig {
    pub fn wire_type(&self) -> WireType {
        self.wire
            .clone()
            .unwrap_or_else(|| WireType::for_format(self.meta.data_format))
    }
}

/// 从 JSON 数组加载数据点配置并校验。
pub fn load_datapoints(json: &str) -> Result<Vec<DatapointConfig>, CodecError> {
    let configs: Vec<DatapointConfig> =
        serde_json::from_str(json).map_err(|err| CodecError::Parse(err.to_string()))?;
    check_datapoints(&configs)?;
    Ok(configs)
}

/// 校验数据点配置。
pub fn check_datapoints(configs: &[DatapointConfig]) -> Result<(), CodecError> {
    let mut seen = HashSet::new();
    for config in configs {
        let meta = &config.meta;
        let key = meta.key.as_str();
        if key.trim().is_empty() || key.contains(['+', '#']) || key.starts_with('/') {
            return Err(CodecError::InvalidKey(key.to_string()));
        }
        if !seen.insert(key.to_string()) {
            return Err(CodecError::DuplicateKey(key.to_string()));
        }
        if let (Some(min), Some(max)) = (meta.min_value, meta.max_value) {
            if min > max {
                return Err(CodecError::InvalidRange(key.to_string()));
            }
        }
        if meta.direction == Direction::Actuator
            && meta.data_format.is_discrete()
            && meta.allowed_values.as_ref().is_none_or(|values| values.is_empty())
        {
            return Err(CodecError::MissingAllowedValues(key.to_string()));
        }
        match config.wire_type() {
            WireType::Number { scale, .. } | WireType::Modbus { scale, .. }
                if scale == 0.0 || !scale.is_finite() =>
            {
                return Err(CodecError::InvalidWireType(
                    key.to_string(),
                    "scale must be a non-zero finite number".to_string(),
                ));
            }
            WireType::Modbus { .. } | WireType::Knx { .. } | WireType::Number { .. }
                if !meta.data_format.is_numeric() =>
            {
                return Err(CodecError::InvalidWireType(
                    key.to_string(),
                    format!("{:?} needs a numeric data_format", meta.data_format),
                ));
            }
            _ => {}
        }
    }
    Ok(())
}
