//! KNX 数据点类型（DPT）转换。
//!
//! 仅覆盖楼宇场景中最常见的几类：开关（1.x）、百分比（5.001）、
//! 无符号 8 位（5.x）、2 字节浮点（9.x）和 4 字节浮点（14.x）。

use domain::WireValue;
use serde::Deserialize;
use std::fmt;

/// 支持的 DPT 族。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum KnxDpt {
    /// 1.x
    Boolean,
    /// 5.001，0..=100 %
    Scaling,
    /// 5.x
    Unsigned8,
    /// 9.x
    Float16,
    /// 14.x
    Float32,
}

impl TryFrom<String> for KnxDpt {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut parts = value.trim().splitn(2, '.');
        let main = parts
            .next()
            .and_then(|part| part.parse::<u16>().ok())
            .ok_or_else(|| format!("invalid dpt: {}", value))?;
        let sub = match parts.next() {
            Some(part) => Some(
                part.parse::<u16>()
                    .map_err(|_| format!("invalid dpt: {}", value))?,
            ),
            None => None,
        };
        match (main, sub) {
            (1, _) => Ok(Self::Boolean),
            (5, Some(1)) => Ok(Self::Scaling),
            (5, _) => Ok(Self::Unsigned8),
            (9, _) => Ok(Self::Float16),
            (14, _) => Ok(Self::Float32),
            _ => Err(format!("unsupported dpt: {}", value)),
        }
    }
}

impl fmt::Display for KnxDpt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            KnxDpt::Boolean => "1.x",
            KnxDpt::Scaling => "5.001",
            KnxDpt::Unsigned8 => "5.x",
            KnxDpt::Float16 => "9.x",
            KnxDpt::Float32 => "14.x",
        };
        f.write_str(text)
    }
}

/// 解析 group telegram 载荷为数值。
pub fn decode(dpt: KnxDpt, wire: &WireValue) -> Result<f64, String> {
    match (dpt, wire) {
        (KnxDpt::Boolean, WireValue::Bits(bits)) => Ok((bits & 0x01) as f64),
        (KnxDpt::Boolean, WireValue::Bytes(bytes)) if bytes.len() == 1 => {
            Ok((bytes[0] & 0x01) as f64)
        }
        (KnxDpt::Boolean, WireValue::Bool(value)) => Ok(if *value { 1.0 } else { 0.0 }),
        (KnxDpt::Scaling, WireValue::Bytes(bytes)) if bytes.len() == 1 => {
            Ok(round_to(bytes[0] as f64 * 100.0 / 255.0, 1))
        }
        (KnxDpt::Unsigned8, WireValue::Bytes(bytes)) if bytes.len() == 1 => Ok(bytes[0] as f64),
        (KnxDpt::Float16, WireValue::Bytes(bytes)) if bytes.len() == 2 => {
            Ok(decode_float16(u16::from_be_bytes([bytes[0], bytes[1]])))
        }
        (KnxDpt::Float32, WireValue::Bytes(bytes)) if bytes.len() == 4 => {
            let value = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Ok(value as f64)
        }
        (dpt, wire) => Err(format!("dpt {} cannot decode {:?}", dpt, wire)),
    }
}

/// 将数值编码为 group telegram 载荷。
pub fn encode(dpt: KnxDpt, value: f64) -> Result<WireValue, String> {
    if !value.is_finite() {
        return Err(format!("{} is not finite", value));
    }
    match dpt {
        KnxDpt::Boolean => Ok(WireValue::Bits(if value == 0.0 { 0 } else { 1 })),
        KnxDpt::Scaling => {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{} outside 0..=100 %", value));
            }
            Ok(WireValue::Bytes(vec![(value * 255.0 / 100.0).round() as u8]))
        }
        KnxDpt::Unsigned8 => {
            let raw = value.round();
            if !(0.0..=255.0).contains(&raw) {
                return Err(format!("{} outside 0..=255", value));
            }
            Ok(WireValue::Bytes(vec![raw as u8]))
        }
        KnxDpt::Float16 => {
            let raw = encode_float16(value)?;
            Ok(WireValue::Bytes(raw.to_be_bytes().to_vec()))
        }
        KnxDpt::Float32 => Ok(WireValue::Bytes((value as f32).to_be_bytes().to_vec())),
    }
}

/// `value = 0.01 * M * 2^E`，M 为 12 位补码（符号位在 bit 15）。
fn decode_float16(raw: u16) -> f64 {
    let exponent = ((raw >> 11) & 0x0f) as i32;
    let mut mantissa = (raw & 0x07ff) as i32;
    if raw & 0x8000 != 0 {
        mantissa -= 2048;
    }
    round_to(0.01 * mantissa as f64 * 2f64.powi(exponent), 2)
}

fn encode_float16(value: f64) -> Result<u16, String> {
    let scaled = value * 100.0;
    for exponent in 0..16u16 {
        let mantissa = (scaled / 2f64.powi(exponent as i32)).round();
        if (-2048.0..=2047.0).contains(&mantissa) {
            let m12 = (mantissa as i32 & 0x0fff) as u16;
            return Ok(((m12 & 0x0800) << 4) | (exponent << 11) | (m12 & 0x07ff));
        }
    }
    Err(format!("{} outside 2-byte float range", value))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
