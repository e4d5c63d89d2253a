//! Modbus 寄存器值转换（大端字序，高位寄存器在前）

use serde::{Deserialize, Serialize};

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    /// 16位有符号整数
    #[default]
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
    /// 线圈 / 离散输入（单个位）
    Coil,
}

impl ModbusDataType {
    /// 该类型占用的寄存器数量。线圈按 1 计。
    pub fn register_count(&self) -> u16 {
        match self {
            ModbusDataType::Int16 | ModbusDataType::Uint16 | ModbusDataType::Coil => 1,
            ModbusDataType::Int32 | ModbusDataType::Uint32 | ModbusDataType::Float32 => 2,
            ModbusDataType::Float64 => 4,
        }
    }
}

/// 解析寄存器数据为浮点值
pub fn decode_registers(registers: &[u16], data_type: ModbusDataType) -> Result<f64, String> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(format!(
            "need {} registers for {:?}, got {}",
            needed,
            data_type,
            registers.len()
        ));
    }

    let value = match data_type {
        ModbusDataType::Int16 => registers[0] as i16 as f64,
        ModbusDataType::Uint16 => registers[0] as f64,
        ModbusDataType::Coil => {
            if registers[0] == 0 {
                0.0
            } else {
                1.0
            }
        }
        ModbusDataType::Int32 => join_u32(registers) as i32 as f64,
        ModbusDataType::Uint32 => join_u32(registers) as f64,
        ModbusDataType::Float32 => f32::from_bits(join_u32(registers)) as f64,
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, word| (acc << 16) | *word as u64);
            f64::from_bits(bits)
        }
    };

    Ok(value)
}

/// 将浮点值编码为寄存器序列；整数类型四舍五入并做范围检查。
pub fn encode_registers(value: f64, data_type: ModbusDataType) -> Result<Vec<u16>, String> {
    if !value.is_finite() {
        return Err(format!("{} is not finite", value));
    }

    let registers = match data_type {
        ModbusDataType::Int16 => {
            let raw = checked_integer(value, i16::MIN as f64, i16::MAX as f64)?;
            vec![raw as i16 as u16]
        }
        ModbusDataType::Uint16 => {
            let raw = checked_integer(value, 0.0, u16::MAX as f64)?;
            vec![raw as u16]
        }
        ModbusDataType::Coil => vec![if value == 0.0 { 0 } else { 1 }],
        ModbusDataType::Int32 => {
            let raw = checked_integer(value, i32::MIN as f64, i32::MAX as f64)?;
            split_u32(raw as i32 as u32)
        }
        ModbusDataType::Uint32 => {
            let raw = checked_integer(value, 0.0, u32::MAX as f64)?;
            split_u32(raw as u32)
        }
        ModbusDataType::Float32 => {
            if value.abs() > f32::MAX as f64 {
                return Err(format!("{} exceeds float32", value));
            }
            split_u32((value as f32).to_bits())
        }
        ModbusDataType::Float64 => {
            let bits = value.to_bits();
            vec![
                (bits >> 48) as u16,
                (bits >> 32) as u16,
                (bits >> 16) as u16,
                bits as u16,
            ]
        }
    };

    Ok(registers)
}

fn join_u32(registers: &[u16]) -> u32 {
    ((registers[0] as u32) << 16) | registers[1] as u32
}

fn split_u32(value: u32) -> Vec<u16> {
    vec![(value >> 16) as u16, value as u16]
}

fn checked_integer(value: f64, min: f64, max: f64) -> Result<f64, String> {
    let rounded = value.round();
    if rounded < min || rounded > max {
        return Err(format!("{} outside [{}, {}]", value, min, max));
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_int16() {
        assert_eq!(decode_registers(&[100], ModbusDataType::Int16).unwrap(), 100.0);
        assert_eq!(
            decode_registers(&[(-100i16) as u16], ModbusDataType::Int16).unwrap(),
            -100.0
        );
    }

    #[test]
    fn test_decode_needs_enough_registers() {
        let err = decode_registers(&[1], ModbusDataType::Float32).unwrap_err();
        assert!(err.contains("need 2 registers"));
    }

    #[test]
    fn test_encode_float32_matches_decode() {
        let registers = encode_registers(21.5, ModbusDataType::Float32).unwrap();
        assert_eq!(registers, vec![0x41ac, 0x0000]);
        assert_eq!(
            decode_registers(&registers, ModbusDataType::Float32).unwrap(),
            21.5
        );
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        assert!(encode_registers(70000.0, ModbusDataType::Uint16).is_err());
        assert!(encode_registers(-1.0, ModbusDataType::Uint32).is_err());
        assert_eq!(
            encode_registers(-2.0, ModbusDataType::Int32).unwrap(),
            vec![0xffff, 0xfffe]
        );
    }
}
