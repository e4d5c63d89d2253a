use crate::error::ValidationError;
use domain::{DataFormat, DatapointMeta, Direction, TypedValue};

/// 将值规整为数据格式要求的形态：数值格式 -> Number，文本格式 -> Text。
///
/// 无法规整时返回 `None`。
pub fn conform(format: DataFormat, value: TypedValue) -> Option<TypedValue> {
    if format.is_numeric() {
        let number = match value {
            TypedValue::Bool(flag) => Some(if flag { 1.0 } else { 0.0 }),
            other => other.as_f64(),
        }?;
        if !number.is_finite() {
            return None;
        }
        return Some(TypedValue::Number(number));
    }
    match value {
        TypedValue::Text(text) => Some(TypedValue::Text(text)),
        other => Some(TypedValue::Text(other.to_string())),
    }
}

/// 按元数据校验执行器指令值，返回规整后的值。
pub fn validate(meta: &DatapointMeta, value: &TypedValue) -> Result<TypedValue, ValidationError> {
    if meta.direction != Direction::Actuator {
        return Err(ValidationError::NotActuator(meta.key.clone()));
    }

    let expected = if meta.data_format.is_numeric() {
        "number"
    } else {
        "text"
    };
    let conformed = conform(meta.data_format, value.clone())
        .ok_or_else(|| ValidationError::WrongType(meta.key.clone(), expected.to_string()))?;

    if let TypedValue::Number(number) = conformed {
        if let Some(min) = meta.min_value {
            if number < min {
                return Err(ValidationError::OutOfRange(
                    meta.key.clone(),
                    format!("{} < min {}", number, min),
                ));
            }
        }
        if let Some(max) = meta.max_value {
            if number > max {
                return Err(ValidationError::OutOfRange(
                    meta.key.clone(),
                    format!("{} > max {}", number, max),
                ));
            }
        }
    }

    if let Some(allowed) = &meta.allowed_values {
        let permitted = allowed
            .iter()
            .filter_map(|candidate| conform(meta.data_format, candidate.clone()))
            .any(|candidate| candidate == conformed);
        if !permitted {
            return Err(ValidationError::NotAllowed(
                meta.key.clone(),
                conformed.to_string(),
            ));
        }
    }

    Ok(conformed)
}
