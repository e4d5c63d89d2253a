use domain::{TypedValue, WireValue};
use ems_codec::{Codec, CodecError, Decoded, TranscodeError, TypedCodec, ValidationError, validate};

const DATAPOINTS: &str = r#"[
  { "key": "temp_1", "direction": "sensor", "data_format": "continuous_numeric", "unit": "°C" },
  { "key": "status", "direction": "sensor", "data_format": "generic_text" },
  { "key": "setpoint_1", "direction": "actuator", "data_format": "continuous_numeric",
    "min_value": 10, "max_value": 30,
    "wire": { "type": "modbus", "data_type": "int16", "scale": 0.1 } },
  { "key": "mode", "direction": "actuator", "data_format": "discrete_text",
    "allowed_values": ["auto", "manual"] },
  { "key": "relay", "direction": "actuator", "data_format": "discrete_numeric",
    "allowed_values": [0, 1], "wire": { "type": "bool" } },
  { "key": "1/2/3", "direction": "sensor", "data_format": "continuous_numeric",
    "wire": { "type": "knx", "dpt": "9.001" } }
]"#;

fn codec() -> TypedCodec {
    TypedCodec::from_json(DATAPOINTS).expect("codec")
}

#[test]
fn decode_text_reading_to_number() {
    let codec = codec();
    let decoded = codec
        .decode("temp_1", &WireValue::Text("22.3".to_string()))
        .expect("decode");
    assert_eq!(decoded, Decoded::Value(TypedValue::Number(22.3)));
}

#[test]
fn unknown_key_is_unmapped_not_an_error() {
    let codec = codec();
    let decoded = codec
        .decode("humidity", &WireValue::Number(40.0))
        .expect("decode");
    assert_eq!(decoded, Decoded::Unmapped);
    assert!(matches!(
        codec.encode("humidity", &TypedValue::Number(1.0)),
        Err(TranscodeError::UnknownKey(_))
    ));
}

#[test]
fn malformed_numeric_reading_is_rejected() {
    let codec = codec();
    let err = codec
        .decode("temp_1", &WireValue::Text("n/a".to_string()))
        .expect_err("malformed");
    assert!(matches!(err, TranscodeError::Malformed(key, _) if key == "temp_1"));
}

#[test]
fn modbus_descriptor_scales_both_ways() {
    let codec = codec();
    let decoded = codec
        .decode("setpoint_1", &WireValue::Registers(vec![215]))
        .expect("decode");
    match decoded {
        Decoded::Value(TypedValue::Number(value)) => assert!((value - 21.5).abs() < 1e-9),
        other => panic!("unexpected {:?}", other),
    }
    let wire = codec
        .encode("setpoint_1", &TypedValue::Number(22.0))
        .expect("encode");
    assert_eq!(wire, WireValue::Registers(vec![220]));
}

#[test]
fn knx_descriptor_decodes_two_byte_float() {
    let codec = codec();
    let decoded = codec
        .decode("1/2/3", &WireValue::Bytes(vec![0x0c, 0x33]))
        .expect("decode");
    assert_eq!(decoded, Decoded::Value(TypedValue::Number(21.5)));
}

#[test]
fn bool_descriptor_accepts_text_commands() {
    let codec = codec();
    let wire = codec
        .encode("relay", &TypedValue::Text("1".to_string()))
        .expect("encode");
    assert_eq!(wire, WireValue::Bool(true));
}

#[test]
fn validation_enforces_metadata() {
    let codec = codec();
    let setpoint = codec.metadata("setpoint_1").expect("meta");
    assert_eq!(
        validate(setpoint, &TypedValue::Text("22".to_string())).expect("valid"),
        TypedValue::Number(22.0)
    );
    assert!(matches!(
        validate(setpoint, &TypedValue::Number(40.0)),
        Err(ValidationError::OutOfRange(_, _))
    ));
    assert!(matches!(
        validate(setpoint, &TypedValue::Text("warm".to_string())),
        Err(ValidationError::WrongType(_, _))
    ));

    let mode = codec.metadata("mode").expect("meta");
    assert!(validate(mode, &TypedValue::Text("auto".to_string())).is_ok());
    assert!(matches!(
        validate(mode, &TypedValue::Text("eco".to_string())),
        Err(ValidationError::NotAllowed(_, _))
    ));

    let temp = codec.metadata("temp_1").expect("meta");
    assert!(matches!(
        validate(temp, &TypedValue::Number(1.0)),
        Err(ValidationError::NotActuator(_))
    ));
}

#[test]
fn invalid_configs_are_rejected() {
    let duplicate = r#"[
      { "key": "a", "direction": "sensor", "data_format": "generic_text" },
      { "key": "a", "direction": "sensor", "data_format": "generic_text" }
    ]"#;
    assert!(matches!(
        TypedCodec::from_json(duplicate),
        Err(CodecError::DuplicateKey(_))
    ));

    let wildcard = r#"[{ "key": "a/#", "direction": "sensor", "data_format": "generic_text" }]"#;
    assert!(matches!(
        TypedCodec::from_json(wildcard),
        Err(CodecError::InvalidKey(_))
    ));

    let range = r#"[{ "key": "a", "direction": "actuator", "data_format": "continuous_numeric",
                      "min_value": 5, "max_value": 1 }]"#;
    assert!(matches!(
        TypedCodec::from_json(range),
        Err(CodecError::InvalidRange(_))
    ));

    let discrete = r#"[{ "key": "a", "direction": "actuator", "data_format": "discrete_text" }]"#;
    assert!(matches!(
        TypedCodec::from_json(discrete),
        Err(CodecError::MissingAllowedValues(_))
    ));
}

#[test]
fn datapoints_are_listed_by_key() {
    let codec = codec();
    let keys: Vec<_> = codec.datapoints().iter().map(|meta| meta.key.clone()).collect();
    assert_eq!(keys, vec!["1/2/3", "mode", "relay", "setpoint_1", "status", "temp_1"]);
}
