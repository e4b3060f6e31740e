use serde_json::Value;
use uuid::Uuid;

/// Distinguishes "field not sent" from an explicit `null` in PUT bodies.
pub enum NullableValue<T> {
    Omitted,
    Null,
    Value(T),
}

pub fn classify_nullable_str(optional_value: Option<&Value>) -> Result<NullableValue<String>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Ok(NullableValue::Value(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn classify_nullable_uuid(optional_value: Option<&Value>) -> Result<NullableValue<Uuid>, String> {
    match optional_value {
        None => Ok(NullableValue::Omitted),
        Some(Value::Null) => Ok(NullableValue::Null),
        Some(Value::String(s)) => Uuid::parse_str(s)
            .map(NullableValue::Value)
            .map_err(|_| format!("expected a UUID, got {s:?}")),
        Some(other) => Err(format!("expected UUID or null, got {other}")),
    }
}
