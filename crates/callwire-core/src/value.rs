//! The serializable value model.
//!
//! Only JSON-representable data crosses the call boundary. Dates travel as
//! RFC 3339 strings.

use crate::error::ExecutionError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Any value that may be passed to or returned from a remote call.
pub type SerializableValue = serde_json::Value;

/// Serialize a Rust value into a [`SerializableValue`].
pub fn to_value<T: Serialize>(value: T) -> Result<SerializableValue, ExecutionError> {
    Ok(serde_json::to_value(value)?)
}

/// Decode the positional parameter at `index`.
///
/// A missing parameter is decoded from `null`, so `Option<T>` parameters may be
/// omitted by the caller.
pub fn param<T: DeserializeOwned>(
    parameters: &[SerializableValue],
    index: usize,
) -> Result<T, ExecutionError> {
    let value = parameters
        .get(index)
        .cloned()
        .unwrap_or(SerializableValue::Null);
    serde_json::from_value(value).map_err(|e| ExecutionError::InvalidParams {
        message: format!("parameter {}: {}", index, e),
    })
}

/// Decode the positional parameter at `index`, falling back to `T::default()`
/// when the caller omitted it or passed `null`.
pub fn param_or_default<T: DeserializeOwned + Default>(
    parameters: &[SerializableValue],
    index: usize,
) -> Result<T, ExecutionError> {
    match parameters.get(index) {
        None | Some(SerializableValue::Null) => Ok(T::default()),
        Some(_) => param(parameters, index),
    }
}

/// Encode a timestamp the way dates cross the wire.
pub fn from_date(date: DateTime<Utc>) -> SerializableValue {
    SerializableValue::String(date.to_rfc3339())
}

/// Decode a timestamp produced by [`from_date`].
pub fn to_date(value: &SerializableValue) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_param_decodes_positional_values() {
        let params = vec![json!(1), json!("two")];
        let a: i64 = param(&params, 0).unwrap();
        let b: String = param(&params, 1).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, "two");
    }

    #[test]
    fn test_param_missing_is_null() {
        let params: Vec<SerializableValue> = vec![];
        let missing: Option<i64> = param(&params, 0).unwrap();
        assert_eq!(missing, None);
        assert!(param::<i64>(&params, 0).is_err());
    }

    #[test]
    fn test_param_type_mismatch_is_invalid_params() {
        let params = vec![json!("not a number")];
        let err = param::<i64>(&params, 0).unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32602);
    }

    #[test]
    fn test_param_or_default() {
        let params = vec![json!(null), json!("a1")];
        let first: String = param_or_default(&params, 0).unwrap();
        let second: String = param_or_default(&params, 1).unwrap();
        let third: String = param_or_default(&params, 2).unwrap();
        assert_eq!(first, "");
        assert_eq!(second, "a1");
        assert_eq!(third, "");
    }

    #[test]
    fn test_date_round_trip() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let value = from_date(date);
        assert_eq!(value, json!("2024-03-01T12:30:00+00:00"));
        assert_eq!(to_date(&value), Some(date));
        assert_eq!(to_date(&json!(42)), None);
    }
}
