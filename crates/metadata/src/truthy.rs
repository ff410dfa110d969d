//! Coercion of loosely typed JSON booleans.
//!
//! Metadata authors write flags as `true`, `"true"`, `1` or `"1"` (and the
//! matching false forms) interchangeably. Everything downstream only ever sees
//! a strict `bool`; any other scalar is a decode error.
//!
//! The module doubles as a serde `with` adaptor:
//!
//! ```ignore
//! #[serde(default, with = "crate::truthy")]
//! pub ignore_errors: bool,
//! ```

use crate::error::DecodeError;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

/// Coerce a JSON scalar into a strict boolean.
pub fn coerce(value: &Value) -> Result<bool, DecodeError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_u64() {
            Some(1) => Ok(true),
            Some(0) => Ok(false),
            _ => Err(invalid(value)),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(invalid(value)),
        },
        _ => Err(invalid(value)),
    }
}

fn invalid(value: &Value) -> DecodeError {
    DecodeError::InvalidBoolean {
        value: value.to_string(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce(&value).map_err(D::Error::custom)
}

pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_bool(*value)
}

/// Adaptor for optional flags, where absence means "leave as is".
pub mod option {
    use super::coerce;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        coerce(&value).map(Some).map_err(D::Error::custom)
    }

    pub fn serialize<S>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(b) => serializer.serialize_bool(*b),
            None => serializer.serialize_none(),
        }
    }
}
