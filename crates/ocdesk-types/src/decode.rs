//! Two-pass decoding for discriminated payloads.
//!
//! The first pass reads only the discriminator (`role` for messages, `type` for
//! parts and envelopes) and ignores every other field. The second pass decodes
//! the concrete variant's shape. Both passes work over either a raw JSON string
//! or an already-parsed [`serde_json::Value`] through [`PayloadSource`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {family} payload: {source}")]
    Malformed {
        family: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{family} payload is missing the `{field}` discriminator")]
    MissingDiscriminator {
        family: &'static str,
        field: &'static str,
    },

    #[error("unknown {family} {field} \"{value}\"")]
    UnknownDiscriminator {
        family: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("{family} payload is missing `{field}`")]
    MissingField {
        family: &'static str,
        field: &'static str,
    },
}

impl DecodeError {
    /// The raw discriminator value that could not be routed, if that is what failed.
    pub fn unknown_value(&self) -> Option<&str> {
        match self {
            DecodeError::UnknownDiscriminator { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Policy for part `type` values this crate has no variant for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartDecodeMode {
    /// Unknown kinds become [`crate::Part::Opaque`] holding the raw JSON.
    #[default]
    Lenient,
    /// Unknown kinds fail the whole decode.
    Strict,
}

#[derive(Deserialize)]
struct DiscriminatorPeek {
    #[serde(default)]
    role: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<Value>,
}

impl DiscriminatorPeek {
    fn take(self, field: &'static str) -> Option<Value> {
        match field {
            "role" => self.role,
            "type" => self.kind,
            _ => None,
        }
    }
}

pub(crate) trait PayloadSource {
    fn discriminator(&self, family: &'static str, field: &'static str)
        -> Result<String, DecodeError>;

    fn decode<T: DeserializeOwned>(&self, family: &'static str) -> Result<T, DecodeError>;

    fn to_raw(&self, family: &'static str) -> Result<Box<RawValue>, DecodeError>;
}

fn discriminator_string(
    value: Option<Value>,
    family: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Null) | None => Err(DecodeError::MissingDiscriminator { family, field }),
        Some(other) => Err(DecodeError::UnknownDiscriminator {
            family,
            field,
            value: other.to_string(),
        }),
    }
}

impl PayloadSource for &str {
    fn discriminator(
        &self,
        family: &'static str,
        field: &'static str,
    ) -> Result<String, DecodeError> {
        let peek: DiscriminatorPeek = serde_json::from_str(self)
            .map_err(|source| DecodeError::Malformed { family, source })?;
        discriminator_string(peek.take(field), family, field)
    }

    fn decode<T: DeserializeOwned>(&self, family: &'static str) -> Result<T, DecodeError> {
        serde_json::from_str(self).map_err(|source| DecodeError::Malformed { family, source })
    }

    fn to_raw(&self, family: &'static str) -> Result<Box<RawValue>, DecodeError> {
        RawValue::from_string(self.trim().to_string())
            .map_err(|source| DecodeError::Malformed { family, source })
    }
}

impl PayloadSource for &Value {
    fn discriminator(
        &self,
        family: &'static str,
        field: &'static str,
    ) -> Result<String, DecodeError> {
        if !self.is_object() {
            return Err(DecodeError::Malformed {
                family,
                source: serde::de::Error::custom(format!("expected a JSON object, got {self}")),
            });
        }
        discriminator_string(self.get(field).cloned(), family, field)
    }

    fn decode<T: DeserializeOwned>(&self, family: &'static str) -> Result<T, DecodeError> {
        T::deserialize(*self).map_err(|source| DecodeError::Malformed { family, source })
    }

    fn to_raw(&self, family: &'static str) -> Result<Box<RawValue>, DecodeError> {
        serde_json::value::to_raw_value(*self)
            .map_err(|source| DecodeError::Malformed { family, source })
    }
}
