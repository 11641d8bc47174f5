// src/protocol/envelope.rs

//! Envelope codec.
//!
//! Each transport frame carries one UTF-8 JSON object with exactly two
//! top-level fields:
//!
//! ```text
//! {"method": "add", "args": {"a": 1, "b": 2}}
//! ```
//!
//! `method` must be a non-empty string. `args` is any JSON value and is
//! treated as opaque, except that [`inject_correlation`] may merge a
//! correlation id into it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CorrelationId, Result, RpcError, CORRELATION_FIELD};

/// Reserved method name for the polite shutdown notice sent by `close()`.
pub const CLOSE_METHOD: &str = "close";

/// The `{method, args}` unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Name used to route the envelope to a handler.
    pub method: String,

    /// Opaque payload. Decodes to `Value::Null` when absent on the wire.
    #[serde(default)]
    pub args: Value,
}

impl Envelope {
    // ---
    /// Create an envelope from a method name and an already-encoded payload.
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Create an envelope by serializing `args` with serde.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Serialization` if `args` cannot be represented as JSON.
    pub fn from_args<T: Serialize>(method: impl Into<String>, args: &T) -> Result<Self> {
        Ok(Self::new(method, serde_json::to_value(args)?))
    }

    /// Deserialize `args` into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Serialization` if the payload does not match `T`.
    pub fn args_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.args)?)
    }
}

/// Encode an envelope into a wire frame.
///
/// # Errors
///
/// Returns `RpcError::InvalidEnvelope` if `method` is empty.
pub fn encode(env: &Envelope) -> Result<Bytes> {
    // ---
    if env.method.is_empty() {
        return Err(RpcError::InvalidEnvelope("method must not be empty".into()));
    }

    let bytes = serde_json::to_vec(env)?;
    Ok(Bytes::from(bytes))
}

/// Decode a wire frame into an envelope.
///
/// # Errors
///
/// Returns `RpcError::Decode` if the frame is not a JSON object with a
/// non-empty string `method`.
pub fn decode(frame: &[u8]) -> Result<Envelope> {
    // ---
    let env: Envelope =
        serde_json::from_slice(frame).map_err(|err| RpcError::Decode(err.to_string()))?;

    if env.method.is_empty() {
        return Err(RpcError::Decode("method must not be empty".into()));
    }

    Ok(env)
}

/// Merge a correlation id into request `args`.
///
/// Object payloads gain a `correlation_id` field (overwriting any existing
/// one); `null` becomes `{"correlation_id": id}`.
///
/// # Errors
///
/// Returns `RpcError::InvalidEnvelope` for arrays and scalars, which have no
/// place to carry the id.
pub fn inject_correlation(args: Value, id: &CorrelationId) -> Result<Value> {
    // ---
    let mut map = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(RpcError::InvalidEnvelope(format!(
                "correlated request args must be an object or null, got {}",
                kind_of(&other)
            )))
        }
    };

    map.insert(
        CORRELATION_FIELD.to_string(),
        Value::String(id.as_str().to_string()),
    );
    Ok(Value::Object(map))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_is_stable() {
        // ---
        let payloads = [
            json!(null),
            json!({"a": 1, "b": [true, "x"]}),
            json!([1, 2, 3]),
            json!("text"),
            json!(3.5),
        ];

        for args in payloads {
            let env = Envelope::new("m", args);
            let first = encode(&env).unwrap();
            let second = encode(&decode(&first).unwrap()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_missing_args_decodes_as_null() {
        // ---
        let env = decode(br#"{"method":"ping"}"#).unwrap();
        assert_eq!(env.method, "ping");
        assert_eq!(env.args, Value::Null);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        // ---
        assert!(matches!(decode(b"not json"), Err(RpcError::Decode(_))));
        assert!(matches!(decode(br#"{"args":1}"#), Err(RpcError::Decode(_))));
        assert!(matches!(
            decode(br#"{"method":7,"args":1}"#),
            Err(RpcError::Decode(_))
        ));
        assert!(matches!(
            decode(br#"{"method":"","args":1}"#),
            Err(RpcError::Decode(_))
        ));
    }

    #[test]
    fn test_encode_rejects_empty_method() {
        // ---
        let env = Envelope::new("", json!({}));
        assert!(matches!(encode(&env), Err(RpcError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_inject_into_object_and_null() {
        // ---
        let id = CorrelationId::from("id-1");

        let merged = inject_correlation(json!({"a": 1, "b": 2}), &id).unwrap();
        assert_eq!(merged, json!({"a": 1, "b": 2, "correlation_id": "id-1"}));

        let merged = inject_correlation(Value::Null, &id).unwrap();
        assert_eq!(merged, json!({"correlation_id": "id-1"}));
    }

    #[test]
    fn test_inject_rejects_scalars() {
        // ---
        let id = CorrelationId::from("id-1");
        assert!(matches!(
            inject_correlation(json!([1]), &id),
            Err(RpcError::InvalidEnvelope(_))
        ));
    }

    #[test]
    fn test_args_as() {
        // ---
        #[derive(Deserialize)]
        struct Sum {
            sum: i32,
        }

        let env = Envelope::new("r", json!({"sum": 3}));
        let sum: Sum = env.args_as().unwrap();
        assert_eq!(sum.sum, 3);
    }
}
