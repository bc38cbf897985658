//! JSON-RPC 2.0 message types for daemon communication.

use lnm_core::RpcProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version string carried by every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id assigned to each outgoing request.
pub type RequestId = u64;

// ============================================================================
// Outgoing
// ============================================================================

/// A JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl Request {
    /// Creates a request. A `null` params value is sent as an empty object,
    /// which the daemon accepts for every parameterless method.
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Builds an error object from whatever the daemon put in `error`.
    ///
    /// Non-object payloads are kept as the message text.
    fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value.clone()).unwrap_or_else(|_| Self {
                code: 0,
                message: value.to_string(),
                data: None,
            }),
            Value::String(message) => Self {
                code: 0,
                message,
                data: None,
            },
            other => Self {
                code: 0,
                message: other.to_string(),
                data: None,
            },
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to one of our requests.
    Response {
        id: RequestId,
        outcome: Result<Value, ErrorObject>,
    },

    /// Unsolicited message from the daemon.
    Notification { method: String, params: Value },
}

impl Inbound {
    /// Classifies a decoded JSON value.
    ///
    /// # Errors
    ///
    /// - `RpcProtocolError::UnknownId` if a response id is not one we could
    ///   have issued (not an unsigned integer)
    /// - `RpcProtocolError::Malformed` if the frame is neither a response
    ///   nor a notification
    pub fn classify(frame: Value) -> Result<Self, RpcProtocolError> {
        let Value::Object(mut object) = frame else {
            return Err(RpcProtocolError::Malformed(format!(
                "expected a JSON object, got {}",
                type_name(&frame)
            )));
        };

        let has_outcome = object.contains_key("result") || object.contains_key("error");
        let id = object.remove("id").filter(|id| !id.is_null());

        match (id, has_outcome) {
            (Some(id), true) => {
                let Some(id) = id.as_u64() else {
                    return Err(RpcProtocolError::UnknownId(id.to_string()));
                };
                let outcome = match object.remove("error").filter(|e| !e.is_null()) {
                    Some(error) => Err(ErrorObject::from_value(error)),
                    None => Ok(object.remove("result").unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, outcome })
            }
            (_, false) => match object.remove("method") {
                Some(Value::String(method)) => Ok(Self::Notification {
                    method,
                    params: object.remove("params").unwrap_or(Value::Null),
                }),
                _ => Err(RpcProtocolError::Malformed(
                    "frame has neither result, error nor method".to_string(),
                )),
            },
            (None, true) => Err(RpcProtocolError::Malformed(
                "response without id".to_string(),
            )),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_jsonrpc_fields() {
        let request = Request::new(7, "getinfo", Value::Null);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({"jsonrpc": "2.0", "id": 7, "method": "getinfo", "params": {}})
        );
    }

    #[test]
    fn test_request_keeps_positional_params() {
        let request = Request::new(1, "listinvoices", json!(["label-1"]));
        assert_eq!(request.params, json!(["label-1"]));
    }

    #[test]
    fn test_classify_result() {
        let inbound =
            Inbound::classify(json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            }
        );
    }

    #[test]
    fn test_classify_error_object() {
        let inbound = Inbound::classify(json!({
            "id": 4,
            "error": {"code": -32601, "message": "Unknown command 'nope'"}
        }))
        .unwrap();
        match inbound {
            Inbound::Response { id, outcome: Err(err) } => {
                assert_eq!(id, 4);
                assert_eq!(err.code, -32601);
                assert!(err.message.contains("nope"));
            }
            other => panic!("Expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_string_error_payload() {
        let inbound = Inbound::classify(json!({"id": 5, "error": "boom"})).unwrap();
        match inbound {
            Inbound::Response { outcome: Err(err), .. } => assert_eq!(err.message, "boom"),
            other => panic!("Expected error response, got {other:?}"),
        }
    }

    #[test]
    fn test_null_error_means_result() {
        let inbound = Inbound::classify(json!({"id": 6, "error": null, "result": 1})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Response {
                id: 6,
                outcome: Ok(json!(1))
            }
        );
    }

    #[test]
    fn test_classify_notification() {
        let inbound = Inbound::classify(json!({
            "jsonrpc": "2.0",
            "method": "log",
            "params": {"level": "info"}
        }))
        .unwrap();
        assert_eq!(
            inbound,
            Inbound::Notification {
                method: "log".to_string(),
                params: json!({"level": "info"})
            }
        );
    }

    #[test]
    fn test_string_id_is_unknown() {
        let err = Inbound::classify(json!({"id": "abc", "result": {}})).unwrap_err();
        assert_eq!(err, RpcProtocolError::UnknownId("\"abc\"".to_string()));
    }

    #[test]
    fn test_negative_id_is_unknown() {
        let err = Inbound::classify(json!({"id": -1, "result": {}})).unwrap_err();
        assert!(matches!(err, RpcProtocolError::UnknownId(_)));
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = Inbound::classify(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, RpcProtocolError::Malformed(ref m) if m.contains("array")));
    }

    #[test]
    fn test_response_without_id_is_malformed() {
        let err = Inbound::classify(json!({"result": {}})).unwrap_err();
        assert!(matches!(err, RpcProtocolError::Malformed(_)));
    }

    #[test]
    fn test_empty_object_is_malformed() {
        assert!(Inbound::classify(json!({})).is_err());
    }
}
