//! JSON-RPC 2.0 framing for the WebSocket transport.
//!
//! Inbound frames are decoded in two passes. A permissive pass reads the
//! optional `id`, `method`, `result`, `error` and `params` members to classify
//! the frame; a strict pass then parses the frame into the chosen variant.
//! A frame is a [`Notification`] only when it carries a non-empty `method` and
//! no `id`. Anything else, including a frame with both `method` and `id`, is a
//! [`Response`].

use crate::error::{Result, RpcError};
use serde::{de, Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error member of a response, carried verbatim from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response(Response),
    Notification(Notification),
}

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a Value,
}

pub fn encode_request(request: &Request) -> Result<String> {
    Ok(serde_json::to_string(&WireRequest {
        jsonrpc: JSONRPC_VERSION,
        id: request.id,
        method: &request.method,
        params: &request.params,
    })?)
}

pub fn encode_response(response: &Response) -> Result<String> {
    Ok(serde_json::to_string(&WireResponse {
        jsonrpc: JSONRPC_VERSION,
        id: response.id,
        result: response.result.as_ref(),
        error: response.error.as_ref(),
    })?)
}

pub fn encode_notification(notification: &Notification) -> Result<String> {
    Ok(serde_json::to_string(&WireNotification {
        jsonrpc: JSONRPC_VERSION,
        method: &notification.method,
        params: &notification.params,
    })?)
}

/// Decodes one inbound frame.
pub fn decode(bytes: &[u8]) -> Result<InboundMessage> {
    // First pass: untyped, only used to classify the frame.
    let value: Value =
        serde_json::from_slice(bytes).map_err(|source| decode_error("malformed message", source))?;
    let Some(object) = value.as_object() else {
        return Err(decode_error(
            "malformed message",
            de::Error::custom("expected a JSON object"),
        ));
    };

    let has_id = object.get("id").map_or(false, |id| !id.is_null());
    let has_method = object
        .get("method")
        .and_then(Value::as_str)
        .map_or(false, |method| !method.is_empty());

    if has_method && !has_id {
        serde_json::from_value::<Notification>(value)
            .map(InboundMessage::Notification)
            .map_err(|source| decode_error("malformed notification", source))
    } else {
        serde_json::from_value::<Response>(value)
            .map(InboundMessage::Response)
            .map_err(|source| decode_error("malformed response", source))
    }
}

fn decode_error(reason: &str, source: serde_json::Error) -> RpcError {
    RpcError::DecodeError {
        reason: reason.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_request_with_version_tag() {
        let request = Request::new(7, "public/instruments", json!({"kind": "option"}));
        let encoded: Value = serde_json::from_str(&encode_request(&request).unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "public/instruments",
                "params": {"kind": "option"}
            })
        );
    }

    #[test]
    fn decodes_success_response() {
        let msg = decode(br#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::Response(Response {
                id: Some(3),
                result: Some(json!({"ok": true})),
                error: None,
            })
        );
    }

    #[test]
    fn decodes_error_response_verbatim() {
        let msg =
            decode(br#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"no such method"}}"#)
                .unwrap();
        match msg {
            InboundMessage::Response(resp) => {
                assert_eq!(resp.id, Some(4));
                assert!(resp.result.is_none());
                assert_eq!(
                    resp.error,
                    Some(ErrorObject {
                        code: -32601,
                        message: "no such method".to_string()
                    })
                );
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn decodes_notification() {
        let msg =
            decode(br#"{"jsonrpc":"2.0","method":"ticker.BTC-PERP","params":{"mark":1.5}}"#)
                .unwrap();
        assert_eq!(
            msg,
            InboundMessage::Notification(Notification {
                method: "ticker.BTC-PERP".to_string(),
                params: json!({"mark": 1.5}),
            })
        );
    }

    #[test]
    fn method_with_id_is_a_response() {
        let msg = decode(br#"{"jsonrpc":"2.0","id":9,"method":"heartbeat","result":1}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Response(Response { id: Some(9), .. })));
    }

    #[test]
    fn empty_method_without_id_is_a_response() {
        let msg = decode(br#"{"jsonrpc":"2.0","method":"","result":1}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Response(Response { id: None, .. })));
    }

    #[test]
    fn negative_or_fractional_id_is_a_decode_error() {
        for frame in [
            &br#"{"jsonrpc":"2.0","id":-1,"result":1}"#[..],
            &br#"{"jsonrpc":"2.0","id":1.5,"result":1}"#[..],
        ] {
            assert!(matches!(decode(frame), Err(RpcError::DecodeError { .. })));
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode(b"not json"), Err(RpcError::DecodeError { .. })));
        assert!(matches!(decode(b"[1,2]"), Err(RpcError::DecodeError { .. })));
        assert!(matches!(decode(b"42"), Err(RpcError::DecodeError { .. })));
    }

    #[test]
    fn response_encoding_decodes_to_same_shape() {
        let original = Response {
            id: Some(12),
            result: None,
            error: Some(ErrorObject {
                code: 4,
                message: "insufficient margin".to_string(),
            }),
        };
        let encoded = encode_response(&original).unwrap();
        assert_eq!(
            decode(encoded.as_bytes()).unwrap(),
            InboundMessage::Response(original)
        );
    }
}
