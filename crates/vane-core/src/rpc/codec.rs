//! JSON-RPC 2.0 wire encoding and decoding.
//!
//! Stateless: every function maps text to values or values to text. Inbound
//! text is classified into a single response, a batch of responses, or an
//! id-less notification.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ClientError, RpcError};

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [serde_json::Value],
    id: u64,
}

/// One element of an outbound batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

/// A decoded response, correlated to its request by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Result<serde_json::Value, RpcError>,
}

/// A server-initiated message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Notification {
    /// Deserialize the positional params into a typed payload.
    pub fn decode_params<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_value(serde_json::Value::Array(self.params.clone())).map_err(|source| {
            ClientError::UnexpectedResult {
                method: self.method.clone(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response(Response),
    Batch(Vec<Response>),
    Notification(Notification),
}

// ==============================================================================
// Encoding
// ==============================================================================

pub fn encode_request(
    method: &str,
    params: &[serde_json::Value],
    id: u64,
) -> Result<String, ClientError> {
    serde_json::to_string(&JsonRpcRequest {
        jsonrpc: "2.0",
        method,
        params,
        id,
    })
    .map_err(|e| ClientError::Protocol(format!("encode request `{method}`: {e}")))
}

/// Encode requests as a single JSON array envelope.
pub fn encode_batch(requests: &[Request]) -> Result<String, ClientError> {
    let envelope: Vec<JsonRpcRequest<'_>> = requests
        .iter()
        .map(|req| JsonRpcRequest {
            jsonrpc: "2.0",
            method: &req.method,
            params: &req.params,
            id: req.id,
        })
        .collect();
    serde_json::to_string(&envelope)
        .map_err(|e| ClientError::Protocol(format!("encode batch request: {e}")))
}

// ==============================================================================
// Decoding
// ==============================================================================

/// Classify and decode one inbound JSON text.
///
/// Batch elements that cannot be decoded are logged and skipped so the rest
/// of the batch still resolves.
pub fn decode(text: &str) -> Result<Incoming, ClientError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| ClientError::Protocol(format!("invalid JSON: {e}")))?;

    match value {
        serde_json::Value::Array(items) => {
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                match decode_response(item) {
                    Ok(response) => responses.push(response),
                    Err(err) => warn!(error = %err, "skipping undecodable batch element"),
                }
            }
            Ok(Incoming::Batch(responses))
        }
        serde_json::Value::Object(_) => {
            let has_id = value.get("id").is_some_and(|id| !id.is_null());
            if has_id {
                decode_response(value).map(Incoming::Response)
            } else {
                serde_json::from_value(value)
                    .map(Incoming::Notification)
                    .map_err(|e| ClientError::Protocol(format!("invalid notification: {e}")))
            }
        }
        other => Err(ClientError::Protocol(format!(
            "expected JSON object or array, got: {other}"
        ))),
    }
}

fn decode_response(value: serde_json::Value) -> Result<Response, ClientError> {
    #[derive(Deserialize)]
    struct JsonRpcResponse {
        id: serde_json::Value,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<serde_json::Value>,
    }

    let decoded: JsonRpcResponse = serde_json::from_value(value)
        .map_err(|e| ClientError::Protocol(format!("invalid response: {e}")))?;
    let id = parse_id(&decoded.id)?;

    let outcome = match decoded.error {
        Some(err) if !err.is_null() => Err(parse_jsonrpc_error(err)),
        _ => Ok(decoded.result.unwrap_or(serde_json::Value::Null)),
    };
    Ok(Response { id, outcome })
}

/// Parse a JSON-RPC error value into an [`RpcError`].
///
/// The JSON-RPC spec defines errors as `{"code": <int>, "message": <string>,
/// "data"?: <any>}`. Servers that answer with anything else get the raw value
/// as both message and data, with code `0`.
pub(crate) fn parse_jsonrpc_error(err: serde_json::Value) -> RpcError {
    #[derive(Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError {
            code: parsed.code,
            message: parsed.message,
            data: parsed.data,
        },
        Err(_) => RpcError {
            code: 0,
            message: match &err {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            data: Some(err),
        },
    }
}

/// Response ids are echoed as numbers, but some servers stringify them.
pub(crate) fn parse_id(id: &serde_json::Value) -> Result<u64, ClientError> {
    if let Some(n) = id.as_u64() {
        return Ok(n);
    }

    if let Some(s) = id.as_str() {
        return s
            .parse::<u64>()
            .map_err(|e| ClientError::Protocol(format!("invalid response id string: {e}")));
    }

    Err(ClientError::Protocol(format!("invalid response id: {id}")))
}
