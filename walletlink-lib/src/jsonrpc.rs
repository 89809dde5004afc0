//! JSON-RPC 2.0 envelopes exchanged over relay topics.

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reason::Reason;

pub const JSONRPC_VERSION: &str = "2.0";

/// Wire method names.
pub mod methods {
    pub const PAIRING_APPROVE: &str = "wc_pairingApprove";
    pub const PAIRING_REJECT: &str = "wc_pairingReject";
    pub const PAIRING_UPDATE: &str = "wc_pairingUpdate";
    pub const PAIRING_PAYLOAD: &str = "wc_pairingPayload";
    pub const PAIRING_PING: &str = "wc_pairingPing";
    pub const PAIRING_DELETE: &str = "wc_pairingDelete";

    pub const SESSION_PROPOSE: &str = "wc_sessionPropose";
    pub const SESSION_APPROVE: &str = "wc_sessionApprove";
    pub const SESSION_REJECT: &str = "wc_sessionReject";
    pub const SESSION_UPDATE: &str = "wc_sessionUpdate";
    pub const SESSION_UPGRADE: &str = "wc_sessionUpgrade";
    pub const SESSION_PAYLOAD: &str = "wc_sessionPayload";
    pub const SESSION_NOTIFICATION: &str = "wc_sessionNotification";
    pub const SESSION_PING: &str = "wc_sessionPing";
    pub const SESSION_DELETE: &str = "wc_sessionDelete";

    pub const PAIRING_PREFIX: &str = "wc_pairing";
    pub const SESSION_PREFIX: &str = "wc_session";
}

/// Generate a request id: millisecond timestamp with three random digits appended.
pub fn next_id() -> u64 {
    let millis = crate::now_millis().max(0) as u64;
    millis * 1000 + rand::thread_rng().gen_range(0..1000)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self::with_id(next_id(), method, params)
    }

    pub fn with_id(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Deserialize the params into a typed structure.
    pub fn parse_params<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_value(self.params.clone())?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl From<&Reason> for JsonRpcError {
    fn from(reason: &Reason) -> Self {
        Self {
            code: reason.code,
            message: reason.message.clone(),
        }
    }
}

impl From<JsonRpcError> for Reason {
    fn from(error: JsonRpcError) -> Self {
        Reason::new(error.code, error.message)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: u64, reason: &Reason) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split the response into its result or the peer's refusal.
    pub fn into_result(self) -> std::result::Result<Value, Reason> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Anything that can arrive on a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcPayload {
    pub fn id(&self) -> u64 {
        match self {
            Self::Request(r) => r.id,
            Self::Response(r) => r.id,
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcPayload {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcPayload {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::ReasonCode;
    use serde_json::json;

    #[test]
    fn ids_are_timestamp_scaled() {
        let before = crate::now_millis() as u64 * 1000;
        let id = next_id();
        assert!(id >= before);
        assert!(id < (crate::now_millis() as u64 + 1) * 1000);
    }

    #[test]
    fn untagged_payload_distinguishes_requests() {
        let raw = r#"{"id":1,"jsonrpc":"2.0","method":"wc_sessionPing","params":{}}"#;
        match serde_json::from_str::<JsonRpcPayload>(raw).unwrap() {
            JsonRpcPayload::Request(req) => assert_eq!(req.method, methods::SESSION_PING),
            other => panic!("expected request, got {:?}", other),
        }

        let raw = r#"{"id":1,"jsonrpc":"2.0","result":true}"#;
        match serde_json::from_str::<JsonRpcPayload>(raw).unwrap() {
            JsonRpcPayload::Response(resp) => assert_eq!(resp.result, Some(json!(true))),
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn error_response_carries_reason() {
        let reason = Reason::from_code(ReasonCode::UnauthorizedUpdateRequest);
        let resp = JsonRpcResponse::failure(9, &reason);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], json!(3003));
        assert!(json.get("result").is_none());

        assert_eq!(resp.into_result().unwrap_err(), reason);
    }

    #[test]
    fn success_without_result_is_null() {
        let resp: JsonRpcResponse = serde_json::from_str(r#"{"id":4,"jsonrpc":"2.0"}"#).unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}
