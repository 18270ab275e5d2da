//
// message.rs
//
// Wire message shapes (spec §6). Field names are normative. Every
// message carries `rpc_marker = "srpc"`; a message lacking it is
// silently ignored by the runtime rather than treated as an error.
//

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::{CallType, DescriptorTable};
use crate::error::{Error, Result};

/// The fixed marker every srpc message carries on the wire.
pub const RPC_MARKER: &str = "srpc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    PropGet,
    PropSet,
    MethodCall,
    FnCall,
    CtorCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
    pub action: CallAction,
    pub obj_id: String,
    pub call_type: CallType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prop: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    /// The caller's `current_context` at the time of the call (spec §4.G),
    /// re-installed around dispatch so host code — and anything it calls
    /// onward — observes the same value the caller had.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFnResult {
    pub success: bool,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncFnResult {
    pub success: bool,
    pub result: Value,
    pub call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDiedMessage {
    pub obj_id: String,
}

/// The envelope actually placed on (or taken off) the channel. `rpc_marker`
/// is checked first; messages without it are dropped before `body` is even
/// looked at (spec §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, rename = "rpc_marker")]
    pub rpc_marker: Option<String>,
    #[serde(flatten)]
    pub body: Body,
}

impl Envelope {
    pub fn new(body: Body) -> Self {
        Self { rpc_marker: Some(RPC_MARKER.to_string()), body }
    }

    pub fn has_marker(&self) -> bool {
        self.rpc_marker.as_deref() == Some(RPC_MARKER)
    }

    /// Decodes a raw wire value into an `Envelope`. A transport that
    /// receives undecoded values (rather than already-typed ones) should
    /// call this before handing the result to `Runtime::on_message`: it
    /// translates anything the wire format doesn't recognize — an unknown
    /// `action_kind`/`call_type` tag among them — into `Error::ProtocolError`
    /// instead of a bare `serde_json::Error` (spec §8 testable property
    /// "unknown action raises `ProtocolError`").
    pub fn decode(raw: &Value) -> Result<Self> {
        serde_json::from_value(raw.clone())
            .map_err(|err| Error::ProtocolError(format!("malformed envelope: {}", err)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action_kind")]
pub enum Body {
    GetDescriptors,
    DescriptorsResult(DescriptorTable),
    Call(CallMessage),
    SyncFnResult(SyncFnResult),
    AsyncFnResult(AsyncFnResult),
    ObjectDied(ObjectDiedMessage),
}

/// Sentinel embedded in serialized values for a live future, a registered
/// host-class instance, or a generic object registered solely to carry
/// identity. `class_id = Some("Promise")` denotes a live future.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcObject {
    pub obj_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
}

pub const PROMISE_CLASS_ID: &str = "Promise";

impl RpcObject {
    pub fn is_promise(&self) -> bool {
        self.class_id.as_deref() == Some(PROMISE_CLASS_ID)
    }
}

/// Sentinel for a marshalled callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFunction {
    pub obj_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_type: Option<String>,
}

impl RpcFunction {
    pub fn new(obj_id: impl Into<String>) -> Self {
        Self { obj_id: obj_id.into(), rpc_type: Some("function".to_string()) }
    }
}

/// Attempts to read `value` as one of the two reference sentinels. Order
/// matters: an `RpcFunction` is distinguished from a generic `RpcObject` by
/// the presence of `rpc_type = "function"`.
pub enum Sentinel {
    Function(RpcFunction),
    Object(RpcObject),
}

pub fn decode_sentinel(value: &Value) -> Option<Sentinel> {
    let map = value.as_object()?;
    if !map.contains_key("obj_id") {
        return None;
    }
    if map.get("rpc_type").and_then(Value::as_str) == Some("function") {
        serde_json::from_value::<RpcFunction>(value.clone())
            .ok()
            .map(Sentinel::Function)
    } else {
        serde_json::from_value::<RpcObject>(value.clone())
            .ok()
            .map(Sentinel::Object)
    }
}
