//
// marshal.rs
//
// The before-send / after-receive pipeline (spec §4.D). Rust has no
// runtime reflection over arbitrary types, so the "walk an arbitrary
// object graph" step the spec describes is made explicit: host code
// builds an `Outbound` value describing *what kind* of thing a result
// is (a plain value, a future, a registered instance, a callback, or a
// record to walk recursively) instead of the runtime discovering that
// by reflection. This is the same adaptation spec §9's design notes
// call for in the proxy factory, applied here to marshalling.
//

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Notify;

use crate::descriptor::{ArgumentDescriptor, FunctionDescriptor, ObjectDescriptor};
use crate::error::{Error, Result};
use crate::host::{HostFunction, HostObject};
use crate::message::{decode_sentinel, RpcFunction, RpcObject, Sentinel, PROMISE_CLASS_ID};
use crate::proxy::Proxy;
use crate::runtime::Runtime;

/// What the host side hands the marshaller to describe a value that is
/// about to cross the wire.
pub enum Outbound {
    Null,
    /// An already-primitive/string/structurally-plain value (spec rule 6).
    Value(Value),
    /// A pending result (spec rule 2).
    Future(BoxFuture<'static, Result<Value>>),
    /// An instance of a registered host class (spec rule 3). The class
    /// must already be registered via `register_host_class`.
    Instance { class_id: String, target: Arc<dyn HostObject>, descriptor: ObjectDescriptor },
    /// A callable value (spec rule 4).
    Callback(Arc<dyn HostFunction>),
    /// A general record-like value: its readable fields, each itself an
    /// `Outbound` (spec rule 5). Registered generically only if at least
    /// one field changed under marshalling.
    Record(Vec<(String, Outbound)>),
}

impl Outbound {
    pub fn value(v: impl Into<Value>) -> Self {
        Outbound::Value(v.into())
    }
}

/// What the unmarshaller is told to expect for a given position (an
/// argument, a property value, a return value).
pub struct Expected {
    pub kind: ExpectedKind,
    /// Tag used to look up a custom deserializer (spec §6's
    /// `register_deserializer` hook). `None` only consults the universal
    /// fallback, if any is registered.
    pub type_tag: Option<String>,
}

pub enum ExpectedKind {
    /// Any value, including null, is acceptable.
    Any,
    /// Null is a violation (spec unmarshal rule 1).
    NonNull,
    /// This position is a callback; use the given shape when it arrives
    /// as an `RPC_Function` sentinel.
    Callback(FunctionDescriptor),
}

impl Expected {
    pub fn any() -> Self {
        Self { kind: ExpectedKind::Any, type_tag: None }
    }

    pub fn non_null() -> Self {
        Self { kind: ExpectedKind::NonNull, type_tag: None }
    }

    pub fn callback(descriptor: FunctionDescriptor) -> Self {
        Self { kind: ExpectedKind::Callback(descriptor), type_tag: None }
    }

    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.type_tag = Some(tag.into());
        self
    }
}

/// A remote callable: either a free function (`GetProxyFunction`) or a
/// callback received as an `RPC_Function` argument. Both route through
/// the `fn_call` action (spec §4.F).
#[derive(Clone)]
pub struct RemoteCallback {
    pub(crate) runtime: Runtime,
    pub(crate) obj_id: String,
    pub(crate) descriptor: FunctionDescriptor,
}

impl RemoteCallback {
    pub fn obj_id(&self) -> &str {
        &self.obj_id
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self.runtime
            .invoke_fn_call(&self.obj_id, args, self.descriptor.returns)
            .await
    }
}

/// A custom deserializer hook (spec §6 `register_deserializer`): given the
/// raw wire value and the type tag it was registered under, produces the
/// in-memory value to hand to host code.
pub type Deserializer = Arc<dyn Fn(&Value, &str) -> Result<Value> + Send + Sync>;

/// Result of unmarshalling one argument/value position.
pub enum ArgValue {
    Value(Value),
    Future(BoxFuture<'static, Result<Value>>),
    Callback(RemoteCallback),
    Proxy(Proxy),
}

impl ArgValue {
    pub fn into_value(self) -> Result<Value> {
        match self {
            ArgValue::Value(v) => Ok(v),
            _ => Err(Error::MarshalError("expected a plain value".to_string())),
        }
    }
}

impl Runtime {
    /// Before-send marshalling (spec §4.D "Before-send"). `barrier`, when
    /// set, is the current inbound call's reply-sent barrier: a future
    /// discovered while marshalling waits for it before its settlement is
    /// reported, preserving the "caller sees the reply before the
    /// follow-up settlement" ordering rule (spec §4.E, §5).
    pub fn marshal(&self, outbound: Outbound, barrier: Option<Arc<Notify>>) -> Value {
        self.marshal_inner(outbound, barrier).0
    }

    fn marshal_inner(&self, outbound: Outbound, barrier: Option<Arc<Notify>>) -> (Value, bool) {
        match outbound {
            Outbound::Null => (Value::Null, false),
            Outbound::Value(v) => (v, false),
            Outbound::Future(fut) => {
                let obj_id = self.mint_pending_future(fut, barrier);
                let sentinel = RpcObject {
                    obj_id,
                    props: None,
                    class_id: Some(PROMISE_CLASS_ID.to_string()),
                };
                (serde_json::to_value(sentinel).expect("sentinel always serializes"), true)
            }
            Outbound::Instance { class_id, target, descriptor } => {
                let props = self.eval_readonly_properties(&descriptor, target.as_ref());
                let obj_id = self.register_host_instance(target, descriptor);
                let sentinel = RpcObject { obj_id, props: Some(props), class_id: Some(class_id) };
                (serde_json::to_value(sentinel).expect("sentinel always serializes"), true)
            }
            Outbound::Callback(target) => {
                let obj_id = self.register_host_callback(target);
                (
                    serde_json::to_value(RpcFunction::new(obj_id)).expect("sentinel always serializes"),
                    true,
                )
            }
            Outbound::Record(fields) => {
                let mut changed = false;
                let mut map = serde_json::Map::new();
                for (name, field) in fields {
                    let (value, field_changed) = self.marshal_inner(field, barrier.clone());
                    changed |= field_changed;
                    map.insert(name, value);
                }
                if changed {
                    let obj_id = self.register_generic_object();
                    let sentinel =
                        RpcObject { obj_id, props: Some(Value::Object(map)), class_id: None };
                    (serde_json::to_value(sentinel).expect("sentinel always serializes"), true)
                } else {
                    (Value::Object(map), false)
                }
            }
        }
    }

    fn eval_readonly_properties(&self, descriptor: &ObjectDescriptor, target: &dyn HostObject) -> Value {
        let mut map = serde_json::Map::new();
        for name in &descriptor.readonly_properties {
            match target.get_property(name) {
                Ok(v) => {
                    map.insert(name.clone(), v);
                }
                Err(err) => {
                    log::warn!("readonly property '{}' could not be evaluated: {}", name, err);
                }
            }
        }
        Value::Object(map)
    }

    /// After-receive unmarshalling (spec §4.D "After-receive"), driven by
    /// `expected`. Implements steps 1-5 in order; a custom deserializer
    /// (step 3) only runs once no sentinel matched.
    pub fn unmarshal(&self, raw: &Value, expected: &Expected) -> Result<ArgValue> {
        if raw.is_null() {
            return match expected.kind {
                ExpectedKind::NonNull => {
                    Err(Error::MarshalError("null where a value type was expected".to_string()))
                }
                _ => Ok(ArgValue::Value(Value::Null)),
            };
        }

        if let Some(sentinel) = decode_sentinel(raw) {
            match sentinel {
                Sentinel::Function(func) => {
                    let descriptor = match &expected.kind {
                        ExpectedKind::Callback(fd) => fd.clone(),
                        _ => FunctionDescriptor::new("call", crate::descriptor::CallType::Async),
                    };
                    return Ok(ArgValue::Callback(RemoteCallback {
                        runtime: self.clone(),
                        obj_id: func.obj_id,
                        descriptor,
                    }));
                }
                Sentinel::Object(_) if matches!(expected.kind, ExpectedKind::Callback(_)) => {
                    return Err(Error::MarshalError(
                        "expected a callback argument, found an object sentinel".to_string(),
                    ));
                }
                Sentinel::Object(obj) if obj.is_promise() => {
                    return Ok(ArgValue::Future(self.future_for_promise(obj.obj_id)));
                }
                Sentinel::Object(obj) => {
                    if let Some(class_id) = &obj.class_id {
                        if let Some(spec) = self.proxy_class_spec(class_id) {
                            let descriptor = self
                                .remote_object_descriptor(&obj.obj_id)
                                .or_else(|| self.remote_class_instance_descriptor(class_id))
                                .unwrap_or_default();
                            spec.validate(class_id, &descriptor)?;
                            let readonly = obj
                                .props
                                .clone()
                                .and_then(|v| v.as_object().cloned())
                                .map(|m| m.into_iter().collect::<HashMap<_, _>>())
                                .unwrap_or_default();
                            return Ok(ArgValue::Proxy(Proxy::new(
                                self.clone(),
                                obj.obj_id,
                                descriptor,
                                readonly,
                            )));
                        }
                    }
                    // Generic object, or an instance of a class with no
                    // registered proxy spec: reconstruct structurally,
                    // same path a sentinel-free value takes below, so any
                    // callback/future/proxy nested inside its props is
                    // rebuilt rather than handed back as raw JSON.
                    return self.unmarshal_plain(obj.props.unwrap_or(Value::Null), expected);
                }
            }
        }

        if matches!(expected.kind, ExpectedKind::Callback(_)) {
            return Err(Error::MarshalError("expected a callback argument, found a plain value".to_string()));
        }

        self.unmarshal_plain(raw.clone(), expected)
    }

    /// Steps 3 and 5 of after-receive unmarshalling, shared by a value that
    /// never carried a sentinel and by a generic/unregistered object
    /// sentinel's unwrapped props: try a registered custom deserializer
    /// first, else recurse into a map's entries, else return it as-is.
    fn unmarshal_plain(&self, value: Value, expected: &Expected) -> Result<ArgValue> {
        if let Some(custom) = self.custom_deserializer(expected.type_tag.as_deref()) {
            let tag = expected.type_tag.as_deref().unwrap_or("");
            return Ok(ArgValue::Value(custom(&value, tag)?));
        }

        if let Value::Object(map) = value {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k, self.unmarshal(&v, &Expected::any())?.into_value()?);
            }
            return Ok(ArgValue::Value(Value::Object(out)));
        }

        Ok(ArgValue::Value(value))
    }

    /// Resolves each position in `args` against `descriptor.arguments` via
    /// `ArgumentDescriptor::select` and coerces it against that shape
    /// (spec §4.E: a call's arguments are "coerced against... any
    /// per-argument descriptors"). A position with no matching descriptor,
    /// or one that doesn't declare a callback, is only checked structurally
    /// (`Expected::any()`); a declared callback position must actually
    /// decode as a callback sentinel or this fails with `MarshalError`.
    pub(crate) fn coerce_arguments(&self, args: &[Value], descriptor: &FunctionDescriptor) -> Result<()> {
        for (idx, arg) in args.iter().enumerate() {
            let expected = match ArgumentDescriptor::select(&descriptor.arguments, idx).and_then(|d| d.callback.as_deref()) {
                Some(callback) => Expected::callback(callback.clone()),
                None => Expected::any(),
            };
            self.unmarshal(arg, &expected)?;
        }
        Ok(())
    }
}
