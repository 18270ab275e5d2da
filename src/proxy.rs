//
// proxy.rs
//
// Proxy factory (spec §4.F). Rust cannot stamp out a new type at runtime
// implementing an arbitrary declared interface, so per spec §9 design
// note (b) a single `Proxy` struct routes every member through the
// channel via a name-indexed lookup against the remote `ObjectDescriptor`
// (the descriptor itself serving as the "method table"). A hand-written
// wrapper type per remote interface narrows `Proxy`'s untyped accessors
// to typed ones; `ProxyInterface` is the contract such a wrapper
// implements, and is what `register_proxy_class` validates against.
//

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::descriptor::ObjectDescriptor;
use crate::error::{Error, Result};
use crate::message::CallAction;
use crate::runtime::Runtime;

/// The shared, reference-counted part of a `Proxy`. Its `Drop` fires the
/// `ObjectDied` notification (spec §3 Lifecycle) exactly once, when the
/// last clone of the proxy goes away — not once per clone.
struct ProxyHandle {
    runtime: Runtime,
    obj_id: String,
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let runtime = self.runtime.clone();
            let obj_id = self.obj_id.clone();
            handle.spawn(async move {
                if let Err(err) = runtime.notify_object_died(&obj_id).await {
                    log::warn!("failed to notify peer that '{}' died: {}", obj_id, err);
                }
            });
        } else {
            log::warn!("dropping proxy '{}' outside a tokio runtime; peer not notified", self.obj_id);
        }
    }
}

/// A local stand-in for a remote host object. `obj_id` is bound
/// immutably at construction (spec invariant 3) and never re-assigned.
#[derive(Clone)]
pub struct Proxy {
    handle: Arc<ProxyHandle>,
    descriptor: ObjectDescriptor,
    readonly: HashMap<String, Value>,
}

impl Proxy {
    pub(crate) fn new(
        runtime: Runtime,
        obj_id: String,
        descriptor: ObjectDescriptor,
        readonly: HashMap<String, Value>,
    ) -> Self {
        Self { handle: Arc::new(ProxyHandle { runtime, obj_id }), descriptor, readonly }
    }

    fn runtime(&self) -> &Runtime {
        &self.handle.runtime
    }

    pub fn obj_id(&self) -> &str {
        &self.handle.obj_id
    }

    pub fn descriptor(&self) -> &ObjectDescriptor {
        &self.descriptor
    }

    /// Reads a readonly property from the inline bag shipped with the
    /// object descriptor — no round trip.
    pub fn readonly_property(&self, name: &str) -> Result<Value> {
        self.readonly.get(name).cloned().ok_or_else(|| Error::MemberNotFound {
            id: self.obj_id().to_string(),
            member: name.to_string(),
        })
    }

    pub async fn get_property(&self, name: &str) -> Result<Value> {
        if self.descriptor.is_readonly_property(name) {
            return self.readonly_property(name);
        }
        let prop = self.descriptor.property(name).ok_or_else(|| Error::SpecMismatch {
            class_id: self.obj_id().to_string(),
            member: name.to_string(),
        })?;
        let getter = prop.get.as_ref().ok_or_else(|| Error::MemberNotFound {
            id: self.obj_id().to_string(),
            member: name.to_string(),
        })?;
        self.runtime()
            .invoke(CallAction::PropGet, self.obj_id(), Some(name.to_string()), vec![], getter.returns)
            .await
    }

    pub async fn set_property(&self, name: &str, value: Value) -> Result<()> {
        let prop = self.descriptor.property(name).ok_or_else(|| Error::SpecMismatch {
            class_id: self.obj_id().to_string(),
            member: name.to_string(),
        })?;
        if prop.read_only {
            return Err(Error::MemberNotFound { id: self.obj_id().to_string(), member: name.to_string() });
        }
        let setter = prop.set.as_ref().ok_or_else(|| Error::MemberNotFound {
            id: self.obj_id().to_string(),
            member: name.to_string(),
        })?;
        self.runtime()
            .invoke(
                CallAction::PropSet,
                self.obj_id(),
                Some(name.to_string()),
                vec![value],
                setter.returns,
            )
            .await?;
        Ok(())
    }

    pub async fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        let function = self.descriptor.function(name).ok_or_else(|| Error::SpecMismatch {
            class_id: self.obj_id().to_string(),
            member: name.to_string(),
        })?;
        self.runtime()
            .invoke(CallAction::MethodCall, self.obj_id(), Some(name.to_string()), args, function.returns)
            .await
    }
}

/// Declares the shape a typed proxy wrapper expects of a remote object's
/// descriptor. `register_proxy_class` stores one of these per class id;
/// it is checked against the actual `ObjectDescriptor` the peer shipped
/// the first time that class id is encountered on the wire.
pub trait ProxyInterface: Sized {
    fn required_properties() -> &'static [&'static str] {
        &[]
    }

    fn required_functions() -> &'static [&'static str] {
        &[]
    }

    fn from_proxy(proxy: Proxy) -> Self;
}

#[derive(Clone)]
pub struct ProxyClassSpec {
    required_properties: Vec<String>,
    required_functions: Vec<String>,
}

impl ProxyClassSpec {
    pub fn of<T: ProxyInterface>() -> Self {
        Self {
            required_properties: T::required_properties().iter().map(|s| s.to_string()).collect(),
            required_functions: T::required_functions().iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn validate(&self, class_id: &str, descriptor: &ObjectDescriptor) -> Result<()> {
        for name in &self.required_properties {
            let covered = descriptor.is_readonly_property(name) || descriptor.property(name).is_some();
            if !covered {
                return Err(Error::SpecMismatch { class_id: class_id.to_string(), member: name.clone() });
            }
        }
        for name in &self.required_functions {
            if descriptor.function(name).is_none() {
                return Err(Error::SpecMismatch { class_id: class_id.to_string(), member: name.clone() });
            }
        }
        Ok(())
    }
}
