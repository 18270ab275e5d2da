//
// host.rs
//
// Traits a host-side target must implement to be exposed over the
// runtime. The call dispatcher (spec §4.E) resolves a registered target
// through these and invokes it; the marshal pipeline (spec §4.D) walks
// values whose type implements `HostRecord` when deciding whether a
// plain value is "record-like" and needs recursive marshalling.
//

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::Result;
use crate::runtime::Runtime;

/// Outcome of invoking a host object's method or a host function. A
/// `Pending` outcome is the "target returns a future" case in spec §4.D
/// rule 2 and §4.E's reply-ordering rule: the immediate reply (if any)
/// is sent first, then the future is driven and its settlement reported
/// separately.
pub enum CallOutcome {
    Ready(Result<Value>),
    Pending(BoxFuture<'static, Result<Value>>),
}

impl CallOutcome {
    pub fn ready(result: Result<Value>) -> Self {
        CallOutcome::Ready(result)
    }
}

/// A host-registered object: something exposing properties and methods
/// to the remote peer per its `ObjectDescriptor`. `runtime` is handed to
/// `call_method` so an implementation that needs to treat an argument as
/// a callback or marshal a complex return value can call back into the
/// marshalling pipeline (`Runtime::unmarshal`/`Runtime::marshal`).
pub trait HostObject: Send + Sync {
    fn get_property(&self, prop: &str) -> Result<Value>;
    fn set_property(&self, prop: &str, value: Value) -> Result<()>;
    fn call_method(&self, runtime: &Runtime, prop: &str, args: Vec<Value>) -> CallOutcome;
}

/// A host-registered free function / delegate / callback target.
pub trait HostFunction: Send + Sync {
    fn call(&self, runtime: &Runtime, args: Vec<Value>) -> CallOutcome;
}

/// A host-registered class: constructible remotely via `ctor_call`.
pub trait HostClass: Send + Sync {
    fn construct(&self, runtime: &Runtime, args: Vec<Value>) -> Result<std::sync::Arc<dyn HostObject>>;

    /// The class's static side, if `ClassDescriptor::static_members`
    /// declares one. `register_host_class` registers this target into the
    /// object registry under the class's own id, so a `PropGet`/
    /// `MethodCall` against the class id itself resolves against it
    /// (spec §4.B). Classes with no static members leave this `None`.
    fn static_object(&self) -> Option<std::sync::Arc<dyn HostObject>> {
        None
    }
}

fn data_ptr<T: ?Sized>(arc: &std::sync::Arc<T>) -> usize {
    std::sync::Arc::as_ptr(arc) as *const () as usize
}

pub fn identity_of_object(target: &std::sync::Arc<dyn HostObject>) -> usize {
    data_ptr(target)
}

pub fn identity_of_function(target: &std::sync::Arc<dyn HostFunction>) -> usize {
    data_ptr(target)
}

pub fn identity_of_class(target: &std::sync::Arc<dyn HostClass>) -> usize {
    data_ptr(target)
}
