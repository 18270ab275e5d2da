//
// lib.rs
//
// Bidirectional object-oriented RPC runtime: a peer holds a `Runtime`
// bound to one `Channel`; host objects/functions/classes registered on
// it become visible to the other side as `Proxy`/`RemoteCallback` values,
// and vice versa. See SPEC_FULL.md for the full component breakdown this
// module layout follows.
//

mod channel;
mod context;
mod descriptor;
mod dispatch;
mod error;
mod host;
mod marshal;
mod message;
mod proxy;
mod registry;
mod runtime;

pub use channel::{Capabilities, Channel, SendAsync, SendSync};
pub use context::{current as current_context, scope as context_scope};
pub use descriptor::{
    ArgumentDescriptor, CallType, ClassDescriptor, DescriptorTable, FunctionDescriptor, ObjectDescriptor,
    PropertyDescriptor,
};
pub use error::{Error, Result};
pub use host::{identity_of_class, identity_of_function, identity_of_object, CallOutcome, HostClass, HostFunction, HostObject};
pub use marshal::{ArgValue, Deserializer, Expected, ExpectedKind, Outbound, RemoteCallback};
pub use message::{AsyncFnResult, Body, CallAction, CallMessage, Envelope, ObjectDiedMessage, SyncFnResult, RPC_MARKER};
pub use proxy::{Proxy, ProxyClassSpec, ProxyInterface};
pub use registry::{CounterIdGenerator, IdGenerator, RandomIdGenerator};
pub use runtime::Runtime;
