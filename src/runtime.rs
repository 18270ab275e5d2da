//
// runtime.rs
//
// `Runtime` is the shared, cloneable handle every other module is built
// around — the equivalent of `cli::rpc`'s `RpcDispatcher`, generalized
// from "named method, positional params" to the full object model (spec
// §4.B/C/F/G): registries for host objects/functions/classes, the
// descriptor tables exposed and received, outbound call-style selection,
// and the pending-call table outbound calls and promise settlements both
// resolve through.
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::channel::Channel;
use crate::descriptor::{CallType, ClassDescriptor, DescriptorTable, FunctionDescriptor, ObjectDescriptor};
use crate::error::{Error, Result};
use crate::host::{HostClass, HostFunction, HostObject};
use crate::marshal::Deserializer;
use crate::message::{Body, CallAction, CallMessage, Envelope};
use crate::proxy::ProxyClassSpec;
use crate::registry::{CounterIdGenerator, IdGenerator, Registry};

type ClassEntry = (Arc<dyn HostClass>, ClassDescriptor);

struct Inner {
    channel: Channel,
    objects: Registry<Arc<dyn HostObject>, ObjectDescriptor>,
    functions: Registry<Arc<dyn HostFunction>, FunctionDescriptor>,
    classes: Mutex<HashMap<String, ClassEntry>>,
    /// Top-level names exposed to `GetDescriptors`, distinct from the
    /// registries above which also hold entries minted mid-graph-walk
    /// that a peer never learns about except inline, via the sentinel
    /// that carries them.
    exposed: Mutex<DescriptorTable>,
    proxy_classes: Mutex<HashMap<String, ProxyClassSpec>>,
    remote_descriptors: Mutex<DescriptorTable>,
    descriptors_waiter: Mutex<Option<oneshot::Sender<()>>>,
    deserializers: Mutex<HashMap<Option<String>, Deserializer>>,
    call_ids: CounterIdGenerator,
    promise_ids: CounterIdGenerator,
    record_ids: CounterIdGenerator,
    pending_calls: Mutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
}

/// The shared runtime handle. Cheap to clone (an `Arc` underneath); every
/// `Proxy`, `RemoteCallback` and host callback closure carries one so it
/// can call back into the pipeline that produced it.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Builds a runtime bound to `channel`. Nothing is exposed and no
    /// remote descriptors are known until registration calls are made and
    /// `fetch_remote_descriptors` (or an inbound `DescriptorsResult`) runs.
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                objects: Registry::new(Box::new(CounterIdGenerator::new("obj"))),
                functions: Registry::new(Box::new(CounterIdGenerator::new("fn"))),
                classes: Mutex::new(HashMap::new()),
                exposed: Mutex::new(DescriptorTable::default()),
                proxy_classes: Mutex::new(HashMap::new()),
                remote_descriptors: Mutex::new(DescriptorTable::default()),
                descriptors_waiter: Mutex::new(None),
                deserializers: Mutex::new(HashMap::new()),
                call_ids: CounterIdGenerator::new("call"),
                promise_ids: CounterIdGenerator::new("promise"),
                record_ids: CounterIdGenerator::new("rec"),
                pending_calls: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.inner.channel
    }

    // --- registration (spec §4.B / §4.C entry points) -----------------

    pub fn register_host_object(
        &self,
        id: impl Into<String>,
        target: Arc<dyn HostObject>,
        descriptor: ObjectDescriptor,
    ) -> String {
        let id = id.into();
        let identity = crate::host::identity_of_object(&target);
        let id = self.inner.objects.register(id, identity, target, descriptor.clone());
        self.inner.exposed.lock().unwrap().objects.insert(id.clone(), descriptor);
        id
    }

    pub fn register_host_function(
        &self,
        id: impl Into<String>,
        target: Arc<dyn HostFunction>,
        descriptor: FunctionDescriptor,
    ) -> String {
        let id = id.into();
        let identity = crate::host::identity_of_function(&target);
        let id = self.inner.functions.register(id, identity, target, descriptor.clone());
        self.inner.exposed.lock().unwrap().functions.insert(id.clone(), descriptor);
        id
    }

    /// Registers `target` under `class_id`. Per spec §4.B, a class's static
    /// members are additionally registered as a host object under that same
    /// id, when both the descriptor declares them and `target.static_object`
    /// provides one.
    pub fn register_host_class(
        &self,
        class_id: impl Into<String>,
        target: Arc<dyn HostClass>,
        descriptor: ClassDescriptor,
    ) {
        let class_id = class_id.into();
        match (descriptor.static_members.clone(), target.static_object()) {
            (Some(static_descriptor), Some(static_target)) => {
                let identity = crate::host::identity_of_object(&static_target);
                self.inner.objects.register(class_id.clone(), identity, static_target, static_descriptor.clone());
                self.inner.exposed.lock().unwrap().objects.insert(class_id.clone(), static_descriptor);
            }
            (Some(_), None) => {
                log::warn!("class '{}' declares static_members but has no static_object()", class_id);
            }
            (None, _) => {}
        }
        self.inner.classes.lock().unwrap().insert(class_id.clone(), (target, descriptor.clone()));
        self.inner.exposed.lock().unwrap().classes.insert(class_id, descriptor);
    }

    /// Registers the shape a typed proxy wrapper `T` requires of the
    /// descriptor the peer ships for `class_id`, checked the first time
    /// that class id is decoded off the wire (spec §4.F).
    pub fn register_proxy_class<T: crate::proxy::ProxyInterface>(&self, class_id: impl Into<String>) {
        self.inner.proxy_classes.lock().unwrap().insert(class_id.into(), ProxyClassSpec::of::<T>());
    }

    /// Registers a custom deserializer for values tagged `type_tag` (spec
    /// §6). `type_tag = None` registers the universal fallback consulted
    /// when no more specific tag matched.
    pub fn register_deserializer<F>(&self, type_tag: Option<String>, f: F)
    where
        F: Fn(&Value, &str) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.deserializers.lock().unwrap().insert(type_tag, Arc::new(f));
    }

    pub(crate) fn custom_deserializer(&self, tag: Option<&str>) -> Option<Deserializer> {
        let table = self.inner.deserializers.lock().unwrap();
        if let Some(tag) = tag {
            if let Some(d) = table.get(&Some(tag.to_string())) {
                return Some(d.clone());
            }
        }
        table.get(&None).cloned()
    }

    // --- descriptor exchange (spec §4.B) -------------------------------

    pub fn local_descriptor_table(&self) -> DescriptorTable {
        self.inner.exposed.lock().unwrap().clone()
    }

    pub(crate) fn proxy_class_spec(&self, class_id: &str) -> Option<ProxyClassSpec> {
        self.inner.proxy_classes.lock().unwrap().get(class_id).cloned()
    }

    pub(crate) fn remote_object_descriptor(&self, obj_id: &str) -> Option<ObjectDescriptor> {
        self.inner.remote_descriptors.lock().unwrap().objects.get(obj_id).cloned()
    }

    pub(crate) fn remote_class_instance_descriptor(&self, class_id: &str) -> Option<ObjectDescriptor> {
        self.inner
            .remote_descriptors
            .lock()
            .unwrap()
            .classes
            .get(class_id)
            .map(|c| c.instance.clone())
    }

    /// Requests the peer's descriptor table. Over a send-sync channel this
    /// is a direct round trip; over a send-async-only channel it sends the
    /// request and waits for the peer's `DescriptorsResult` to arrive
    /// through `on_message`.
    pub async fn fetch_remote_descriptors(&self) -> Result<()> {
        let caps = self.inner.channel.capabilities();
        if caps.send_sync {
            if let Some(reply) = self.inner.channel.send_sync(Envelope::new(Body::GetDescriptors))? {
                if let Body::DescriptorsResult(table) = reply.body {
                    *self.inner.remote_descriptors.lock().unwrap() = table;
                }
            }
            return Ok(());
        }
        if caps.send_async {
            let (tx, rx) = oneshot::channel();
            *self.inner.descriptors_waiter.lock().unwrap() = Some(tx);
            self.inner.channel.send_async(Envelope::new(Body::GetDescriptors)).await?;
            return rx.await.map_err(|_| Error::ProtocolError("descriptor exchange cancelled".to_string()));
        }
        Err(Error::ChannelUnavailable { needed: "send-sync or send-async" })
    }

    pub(crate) fn accept_remote_descriptors(&self, table: DescriptorTable) {
        *self.inner.remote_descriptors.lock().unwrap() = table;
        if let Some(tx) = self.inner.descriptors_waiter.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    // --- host-side lookups used by dispatch.rs -------------------------

    pub(crate) fn lookup_object(&self, obj_id: &str) -> Option<(Arc<dyn HostObject>, ObjectDescriptor)> {
        self.inner.objects.lookup(obj_id)
    }

    pub(crate) fn lookup_function(&self, obj_id: &str) -> Option<(Arc<dyn HostFunction>, FunctionDescriptor)> {
        self.inner.functions.lookup(obj_id)
    }

    pub(crate) fn lookup_class(&self, class_id: &str) -> Option<ClassEntry> {
        self.inner.classes.lock().unwrap().get(class_id).cloned()
    }

    pub(crate) fn forget_object(&self, obj_id: &str) -> bool {
        self.inner.objects.remove(obj_id)
    }

    // --- marshal-pipeline registration (spec §4.D) ----------------------

    pub(crate) fn register_host_instance(&self, target: Arc<dyn HostObject>, descriptor: ObjectDescriptor) -> String {
        let identity = crate::host::identity_of_object(&target);
        self.inner.objects.mint(identity, target, descriptor)
    }

    pub(crate) fn register_host_callback(&self, target: Arc<dyn HostFunction>) -> String {
        let identity = crate::host::identity_of_function(&target);
        let descriptor = FunctionDescriptor::new("call", CallType::Async);
        self.inner.functions.mint(identity, target, descriptor)
    }

    /// Mints an id for a generic record discovered mid-graph-walk that
    /// needed one only to carry identity on the wire (spec §4.D rule 5);
    /// there is no host target behind it to register for dispatch.
    pub(crate) fn register_generic_object(&self) -> String {
        self.inner.record_ids.next_id()
    }

    /// Mints a Promise id for `fut`, spawns the task that drives it to
    /// completion and reports its settlement as an `AsyncFnResult` keyed
    /// by that id (spec §4.D rule 2, §4.E reply-ordering rule). When
    /// `barrier` is set, the task waits for it before sending, so the
    /// settlement can never race ahead of the reply it followed. The
    /// settlement goes out over the runtime's bound channel.
    pub(crate) fn mint_pending_future(
        &self,
        fut: futures::future::BoxFuture<'static, Result<Value>>,
        barrier: Option<Arc<tokio::sync::Notify>>,
    ) -> String {
        self.mint_pending_future_on(fut, barrier, None)
    }

    /// Like `mint_pending_future`, but the settlement is sent over
    /// `reply_channel` when given, rather than the bound channel —
    /// request-scoped reply routing for a call dispatched with its own
    /// reply handle (spec §4.A/§6).
    pub(crate) fn mint_pending_future_on(
        &self,
        fut: futures::future::BoxFuture<'static, Result<Value>>,
        barrier: Option<Arc<tokio::sync::Notify>>,
        reply_channel: Option<Channel>,
    ) -> String {
        let id = self.inner.promise_ids.next_id();
        self.spawn_settlement(id.clone(), fut, barrier, reply_channel);
        id
    }

    pub(crate) fn spawn_settlement(
        &self,
        call_id: String,
        fut: futures::future::BoxFuture<'static, Result<Value>>,
        barrier: Option<Arc<tokio::sync::Notify>>,
        reply_channel: Option<Channel>,
    ) {
        let runtime = self.clone();
        tokio::spawn(async move {
            if let Some(barrier) = barrier {
                barrier.notified().await;
            }
            let (success, result) = match fut.await {
                Ok(v) => (true, v),
                Err(e) => (false, Value::String(e.to_string())),
            };
            let body = Body::AsyncFnResult(crate::message::AsyncFnResult { success, result, call_id: call_id.clone() });
            let channel = reply_channel.unwrap_or_else(|| runtime.inner.channel.clone());
            if let Err(err) = channel.send_async(Envelope::new(body)).await {
                log::warn!("failed to deliver settlement for '{}': {}", call_id, err);
            }
        });
    }

    /// Resolves a `Promise` sentinel's obj_id into a future that completes
    /// when the matching `AsyncFnResult` arrives (spec §4.D after-receive
    /// rule 2). Shares the pending-calls table with ordinary async calls:
    /// both are just "something waiting on a call_id-correlated reply".
    pub(crate) fn future_for_promise(&self, obj_id: String) -> futures::future::BoxFuture<'static, Result<Value>> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.lock().unwrap().insert(obj_id, tx);
        Box::pin(async move { rx.await.map_err(|_| Error::ProtocolError("promise dropped".to_string()))? })
    }

    pub(crate) fn complete_pending_call(&self, call_id: &str, result: Result<Value>) {
        if let Some(tx) = self.inner.pending_calls.lock().unwrap().remove(call_id) {
            let _ = tx.send(result);
        }
    }

    // --- outbound calls (spec §4.F call-style selection) ----------------

    /// Invokes a property/method/constructor call against a remote target,
    /// adapting `requested` to whatever the bound channel actually
    /// supports: Sync upgrades to Async when send-sync is unavailable,
    /// Async downgrades to Sync when send-async is unavailable, Void rides
    /// whichever capability exists and never waits for a reply.
    pub async fn invoke(
        &self,
        action: CallAction,
        obj_id: &str,
        prop: Option<String>,
        args: Vec<Value>,
        requested: CallType,
    ) -> Result<Value> {
        let caps = self.inner.channel.capabilities();
        match requested {
            CallType::Void => {
                let msg = CallMessage {
                    action,
                    obj_id: obj_id.to_string(),
                    call_type: CallType::Void,
                    call_id: None,
                    prop,
                    args,
                    context: crate::context::current(),
                };
                if caps.send_async {
                    self.inner.channel.send_async(Envelope::new(Body::Call(msg))).await?;
                } else {
                    self.inner.channel.send_sync(Envelope::new(Body::Call(msg)))?;
                }
                Ok(Value::Null)
            }
            CallType::Sync if caps.send_sync => self.call_sync(action, obj_id, prop, args),
            CallType::Sync => self.call_async(action, obj_id, prop, args).await,
            CallType::Async if caps.send_async => self.call_async(action, obj_id, prop, args).await,
            CallType::Async => self.call_sync(action, obj_id, prop, args),
        }
    }

    fn call_sync(&self, action: CallAction, obj_id: &str, prop: Option<String>, args: Vec<Value>) -> Result<Value> {
        let msg = CallMessage {
            action,
            obj_id: obj_id.to_string(),
            call_type: CallType::Sync,
            call_id: None,
            prop,
            args,
            context: crate::context::current(),
        };
        let reply = self.inner.channel.send_sync(Envelope::new(Body::Call(msg)))?;
        match reply.map(|e| e.body) {
            Some(Body::SyncFnResult(r)) if r.success => Ok(r.result),
            Some(Body::SyncFnResult(r)) => Err(Error::RemoteCallError { message: describe(&r.result) }),
            _ => Err(Error::ProtocolError("expected a sync_fn_result reply".to_string())),
        }
    }

    async fn call_async(&self, action: CallAction, obj_id: &str, prop: Option<String>, args: Vec<Value>) -> Result<Value> {
        let call_id = self.inner.call_ids.next_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.lock().unwrap().insert(call_id.clone(), tx);
        let msg = CallMessage {
            action,
            obj_id: obj_id.to_string(),
            call_type: CallType::Async,
            call_id: Some(call_id.clone()),
            prop,
            args,
            context: crate::context::current(),
        };
        if let Err(err) = self.inner.channel.send_async(Envelope::new(Body::Call(msg))).await {
            self.inner.pending_calls.lock().unwrap().remove(&call_id);
            return Err(err);
        }
        rx.await.map_err(|_| Error::ProtocolError("call dropped before a reply arrived".to_string()))?
    }

    pub(crate) async fn invoke_fn_call(&self, obj_id: &str, args: Vec<Value>, returns: CallType) -> Result<Value> {
        self.invoke(CallAction::FnCall, obj_id, None, args, returns).await
    }

    /// Notifies the peer that a proxy's last local reference was dropped
    /// (spec §3 Lifecycle). Best-effort: a channel with neither send
    /// capability, or one that is already gone, just logs.
    pub async fn notify_object_died(&self, obj_id: &str) -> Result<()> {
        let body = Body::ObjectDied(crate::message::ObjectDiedMessage { obj_id: obj_id.to_string() });
        let caps = self.inner.channel.capabilities();
        if caps.send_async {
            self.inner.channel.send_async(Envelope::new(body)).await
        } else if caps.send_sync {
            self.inner.channel.send_sync(Envelope::new(body)).map(|_| ())
        } else {
            Err(Error::ChannelUnavailable { needed: "send-async or send-sync" })
        }
    }
}

fn describe(result: &Value) -> String {
    result.as_str().map(str::to_string).unwrap_or_else(|| result.to_string())
}
