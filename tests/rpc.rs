//
// rpc.rs
//
// End-to-end coverage over a pair of runtimes joined by an in-memory
// loopback channel. Mirrors the scenarios and invariants a peer protocol
// like this lives or dies by: idempotent identity, call-type adaptation,
// proxy transparency, lifecycle teardown, and context propagation.
//

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use srpc::{
    current_context, ArgValue, ArgumentDescriptor, AsyncFnResult, Body, CallAction, CallMessage, CallOutcome,
    CallType, Capabilities, Channel, ClassDescriptor, Envelope, Error, Expected, FunctionDescriptor, HostClass,
    HostFunction, HostObject, ObjectDescriptor, ObjectDiedMessage, Outbound, Proxy, ProxyInterface, Result, Runtime,
    SendAsync, SendSync,
};

/// Joins two runtimes back to back: each side's outbound send is the
/// other's inbound `on_message`. Both capabilities are wired through
/// `send_sync`, so a test can pick whichever one a scenario calls for.
struct Loopback {
    peer: OnceLock<Runtime>,
}

impl Loopback {
    fn new() -> Arc<Self> {
        Arc::new(Self { peer: OnceLock::new() })
    }

    fn bind(&self, peer: Runtime) {
        self.peer.set(peer).ok().expect("bound twice");
    }

    fn peer(&self) -> Runtime {
        self.peer.get().expect("loopback not bound yet").clone()
    }
}

impl SendAsync for Loopback {
    fn send_async(&self, envelope: Envelope) -> BoxFuture<'_, ()> {
        let peer = self.peer();
        Box::pin(async move {
            let _ = peer.on_message(envelope).await;
        })
    }
}

impl SendSync for Loopback {
    fn send_sync(&self, envelope: Envelope) -> Option<Envelope> {
        let peer = self.peer();
        futures::executor::block_on(peer.on_message(envelope)).ok().flatten()
    }
}

fn make_pair() -> (Runtime, Runtime) {
    let link_a = Loopback::new();
    let link_b = Loopback::new();
    let channel_a = Channel::new().with_send_async(link_a.clone()).with_send_sync(link_a.clone());
    let channel_b = Channel::new().with_send_async(link_b.clone()).with_send_sync(link_b.clone());
    let rt_a = Runtime::new(channel_a);
    let rt_b = Runtime::new(channel_b);
    link_a.bind(rt_b.clone());
    link_b.bind(rt_a.clone());
    (rt_a, rt_b)
}

// --- fixtures --------------------------------------------------------

struct Calc;

impl HostObject for Calc {
    fn get_property(&self, prop: &str) -> Result<Value> {
        Err(Error::MemberNotFound { id: "calc".to_string(), member: prop.to_string() })
    }

    fn set_property(&self, prop: &str, _value: Value) -> Result<()> {
        Err(Error::MemberNotFound { id: "calc".to_string(), member: prop.to_string() })
    }

    fn call_method(&self, _runtime: &Runtime, prop: &str, args: Vec<Value>) -> CallOutcome {
        match prop {
            "Add" => {
                let a = args[0].as_i64().expect("arg 0");
                let b = args[1].as_i64().expect("arg 1");
                CallOutcome::ready(Ok(json!(a + b)))
            }
            other => CallOutcome::ready(Err(Error::MemberNotFound { id: "calc".to_string(), member: other.to_string() })),
        }
    }
}

fn calc_descriptor() -> ObjectDescriptor {
    ObjectDescriptor {
        readonly_properties: vec![],
        proxied_properties: vec![],
        functions: vec![FunctionDescriptor::new("Add", CallType::Sync)],
    }
}

struct Echo;

impl HostFunction for Echo {
    fn call(&self, _runtime: &Runtime, args: Vec<Value>) -> CallOutcome {
        let input = args[0].as_str().expect("string arg").to_string();
        CallOutcome::Pending(Box::pin(async move { Ok(Value::String(input)) }))
    }
}

struct Lion;

impl HostObject for Lion {
    fn get_property(&self, prop: &str) -> Result<Value> {
        match prop {
            "Name" => Ok(json!("Leo")),
            other => Err(Error::MemberNotFound { id: "lion".to_string(), member: other.to_string() }),
        }
    }

    fn set_property(&self, prop: &str, _value: Value) -> Result<()> {
        Err(Error::MemberNotFound { id: "lion".to_string(), member: prop.to_string() })
    }

    fn call_method(&self, _runtime: &Runtime, prop: &str, _args: Vec<Value>) -> CallOutcome {
        match prop {
            "Speak" => CallOutcome::Pending(Box::pin(async { Ok(json!("roar")) })),
            other => CallOutcome::ready(Err(Error::MemberNotFound { id: "lion".to_string(), member: other.to_string() })),
        }
    }
}

fn lion_descriptor() -> ObjectDescriptor {
    ObjectDescriptor {
        readonly_properties: vec!["Name".to_string()],
        proxied_properties: vec![],
        functions: vec![FunctionDescriptor::new("Speak", CallType::Async)],
    }
}

struct Zoo(Arc<Lion>);

impl HostObject for Zoo {
    fn get_property(&self, prop: &str) -> Result<Value> {
        Err(Error::MemberNotFound { id: "zoo".to_string(), member: prop.to_string() })
    }

    fn set_property(&self, prop: &str, _value: Value) -> Result<()> {
        Err(Error::MemberNotFound { id: "zoo".to_string(), member: prop.to_string() })
    }

    fn call_method(&self, runtime: &Runtime, prop: &str, _args: Vec<Value>) -> CallOutcome {
        match prop {
            // The same lion is handed out every time: marshalling it twice
            // must still mint only one registry entry (invariant 2).
            "GetLion" => {
                let outbound = Outbound::Instance {
                    class_id: "IAnimal".to_string(),
                    target: self.0.clone(),
                    descriptor: lion_descriptor(),
                };
                CallOutcome::ready(Ok(runtime.marshal(outbound, None)))
            }
            other => CallOutcome::ready(Err(Error::MemberNotFound { id: "zoo".to_string(), member: other.to_string() })),
        }
    }
}

/// A typed wrapper a code generator would stamp out for `IAnimal`.
struct Animal(Proxy);

impl ProxyInterface for Animal {
    fn required_properties() -> &'static [&'static str] {
        &["Name"]
    }

    fn required_functions() -> &'static [&'static str] {
        &["Speak"]
    }

    fn from_proxy(proxy: Proxy) -> Self {
        Animal(proxy)
    }
}

struct Doubler(AtomicI64);

impl HostFunction for Doubler {
    fn call(&self, _runtime: &Runtime, args: Vec<Value>) -> CallOutcome {
        let n = args[0].as_i64().expect("int arg");
        self.0.store(n, Ordering::SeqCst);
        CallOutcome::ready(Ok(json!(n * 2)))
    }
}

struct Apply;

impl HostFunction for Apply {
    fn call(&self, runtime: &Runtime, args: Vec<Value>) -> CallOutcome {
        let expected = Expected::callback(FunctionDescriptor::new("call", CallType::Async));
        match runtime.unmarshal(&args[0], &expected) {
            Ok(ArgValue::Callback(cb)) => CallOutcome::Pending(Box::pin(async move { cb.invoke(vec![json!(21)]).await })),
            Ok(_) => CallOutcome::ready(Err(Error::MarshalError("expected a callback argument".to_string()))),
            Err(e) => CallOutcome::ready(Err(e)),
        }
    }
}

struct Widget;

impl HostClass for Widget {
    fn construct(&self, _runtime: &Runtime, _args: Vec<Value>) -> Result<Arc<dyn HostObject>> {
        Ok(Arc::new(Lion))
    }
}

// --- S1: sync method call --------------------------------------------

#[tokio::test]
async fn s1_sync_method_call_round_trips() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_object("calc", Arc::new(Calc), calc_descriptor());

    let result = rt_a
        .invoke(CallAction::MethodCall, "calc", Some("Add".to_string()), vec![json!(2), json!(3)], CallType::Sync)
        .await
        .unwrap();

    assert_eq!(result, json!(5));
}

// --- S2: async function call with a pending result --------------------

#[tokio::test]
async fn s2_async_call_settles_through_async_fn_result() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_function("echo", Arc::new(Echo), FunctionDescriptor::new("echo", CallType::Async));

    let result = rt_a.invoke(CallAction::FnCall, "echo", None, vec![json!("hi")], CallType::Async).await.unwrap();

    assert_eq!(result, json!("hi"));
}

// --- S3: descriptor exchange -------------------------------------------

#[tokio::test]
async fn s3_get_descriptors_reports_registered_object() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_object("calc", Arc::new(Calc), calc_descriptor());

    rt_a.fetch_remote_descriptors().await.unwrap();
    let table = rt_a.local_descriptor_table();
    // rt_a itself exposes nothing; the fetched table lives behind
    // on_message's bookkeeping, observable through a proxy lookup instead.
    assert!(table.objects.is_empty());

    let result = rt_a
        .invoke(CallAction::MethodCall, "calc", Some("Add".to_string()), vec![json!(10), json!(1)], CallType::Sync)
        .await
        .unwrap();
    assert_eq!(result, json!(11));
}

// --- S4 / S5: an inbound result carrying a registered instance ---------

#[tokio::test]
async fn s4_s5_returned_instance_becomes_a_transparent_proxy() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_object("zoo", Arc::new(Zoo(Arc::new(Lion))), ObjectDescriptor {
        readonly_properties: vec![],
        proxied_properties: vec![],
        functions: vec![FunctionDescriptor::new("GetLion", CallType::Sync)],
    });
    rt_b.register_host_class(
        "IAnimal",
        Arc::new(Widget),
        ClassDescriptor {
            class_id: "IAnimal".to_string(),
            static_members: None,
            instance: lion_descriptor(),
            ctor: FunctionDescriptor::new("new", CallType::Sync),
        },
    );
    rt_a.register_proxy_class::<Animal>("IAnimal");
    rt_a.fetch_remote_descriptors().await.unwrap();

    let raw_a = rt_a.invoke(CallAction::MethodCall, "zoo", Some("GetLion".to_string()), vec![], CallType::Sync).await.unwrap();
    let raw_b = rt_a.invoke(CallAction::MethodCall, "zoo", Some("GetLion".to_string()), vec![], CallType::Sync).await.unwrap();

    // Invariant: marshalling the same host instance repeatedly yields the
    // same id — at most one registry entry no matter how many calls.
    assert_eq!(raw_a["obj_id"], raw_b["obj_id"]);

    let proxy = match rt_a.unmarshal(&raw_a, &Expected::any()).unwrap() {
        ArgValue::Proxy(p) => p,
        _ => panic!("expected a proxy"),
    };
    let animal = Animal::from_proxy(proxy);

    assert_eq!(animal.0.readonly_property("Name").unwrap(), json!("Leo"));
    assert_eq!(animal.0.call_method("Speak", vec![]).await.unwrap(), json!("roar"));
}

// --- S6: callback argument ----------------------------------------------

#[tokio::test]
async fn s6_callback_argument_is_invoked_through_fn_call() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_function("apply", Arc::new(Apply), FunctionDescriptor::new("apply", CallType::Async));

    let doubler = Arc::new(Doubler(AtomicI64::new(0)));
    let cb_value = rt_a.marshal(Outbound::Callback(doubler.clone()), None);

    let result = rt_a.invoke(CallAction::FnCall, "apply", None, vec![cb_value], CallType::Async).await.unwrap();

    assert_eq!(result, json!(42));
    assert_eq!(doubler.0.load(Ordering::SeqCst), 21);
}

// --- constructor calls ---------------------------------------------------

#[tokio::test]
async fn ctor_call_returns_a_freshly_constructed_instance() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_class(
        "Widget",
        Arc::new(Widget),
        ClassDescriptor {
            class_id: "Widget".to_string(),
            static_members: None,
            instance: lion_descriptor(),
            ctor: FunctionDescriptor::new("new", CallType::Sync),
        },
    );

    let raw = rt_a.invoke(CallAction::CtorCall, "Widget", None, vec![], CallType::Sync).await.unwrap();
    assert!(raw.get("obj_id").is_some());
    assert_eq!(raw["class_id"], json!("Widget"));
}

// --- invariant 1: idempotent registration --------------------------------

#[tokio::test]
async fn idempotent_registration_yields_the_same_id() {
    let (_rt_a, rt_b) = make_pair();
    let target: Arc<dyn HostObject> = Arc::new(Calc);

    let first = rt_b.register_host_object("calc", target.clone(), calc_descriptor());
    let second = rt_b.register_host_object("calc-again", target, calc_descriptor());

    assert_eq!(first, second);
}

// --- invariant 5: call-type downgrade on a send-async-only channel ------

struct Recorder {
    calls: Mutex<Vec<Envelope>>,
    owner: OnceLock<Runtime>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()), owner: OnceLock::new() })
    }

    fn bind(&self, owner: Runtime) {
        self.owner.set(owner).ok().expect("bound twice");
    }

    fn recorded_call_types(&self) -> Vec<CallType> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.body {
                Body::Call(c) => Some(c.call_type),
                _ => None,
            })
            .collect()
    }

    fn async_fn_results(&self) -> Vec<AsyncFnResult> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match &e.body {
                Body::AsyncFnResult(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }
}

impl SendAsync for Recorder {
    fn send_async(&self, envelope: Envelope) -> BoxFuture<'_, ()> {
        self.calls.lock().unwrap().push(envelope.clone());
        let owner = self.owner.get().cloned();
        Box::pin(async move {
            if let (Body::Call(msg), Some(owner)) = (&envelope.body, owner) {
                if let Some(call_id) = msg.call_id.clone() {
                    let body = Body::AsyncFnResult(AsyncFnResult { success: true, result: json!(5), call_id });
                    let _ = owner.on_message(Envelope::new(body)).await;
                }
            }
        })
    }
}

#[tokio::test]
async fn sync_request_downgrades_to_async_without_a_sync_capability() {
    let recorder = Recorder::new();
    let channel = Channel::new().with_send_async(recorder.clone());
    assert_eq!(channel.capabilities(), Capabilities { send_async: true, send_sync: false });
    let rt = Runtime::new(channel);
    recorder.bind(rt.clone());

    let result = rt
        .invoke(CallAction::MethodCall, "calc", Some("Add".to_string()), vec![json!(2), json!(3)], CallType::Sync)
        .await
        .unwrap();

    assert_eq!(result, json!(5));
    assert_eq!(recorder.recorded_call_types(), vec![CallType::Async]);
}

// --- invariant 6: missing marker is dropped without side effect ---------

#[tokio::test]
async fn message_without_marker_is_dropped_silently() {
    let (_rt_a, rt_b) = make_pair();
    rt_b.register_host_object("calc", Arc::new(Calc), calc_descriptor());

    let mut envelope = Envelope::new(Body::GetDescriptors);
    envelope.rpc_marker = None;

    let reply = rt_b.on_message(envelope).await.unwrap();
    assert!(reply.is_none());
}

// --- invariant 7: ObjectDied clears the host registry --------------------

#[tokio::test]
async fn object_died_clears_the_registry() {
    let (_rt_a, rt_b) = make_pair();
    rt_b.register_host_object("calc", Arc::new(Calc), calc_descriptor());

    let died = Envelope::new(Body::ObjectDied(ObjectDiedMessage { obj_id: "calc".to_string() }));
    rt_b.on_message(died).await.unwrap();

    let call = CallMessage {
        action: CallAction::MethodCall,
        obj_id: "calc".to_string(),
        call_type: CallType::Sync,
        call_id: None,
        prop: Some("Add".to_string()),
        args: vec![json!(1), json!(2)],
        context: None,
    };
    let reply = rt_b.on_message(Envelope::new(Body::Call(call))).await.unwrap().unwrap();
    match reply.body {
        Body::SyncFnResult(r) => {
            assert!(!r.success);
            assert!(r.result.as_str().unwrap().contains("calc"));
        }
        _ => panic!("expected a sync_fn_result"),
    }
}

// --- invariant 8: context propagation across a host-side await ---------

struct ContextProbe;

impl HostObject for ContextProbe {
    fn get_property(&self, _prop: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    fn set_property(&self, _prop: &str, _value: Value) -> Result<()> {
        Ok(())
    }

    fn call_method(&self, _runtime: &Runtime, _prop: &str, _args: Vec<Value>) -> CallOutcome {
        CallOutcome::Pending(Box::pin(async move {
            let before = current_context();
            tokio::task::yield_now().await;
            let after = current_context();
            Ok(json!({ "before": before, "after": after }))
        }))
    }
}

#[tokio::test]
async fn context_propagates_across_a_host_side_await() {
    let (_rt_a, rt_b) = make_pair();
    rt_b.register_host_object(
        "probe",
        Arc::new(ContextProbe),
        ObjectDescriptor { readonly_properties: vec![], proxied_properties: vec![], functions: vec![FunctionDescriptor::new("Check", CallType::Async)] },
    );

    let call = CallMessage {
        action: CallAction::MethodCall,
        obj_id: "probe".to_string(),
        call_type: CallType::Async,
        call_id: Some("ctx-1".to_string()),
        prop: Some("Check".to_string()),
        args: vec![],
        context: Some(json!({ "trace_id": "abc-123" })),
    };

    let observed: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let link = Loopback::new();
    let capture = observed.clone();
    struct CapturingSync {
        inner: Arc<Loopback>,
        observed: Arc<Mutex<Option<Value>>>,
    }
    impl SendAsync for CapturingSync {
        fn send_async(&self, envelope: Envelope) -> BoxFuture<'_, ()> {
            if let Body::AsyncFnResult(r) = &envelope.body {
                *self.observed.lock().unwrap() = Some(r.result.clone());
            }
            self.inner.send_async(envelope)
        }
    }
    let capturing = Arc::new(CapturingSync { inner: link.clone(), observed: capture });
    let channel_b = Channel::new().with_send_async(capturing);
    let rt_b_capturing = Runtime::new(channel_b);
    rt_b_capturing.register_host_object(
        "probe",
        Arc::new(ContextProbe),
        ObjectDescriptor { readonly_properties: vec![], proxied_properties: vec![], functions: vec![FunctionDescriptor::new("Check", CallType::Async)] },
    );
    link.bind(rt_b_capturing.clone());

    rt_b_capturing.on_message(Envelope::new(Body::Call(call))).await.unwrap();
    // Give the spawned settlement task a chance to run.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let result = observed.lock().unwrap().clone().expect("settlement observed");
    assert_eq!(result["before"], json!({ "trace_id": "abc-123" }));
    assert_eq!(result["after"], json!({ "trace_id": "abc-123" }));

    // rt_b itself is unused by this test beyond providing a bound channel
    // for the pair's Drop glue; keep it alive until the end.
    let _ = _rt_a;
}

// --- argument descriptors govern callback-shaped positions --------------

#[tokio::test]
async fn argument_descriptor_rejects_a_non_callback_in_a_declared_callback_slot() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_function(
        "apply",
        Arc::new(Apply),
        FunctionDescriptor::new("apply", CallType::Async)
            .with_arguments(vec![ArgumentDescriptor::callback(0, FunctionDescriptor::new("call", CallType::Async))]),
    );

    let err = rt_a
        .invoke(CallAction::FnCall, "apply", None, vec![json!(5)], CallType::Async)
        .await
        .unwrap_err();

    // The coercion failure happens host-side and crosses back as a remote
    // call error, the same as any other host-raised error would.
    assert!(matches!(err, Error::RemoteCallError { .. }));
}

#[tokio::test]
async fn argument_descriptor_allows_a_matching_callback_through() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_function(
        "apply",
        Arc::new(Apply),
        FunctionDescriptor::new("apply", CallType::Async)
            .with_arguments(vec![ArgumentDescriptor::callback(0, FunctionDescriptor::new("call", CallType::Async))]),
    );
    let doubler = Arc::new(Doubler(AtomicI64::new(0)));
    let cb_value = rt_a.marshal(Outbound::Callback(doubler.clone()), None);

    let result = rt_a.invoke(CallAction::FnCall, "apply", None, vec![cb_value], CallType::Async).await.unwrap();

    assert_eq!(result, json!(42));
    assert_eq!(doubler.0.load(Ordering::SeqCst), 21);
}

#[tokio::test]
async fn method_call_against_an_undeclared_member_is_rejected_before_reaching_the_host() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_object("calc", Arc::new(Calc), calc_descriptor());

    let err = rt_a
        .invoke(CallAction::MethodCall, "calc", Some("Subtract".to_string()), vec![json!(1), json!(1)], CallType::Sync)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RemoteCallError { .. }));
}

// --- register_host_class exposes static members as a host object --------

struct WidgetStatics;

impl HostObject for WidgetStatics {
    fn get_property(&self, prop: &str) -> Result<Value> {
        match prop {
            "Count" => Ok(json!(7)),
            other => Err(Error::MemberNotFound { id: "Widget".to_string(), member: other.to_string() }),
        }
    }

    fn set_property(&self, prop: &str, _value: Value) -> Result<()> {
        Err(Error::MemberNotFound { id: "Widget".to_string(), member: prop.to_string() })
    }

    fn call_method(&self, _runtime: &Runtime, prop: &str, _args: Vec<Value>) -> CallOutcome {
        CallOutcome::ready(Err(Error::MemberNotFound { id: "Widget".to_string(), member: prop.to_string() }))
    }
}

struct WidgetWithStatics;

impl HostClass for WidgetWithStatics {
    fn construct(&self, _runtime: &Runtime, _args: Vec<Value>) -> Result<Arc<dyn HostObject>> {
        Ok(Arc::new(Lion))
    }

    fn static_object(&self) -> Option<Arc<dyn HostObject>> {
        Some(Arc::new(WidgetStatics))
    }
}

#[tokio::test]
async fn register_host_class_exposes_static_members_under_the_class_id() {
    let (rt_a, rt_b) = make_pair();
    rt_b.register_host_class(
        "Widget",
        Arc::new(WidgetWithStatics),
        ClassDescriptor {
            class_id: "Widget".to_string(),
            static_members: Some(ObjectDescriptor {
                readonly_properties: vec!["Count".to_string()],
                proxied_properties: vec![],
                functions: vec![],
            }),
            instance: lion_descriptor(),
            ctor: FunctionDescriptor::new("new", CallType::Sync),
        },
    );

    let result = rt_a.invoke(CallAction::PropGet, "Widget", Some("Count".to_string()), vec![], CallType::Sync).await.unwrap();
    assert_eq!(result, json!(7));

    // The class itself is still constructible under the same id.
    let raw = rt_a.invoke(CallAction::CtorCall, "Widget", None, vec![], CallType::Sync).await.unwrap();
    assert!(raw.get("obj_id").is_some());
}

// --- Envelope::decode translates a malformed wire value ------------------

#[test]
fn decode_rejects_an_unknown_action_kind_as_a_protocol_error() {
    let raw = json!({ "rpc_marker": "srpc", "action_kind": "Bogus" });

    let err = Envelope::decode(&raw).unwrap_err();

    assert!(matches!(err, Error::ProtocolError(_)));
}

#[test]
fn decode_accepts_a_well_formed_envelope() {
    let raw = json!({ "rpc_marker": "srpc", "action_kind": "GetDescriptors" });

    let envelope = Envelope::decode(&raw).unwrap();

    assert!(envelope.has_marker());
    assert!(matches!(envelope.body, Body::GetDescriptors));
}

// --- request-scoped reply routing ----------------------------------------

#[tokio::test]
async fn on_message_with_reply_to_routes_the_async_settlement_to_the_given_channel() {
    // The bound channel has neither capability, so any send through it
    // would fail loudly — proving the settlement below only ever goes out
    // through the request-scoped reply channel, not the bound one.
    let rt = Runtime::new(Channel::new());
    rt.register_host_function("echo", Arc::new(Echo), FunctionDescriptor::new("echo", CallType::Async));

    let recorder = Recorder::new();
    let reply_channel = Channel::new().with_send_async(recorder.clone());

    let call = CallMessage {
        action: CallAction::FnCall,
        obj_id: "echo".to_string(),
        call_type: CallType::Async,
        call_id: Some("call-1".to_string()),
        prop: None,
        args: vec![json!("hi")],
        context: None,
    };

    rt.on_message_with_reply_to(Envelope::new(Body::Call(call)), Some(reply_channel)).await.unwrap();
    // Give the spawned settlement task a chance to run.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let results = recorder.async_fn_results();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].result, json!("hi"));
    assert_eq!(results[0].call_id, "call-1");
}
