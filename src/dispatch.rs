//
// dispatch.rs
//
// Inbound message handling (spec §4.E), the receiving-side counterpart to
// `cli::rpc::RpcDispatcher::dispatch`. Unlike the teacher's dispatcher,
// which only ever replies through the bytes it hands back, this one has
// three distinct reply paths dictated by the inbound `call_type`: a Sync
// call's result is returned here for the transport to send back directly,
// a Void call produces no reply at all, and an Async call's result (or a
// Promise settlement minted along the way) is pushed back out through the
// runtime's own channel, asynchronously, independent of this call
// returning.
//

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Notify;

use crate::channel::Channel;
use crate::descriptor::CallType;
use crate::error::{Error, Result};
use crate::host::CallOutcome;
use crate::marshal::Outbound;
use crate::message::{
    AsyncFnResult, Body, CallAction, CallMessage, Envelope, RpcObject, SyncFnResult, PROMISE_CLASS_ID,
};
use crate::runtime::Runtime;

impl Runtime {
    /// Feeds one inbound envelope through the runtime. Returns the
    /// envelope a transport with a notion of "the reply to this message"
    /// should send back (a `GetDescriptors` request's answer, or a Sync
    /// call's result); everything else — Async settlements, proactive
    /// descriptor pushes, `ObjectDied` acks — goes out through the bound
    /// channel itself and this returns `Ok(None)`.
    ///
    /// A message without the `srpc` marker is dropped silently (spec
    /// §4.A) rather than treated as an error.
    pub async fn on_message(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        self.on_message_with_reply_to(envelope, None).await
    }

    /// Like `on_message`, but any outbound traffic this inbound message
    /// provokes on its own (an async settlement, a Promise resolving
    /// later) is sent over `reply_to` when given, instead of the runtime's
    /// bound channel — request-scoped reply routing, since `reply_to` may
    /// differ from the bound channel (spec §4.A/§6).
    pub async fn on_message_with_reply_to(&self, envelope: Envelope, reply_to: Option<Channel>) -> Result<Option<Envelope>> {
        if !envelope.has_marker() {
            return Ok(None);
        }

        match envelope.body {
            Body::GetDescriptors => Ok(Some(Envelope::new(Body::DescriptorsResult(self.local_descriptor_table())))),
            Body::DescriptorsResult(table) => {
                self.accept_remote_descriptors(table);
                Ok(None)
            }
            Body::Call(msg) => Ok(self.dispatch_call(msg, reply_to).await),
            Body::SyncFnResult(_) => {
                // Only reachable on a send-async channel carrying what a
                // send-sync peer would otherwise have returned directly;
                // nothing in this runtime's own call paths produces it
                // that way, so there is no pending call_id to settle.
                Ok(None)
            }
            Body::AsyncFnResult(result) => {
                self.settle_async_result(result);
                Ok(None)
            }
            Body::ObjectDied(msg) => {
                self.forget_object(&msg.obj_id);
                Ok(None)
            }
        }
    }

    fn settle_async_result(&self, result: AsyncFnResult) {
        let outcome = if result.success {
            Ok(result.result)
        } else {
            Err(Error::RemoteCallError { message: describe(&result.result) })
        };
        self.complete_pending_call(&result.call_id, outcome);
    }

    async fn dispatch_call(&self, msg: CallMessage, reply_to: Option<Channel>) -> Option<Envelope> {
        let call_type = msg.call_type;
        let call_id = msg.call_id.clone();
        let context = msg.context.clone();
        let outcome = crate::context::scope(context.clone(), self.invoke_action(&msg)).await;
        // A Pending future is a continuation that keeps running after this
        // dispatch returns (settled from a spawned task); it must keep
        // observing the same context the synchronous part just saw.
        let outcome = match outcome {
            CallOutcome::Pending(fut) => {
                CallOutcome::Pending(Box::pin(crate::context::scope(context, fut)))
            }
            ready => ready,
        };

        match call_type {
            CallType::Sync => Some(self.reply_sync(outcome, reply_to)),
            CallType::Void => {
                if let CallOutcome::Pending(fut) = outcome {
                    let barrier = Arc::new(Notify::new());
                    // No immediate reply precedes a Void call's settlement.
                    barrier.notify_one();
                    self.mint_pending_future_on(fut, Some(barrier), reply_to);
                }
                None
            }
            CallType::Async => {
                let call_id = call_id.unwrap_or_default();
                let channel = reply_to.unwrap_or_else(|| self.channel().clone());
                match outcome {
                    CallOutcome::Ready(result) => {
                        let (success, result) = split(result);
                        let body = Body::AsyncFnResult(AsyncFnResult { success, result, call_id: call_id.clone() });
                        if let Err(err) = channel.send_async(Envelope::new(body)).await {
                            log::warn!("failed to deliver async reply for '{}': {}", call_id, err);
                        }
                    }
                    CallOutcome::Pending(fut) => {
                        // Scenario S2: the async call already carries its
                        // own call_id, so the eventual settlement reuses
                        // it directly rather than wrapping a fresh Promise.
                        self.spawn_direct_settlement(call_id, fut, channel);
                    }
                }
                None
            }
        }
    }

    fn reply_sync(&self, outcome: CallOutcome, reply_to: Option<Channel>) -> Envelope {
        match outcome {
            CallOutcome::Ready(result) => {
                let (success, result) = split(result);
                Envelope::new(Body::SyncFnResult(SyncFnResult { success, result }))
            }
            CallOutcome::Pending(fut) => {
                // A Sync call whose target replies with a future: reply
                // immediately with a Promise sentinel, then settle behind
                // a barrier that only opens once this reply is in hand
                // (spec §4.E reply-ordering rule).
                let barrier = Arc::new(Notify::new());
                let obj_id = self.mint_pending_future_on(fut, Some(barrier.clone()), reply_to);
                let sentinel = RpcObject { obj_id, props: None, class_id: Some(PROMISE_CLASS_ID.to_string()) };
                let reply = Envelope::new(Body::SyncFnResult(SyncFnResult {
                    success: true,
                    result: serde_json::to_value(sentinel).expect("sentinel always serializes"),
                }));
                barrier.notify_one();
                reply
            }
        }
    }

    fn spawn_direct_settlement(&self, call_id: String, fut: futures::future::BoxFuture<'static, Result<Value>>, channel: Channel) {
        tokio::spawn(async move {
            let (success, result) = split(fut.await);
            let body = Body::AsyncFnResult(AsyncFnResult { success, result, call_id: call_id.clone() });
            if let Err(err) = channel.send_async(Envelope::new(body)).await {
                log::warn!("failed to deliver async reply for '{}': {}", call_id, err);
            }
        });
    }

    async fn invoke_action(&self, msg: &CallMessage) -> CallOutcome {
        match msg.action {
            CallAction::PropGet => match self.lookup_object(&msg.obj_id) {
                Some((target, _)) => {
                    let prop = msg.prop.as_deref().unwrap_or_default();
                    CallOutcome::ready(target.get_property(prop))
                }
                None => CallOutcome::ready(Err(Error::NotRegistered { id: msg.obj_id.clone() })),
            },
            CallAction::PropSet => match self.lookup_object(&msg.obj_id) {
                Some((target, _)) => {
                    let prop = msg.prop.as_deref().unwrap_or_default();
                    let value = msg.args.first().cloned().unwrap_or(Value::Null);
                    CallOutcome::ready(target.set_property(prop, value).map(|_| Value::Null))
                }
                None => CallOutcome::ready(Err(Error::NotRegistered { id: msg.obj_id.clone() })),
            },
            CallAction::MethodCall => match self.lookup_object(&msg.obj_id) {
                Some((target, descriptor)) => {
                    let prop = msg.prop.as_deref().unwrap_or_default();
                    match descriptor.function(prop) {
                        Some(function) => match self.coerce_arguments(&msg.args, function) {
                            Ok(()) => target.call_method(self, prop, msg.args.clone()),
                            Err(err) => CallOutcome::ready(Err(err)),
                        },
                        None => CallOutcome::ready(Err(Error::MemberNotFound {
                            id: msg.obj_id.clone(),
                            member: prop.to_string(),
                        })),
                    }
                }
                None => CallOutcome::ready(Err(Error::NotRegistered { id: msg.obj_id.clone() })),
            },
            CallAction::FnCall => match self.lookup_function(&msg.obj_id) {
                Some((target, descriptor)) => match self.coerce_arguments(&msg.args, &descriptor) {
                    Ok(()) => target.call(self, msg.args.clone()),
                    Err(err) => CallOutcome::ready(Err(err)),
                },
                None => CallOutcome::ready(Err(Error::NotRegistered { id: msg.obj_id.clone() })),
            },
            CallAction::CtorCall => match self.lookup_class(&msg.obj_id) {
                Some((class, descriptor)) => match self.coerce_arguments(&msg.args, &descriptor.ctor) {
                    Ok(()) => match class.construct(self, msg.args.clone()) {
                        Ok(instance) => {
                            let outbound = Outbound::Instance {
                                class_id: msg.obj_id.clone(),
                                target: instance,
                                descriptor: descriptor.instance,
                            };
                            CallOutcome::ready(Ok(self.marshal(outbound, None)))
                        }
                        Err(err) => CallOutcome::ready(Err(err)),
                    },
                    Err(err) => CallOutcome::ready(Err(err)),
                },
                None => CallOutcome::ready(Err(Error::NotRegistered { id: msg.obj_id.clone() })),
            },
        }
    }
}

fn split(result: Result<Value>) -> (bool, Value) {
    match result {
        Ok(v) => (true, v),
        Err(e) => (false, Value::String(e.to_string())),
    }
}

fn describe(result: &Value) -> String {
    result.as_str().map(str::to_string).unwrap_or_else(|| result.to_string())
}
