//
// channel.rs
//
// Polymorphic channel abstraction (spec §4.A). A channel advertises which
// of {send-async, send-sync} it supports; the runtime adapts call style
// to match (spec §4.F). Delivery ("receive") is push-based: the
// embedding transport calls `Runtime::on_message` whenever a message
// arrives, optionally with a reply handle distinct from the bound
// channel and a context value — there is nothing for this crate to poll.
//

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{Error, Result};
use crate::message::Envelope;

/// Fire-and-forget delivery.
pub trait SendAsync: Send + Sync {
    fn send_async(&self, envelope: Envelope) -> BoxFuture<'_, ()>;
}

/// Blocking send: returns the next matching message from the peer
/// before returning control to the caller.
pub trait SendSync: Send + Sync {
    fn send_sync(&self, envelope: Envelope) -> Option<Envelope>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub send_async: bool,
    pub send_sync: bool,
}

/// A channel binding: zero or more of the two send capabilities. Used
/// both as the runtime's bound channel and as a request-scoped reply
/// handle (spec §4.A: "reply_handle defaults to the bound channel").
#[derive(Clone)]
pub struct Channel {
    async_impl: Option<Arc<dyn SendAsync>>,
    sync_impl: Option<Arc<dyn SendSync>>,
}

impl Channel {
    pub fn new() -> Self {
        Self { async_impl: None, sync_impl: None }
    }

    pub fn with_send_async(mut self, send_async: Arc<dyn SendAsync>) -> Self {
        self.async_impl = Some(send_async);
        self
    }

    pub fn with_send_sync(mut self, send_sync: Arc<dyn SendSync>) -> Self {
        self.sync_impl = Some(send_sync);
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            send_async: self.async_impl.is_some(),
            send_sync: self.sync_impl.is_some(),
        }
    }

    pub async fn send_async(&self, envelope: Envelope) -> Result<()> {
        match &self.async_impl {
            Some(imp) => {
                imp.send_async(envelope).await;
                Ok(())
            }
            None => Err(Error::ChannelUnavailable { needed: "send-async" }),
        }
    }

    pub fn send_sync(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        match &self.sync_impl {
            Some(imp) => Ok(imp.send_sync(envelope)),
            None => Err(Error::ChannelUnavailable { needed: "send-sync" }),
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}
