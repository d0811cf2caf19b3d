use async_trait::async_trait;
use std::fmt::Debug;

use crate::{error::TransportError, transport::InboundMessage};

/// A direct-method invocation delivered by the cloud, prior to being wrapped
/// into a request/response pair by the subscription manager.
#[derive(Debug, Clone)]
pub struct RawMethodInvocation {
    pub request_id: String,
    pub method_name: String,
    pub body: serde_json::Value,
}

/// Events a [`Receiver`] can emit, per `spec.md` §4.2.
#[derive(Debug)]
pub enum ReceiverEvent {
    Message(InboundMessage),
    Method(RawMethodInvocation),
    ErrorReceived(TransportError),
}

/// A stateful subscription sink obtained from a connected transport.
///
/// The controller owns at most one live receiver at a time; `Receiver` itself
/// has no `unsubscribe`/`close` method because tearing it down is simply
/// dropping it — all listener state the core attached is understood to be
/// released when the `Box<dyn Receiver>` is dropped.
#[async_trait]
pub trait Receiver: Debug + Send {
    /// Wait for the next event. Returns `None` once the underlying
    /// subscription has been permanently closed by the transport.
    async fn recv(&mut self) -> Option<ReceiverEvent>;
}
