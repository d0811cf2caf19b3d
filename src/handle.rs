use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    blob::{BlobUploadPeer, NoopBlobUploadPeer},
    command::{Command, SasUpdateResult},
    controller::{Controller, ControllerEvent},
    credential::ConnectionStringParts,
    error::DeviceError,
    options::ClientOptions,
    subscription::MethodHandlerFn,
    transport::{InboundMessage, OutboundMessage, Transport, TransportOptions},
    twin::Twin,
};

/// The public facade over the session controller (C7).
///
/// Cloning a [`ClientHandle`] is cheap: every clone shares the same
/// underlying actor task via the command channel, the same broadcast
/// event stream. Dropping every clone lets the actor task exit once its
/// command channel closes.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ControllerEvent>,
    transport: Arc<dyn Transport>,
}

impl ClientHandle {
    /// Bind a controller to a transport and start its actor task.
    ///
    /// `conn_parts` carries the parsed connection string, if the caller
    /// authenticated with one (needed for automatic renewal); it is `None`
    /// for handles built directly from a signature.
    pub fn new(
        transport: Arc<dyn Transport>,
        conn_parts: Option<ConnectionStringParts>,
        options: ClientOptions,
    ) -> Self {
        Self::with_blob_peer(transport, Arc::new(NoopBlobUploadPeer), conn_parts, options)
    }

    pub fn with_blob_peer(
        transport: Arc<dyn Transport>,
        blob_peer: Arc<dyn BlobUploadPeer>,
        conn_parts: Option<ConnectionStringParts>,
        options: ClientOptions,
    ) -> Self {
        let parts = Controller::spawn(transport.clone(), blob_peer, conn_parts, options);
        Self { cmd_tx: parts.cmd_tx, events: parts.events, transport }
    }

    fn send(&self, cmd: Command) -> Result<(), DeviceError> {
        self.cmd_tx.send(cmd).map_err(|_| DeviceError::Closed)
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, DeviceError>>) -> Command,
    ) -> Result<T, DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        rx.await.map_err(|_| DeviceError::Closed)?
    }

    /// Establish the underlying transport connection (`spec.md` §6 `open`).
    pub async fn open(&self) -> Result<(), DeviceError> {
        self.call(Command::Open).await
    }

    /// Tear down the connection; idempotent from *disconnected*
    /// (`spec.md` §8, property 4).
    pub async fn close(&self) -> Result<(), DeviceError> {
        self.call(Command::Close).await
    }

    pub async fn send_event(&self, msg: OutboundMessage) -> Result<(), DeviceError> {
        self.call(|r| Command::SendEvent(msg, r)).await
    }

    pub async fn send_event_batch(&self, msgs: Vec<OutboundMessage>) -> Result<(), DeviceError> {
        if msgs.is_empty() {
            return Err(DeviceError::MissingArgument("messages"));
        }
        self.call(|r| Command::SendEventBatch(msgs, r)).await
    }

    pub async fn complete(&self, msg: InboundMessage) -> Result<(), DeviceError> {
        self.call(|r| Command::Complete(msg, r)).await
    }

    pub async fn reject(&self, msg: InboundMessage) -> Result<(), DeviceError> {
        self.call(|r| Command::Reject(msg, r)).await
    }

    pub async fn abandon(&self, msg: InboundMessage) -> Result<(), DeviceError> {
        self.call(|r| Command::Abandon(msg, r)).await
    }

    /// Register a direct-method handler (`spec.md` §6 `on-device-method`).
    ///
    /// Two checks run synchronously, before a [`Command`] is ever
    /// constructed: an empty `name` (`spec.md` §7 *missing-argument*), and
    /// the bound transport's method-response capability (§4.4: "registering
    /// a method handler against a transport lacking method-response support
    /// is rejected immediately at validation time"). Duplicate-name
    /// detection cannot join that synchronous check — only the subscription
    /// manager inside the actor knows the live registration set — so it is
    /// still reported through the completion sink; see `SPEC_FULL.md` for
    /// why this command stays `async` despite `spec.md` calling the
    /// operation "synchronous".
    pub async fn on_device_method(
        &self,
        name: impl Into<String>,
        handler: MethodHandlerFn,
    ) -> Result<(), DeviceError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DeviceError::MissingArgument("method-name"));
        }
        if !self.transport.supports_method_responses() {
            return Err(DeviceError::UnsupportedOperation("send-method-response"));
        }
        self.call(|r| Command::StartMethodReceiver(name, handler, r)).await
    }

    /// Begin receiving cloud-to-device messages.
    pub async fn start_message_receiver(&self) -> Result<(), DeviceError> {
        self.call(Command::StartMessageReceiver).await
    }

    /// Stop receiving cloud-to-device messages; fire-and-forget, per
    /// `spec.md` §6 (there is no listed completion for this operation).
    pub fn stop_message_receiver(&self) -> Result<(), DeviceError> {
        self.send(Command::StopMessageReceiver)
    }

    /// Rotate the authentication credential (`spec.md` §6 `update-credential`).
    ///
    /// A blank signature is rejected synchronously; x509-mode rejection is
    /// not checked here because only the controller holds the parsed auth
    /// mode — it surfaces as [`DeviceError::IncompatibleAuth`] from the
    /// completion sink instead (`spec.md` §8, property 6 still holds: the
    /// transport itself never runs, so no observable side effect occurs
    /// before the rejection is reported).
    pub async fn update_credential(
        &self,
        signature: impl Into<String>,
    ) -> Result<SasUpdateResult, DeviceError> {
        let signature = signature.into();
        if signature.is_empty() {
            return Err(DeviceError::MissingArgument("signature"));
        }
        self.call(|r| Command::UpdateCredential(signature, r)).await
    }

    pub async fn set_transport_options(&self, opts: TransportOptions) -> Result<(), DeviceError> {
        self.call(|r| Command::SetOptions(opts, r)).await
    }

    /// Fetch the twin handle, optionally overriding with one already held by
    /// the caller (`spec.md` §6 `get-twin`, "use the override if provided").
    pub async fn get_twin(&self, existing: Option<Twin>) -> Result<Twin, DeviceError> {
        self.call(|r| Command::GetTwin(existing, r)).await
    }

    /// Delegate a blob upload to the bound peer (`spec.md` §1, Out of scope
    /// — forwarded wholesale, not serviced by the connection state machine).
    pub async fn upload_to_blob(
        &self,
        blob_name: impl Into<String>,
        data: Vec<u8>,
        length: u64,
    ) -> Result<(), DeviceError> {
        let blob_name = blob_name.into();
        if blob_name.is_empty() {
            return Err(DeviceError::MissingArgument("blob-name"));
        }
        self.call(|r| Command::UploadToBlob(blob_name, data, length, r)).await
    }

    /// Stream of inbound cloud-to-device messages (`spec.md` §6 events).
    pub fn messages(&self) -> impl futures_core::Stream<Item = InboundMessage> {
        use futures_util::StreamExt;
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(ControllerEvent::Message(msg)) => Some(msg),
                _ => None,
            }
        })
    }

    /// Stream of spontaneous-disconnect events (`spec.md` §6 events).
    pub fn disconnects(&self) -> impl futures_core::Stream<Item = Option<Arc<DeviceError>>> {
        use futures_util::StreamExt;
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(ControllerEvent::Disconnect(err)) => Some(err),
                _ => None,
            }
        })
    }

    /// Stream of lifecycle error events (`spec.md` §6 events).
    pub fn errors(&self) -> impl futures_core::Stream<Item = Arc<DeviceError>> {
        use futures_util::StreamExt;
        BroadcastStream::new(self.events.subscribe()).filter_map(|item| async move {
            match item {
                Ok(ControllerEvent::Error(err)) => Some(err),
                _ => None,
            }
        })
    }
}
