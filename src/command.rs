use tokio::sync::oneshot;

use crate::{
    error::DeviceError,
    receiver::ReceiverEvent,
    subscription::MethodHandlerFn,
    transport::{CredentialUpdateOutcome, InboundMessage, OutboundMessage, TransportOptions},
    twin::Twin,
};

/// Result of a successful `update-credential` (`spec.md` §6).
///
/// `reconnected` is carried verbatim from the upstream protocol even after a
/// reconnect occurs; see `DESIGN.md` for why this is kept as-is rather than
/// "fixed" to reflect what actually happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SasUpdateResult {
    pub reconnected: bool,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, DeviceError>>;

/// Every externally- or internally-triggered action the state machine can
/// process, per `spec.md` §4.6.
///
/// Variants fall into three groups: public operations issued through
/// [`crate::handle::ClientHandle`] (each carries a [`Reply`] so the caller's
/// completion sink can be satisfied whenever the command is actually
/// serviced, possibly after being deferred); subscription bookkeeping that
/// the facade issues on `Drop`/registration (no reply, fire-and-forget); and
/// internal events raised by the transport, the receiver task, or the
/// renewal timer.
pub enum Command {
    Open(Reply<()>),
    Close(Reply<()>),

    SendEvent(OutboundMessage, Reply<()>),
    SendEventBatch(Vec<OutboundMessage>, Reply<()>),
    Complete(InboundMessage, Reply<()>),
    Reject(InboundMessage, Reply<()>),
    Abandon(InboundMessage, Reply<()>),

    UpdateCredential(String, Reply<SasUpdateResult>),
    SetOptions(TransportOptions, Reply<()>),

    StartMessageReceiver(Reply<()>),
    StopMessageReceiver,
    StartMethodReceiver(String, MethodHandlerFn, Reply<()>),

    GetTwin(Option<Twin>, Reply<Twin>),

    /// Delegated wholesale to the blob-upload peer; does not touch
    /// connection state (`spec.md` §6 `upload-to-blob`).
    UploadToBlob(String, Vec<u8>, u64, Reply<()>),

    /// Raised by the actor's receiver task when the transport signals a
    /// spontaneous disconnect (`spec.md` §4.6, "Spontaneous disconnect").
    TransportDisconnected(Option<DeviceError>),

    /// Raised once the renewal timer fires (`spec.md` §4.3).
    RenewalTimerFired,


    /// An event forwarded from the currently attached receiver's background task.
    ReceiverEvent(ReceiverEvent),

    /// The background task servicing a `connect` call has finished.
    ConnectCompleted(Result<(), DeviceError>),

    /// The background task servicing a `disconnect` call has finished.
    DisconnectCompleted(Result<(), DeviceError>),

    /// The background task servicing `update-credential` has finished.
    CredentialUpdateCompleted(Result<CredentialUpdateOutcome, DeviceError>),

    /// The reconnect triggered by a rotation that returned `needs-reconnect`
    /// has finished.
    ReconnectCompleted(Result<(), DeviceError>),
}

impl Command {
    /// Human-readable tag used in tracing spans and deferred-queue logs.
    pub fn tag(&self) -> &'static str {
        match self {
            Command::Open(_) => "open",
            Command::Close(_) => "close",
            Command::SendEvent(..) => "send-event",
            Command::SendEventBatch(..) => "send-event-batch",
            Command::Complete(..) => "complete",
            Command::Reject(..) => "reject",
            Command::Abandon(..) => "abandon",
            Command::UpdateCredential(..) => "update-credential",
            Command::SetOptions(..) => "set-options",
            Command::StartMessageReceiver(_) => "start-message-receiver",
            Command::StopMessageReceiver => "stop-message-receiver",
            Command::StartMethodReceiver(..) => "start-method-receiver",
            Command::GetTwin(..) => "get-twin",
            Command::UploadToBlob(..) => "upload-to-blob",
            Command::TransportDisconnected(_) => "_transport-disconnected",
            Command::RenewalTimerFired => "_renewal-timer-fired",
            Command::ReceiverEvent(_) => "_receiver-event",
            Command::ConnectCompleted(_) => "_connect-completed",
            Command::DisconnectCompleted(_) => "_disconnect-completed",
            Command::CredentialUpdateCompleted(_) => "_credential-update-completed",
            Command::ReconnectCompleted(_) => "_reconnect-completed",
        }
    }

    /// Fails a reply-bearing command synchronously with the given error.
    /// Used when a deferred command is dropped instead of replayed (e.g. the
    /// actor shuts down with commands still queued).
    pub(crate) fn fail(self, err: DeviceError) {
        match self {
            Command::Open(r) => {
                let _ = r.send(Err(err));
            }
            Command::Close(r) => {
                let _ = r.send(Err(err));
            }
            Command::SendEvent(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::SendEventBatch(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::Complete(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::Reject(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::Abandon(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::UpdateCredential(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::SetOptions(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::StartMessageReceiver(r) => {
                let _ = r.send(Err(err));
            }
            Command::StartMethodReceiver(_, _, r) => {
                let _ = r.send(Err(err));
            }
            Command::GetTwin(_, r) => {
                let _ = r.send(Err(err));
            }
            Command::UploadToBlob(_, _, _, r) => {
                let _ = r.send(Err(err));
            }
            Command::StopMessageReceiver
            | Command::TransportDisconnected(_)
            | Command::RenewalTimerFired

            | Command::ReceiverEvent(_)
            | Command::ConnectCompleted(_)
            | Command::DisconnectCompleted(_)
            | Command::CredentialUpdateCompleted(_)
            | Command::ReconnectCompleted(_) => {}
        }
    }
}
