use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{
    blob::BlobUploadPeer,
    command::{Command, Reply, SasUpdateResult},
    credential::{mint_signature, AuthMode, ConnectionStringParts},
    error::DeviceError,
    options::ClientOptions,
    receiver::ReceiverEvent,
    state::SessionState,
    subscription::{MethodRequest, MethodResponder, SubscriptionManager},
    transport::{InboundMessage, Transport},
    twin::Twin,
};

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type DisconnectFut = Pin<Box<dyn Future<Output = DeviceError> + Send>>;

/// Public events emitted by the controller (`spec.md` §4.7, §6).
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Message(InboundMessage),
    Disconnect(Option<Arc<DeviceError>>),
    Error(Arc<DeviceError>),
}

async fn next_sleep(slot: &mut Option<Pin<Box<tokio::time::Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_disconnect(slot: &mut Option<DisconnectFut>) -> DeviceError {
    match slot {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

/// The connection-lifecycle state machine (C6), subscription manager (C5),
/// and credential-rotation protocol, all owned by one actor task
/// (`spec.md` §5: "single-threaded cooperative").
pub(crate) struct Controller {
    transport: Arc<dyn Transport>,
    blob_peer: Arc<dyn BlobUploadPeer>,
    conn_parts: Option<ConnectionStringParts>,
    auto_renewal: bool,
    sas_renewal_interval: Duration,
    signature_lifetime: Duration,

    state: SessionState,
    deferred: VecDeque<Command>,
    subs: SubscriptionManager,

    receiver_task: Option<tokio::task::JoinHandle<()>>,
    renewal_fut: Option<Pin<Box<tokio::time::Sleep>>>,
    disconnect_fut: Option<DisconnectFut>,

    pending_open: Option<Reply<()>>,
    pending_close: Option<Reply<()>>,
    pending_rotation: Option<Reply<SasUpdateResult>>,

    events_tx: broadcast::Sender<ControllerEvent>,
    credential_tx: watch::Sender<u64>,
    credential_generation: u64,

    self_tx: mpsc::UnboundedSender<Command>,
}

pub(crate) struct ControllerHandleParts {
    pub cmd_tx: mpsc::UnboundedSender<Command>,
    pub events: broadcast::Sender<ControllerEvent>,
    pub credential_updates: watch::Receiver<u64>,
}

impl Controller {
    pub(crate) fn spawn(
        transport: Arc<dyn Transport>,
        blob_peer: Arc<dyn BlobUploadPeer>,
        conn_parts: Option<ConnectionStringParts>,
        options: ClientOptions,
    ) -> ControllerHandleParts {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);
        let (credential_tx, credential_updates) = watch::channel(0u64);

        let auto_renewal =
            conn_parts.as_ref().map(|p| p.auth.supports_auto_renewal()).unwrap_or(false);

        let controller = Controller {
            transport,
            blob_peer,
            conn_parts,
            auto_renewal,
            sas_renewal_interval: options.sas_renewal_interval,
            signature_lifetime: options.signature_lifetime,
            state: SessionState::Disconnected,
            deferred: VecDeque::new(),
            subs: SubscriptionManager::default(),
            receiver_task: None,
            renewal_fut: None,
            disconnect_fut: None,
            pending_open: None,
            pending_close: None,
            pending_rotation: None,
            events_tx: events_tx.clone(),
            credential_tx,
            credential_generation: 0,
            self_tx: cmd_tx.clone(),
        };

        tokio::spawn(controller.run(cmd_rx));

        ControllerHandleParts { cmd_tx, events: events_tx, credential_updates }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.process(cmd).await,
                        None => break,
                    }
                }
                () = next_sleep(&mut self.renewal_fut) => {
                    self.renewal_fut = None;
                    self.process(Command::RenewalTimerFired).await;
                }
                err = next_disconnect(&mut self.disconnect_fut) => {
                    self.disconnect_fut = None;
                    self.process(Command::TransportDisconnected(Some(err))).await;
                }
            }
        }

        tracing::debug!("controller actor shutting down");
        if let Some(task) = self.receiver_task.take() {
            task.abort();
        }
        while let Some(cmd) = self.deferred.pop_front() {
            cmd.fail(DeviceError::Closed);
        }
    }

    fn process(&mut self, cmd: Command) -> BoxFut<'_, ()> {
        Box::pin(async move {
            tracing::trace!(state = %self.state, command = cmd.tag(), "dispatch");
            match cmd {
                Command::ConnectCompleted(result) => self.on_connect_completed(result).await,
                Command::DisconnectCompleted(result) => self.on_disconnect_completed(result).await,
                Command::CredentialUpdateCompleted(result) => {
                    self.on_credential_update_completed(result).await
                }
                Command::ReconnectCompleted(result) => self.on_reconnect_completed(result).await,
                Command::TransportDisconnected(err) => self.on_spontaneous_disconnect(err).await,
                Command::RenewalTimerFired => self.on_renewal_timer_fired().await,
                Command::ReceiverEvent(ev) => self.on_receiver_event(ev).await,
                Command::UploadToBlob(name, data, length, reply) => {
                    let result = self.blob_peer.upload(&name, data, length).await;
                    let _ = reply.send(result);
                }
                Command::UpdateCredential(_sig, reply)
                    if matches!(
                        self.conn_parts.as_ref().map(|p| &p.auth),
                        Some(crate::credential::AuthMode::X509)
                    ) =>
                {
                    let _ = reply.send(Err(DeviceError::IncompatibleAuth));
                }
                other => match self.state {
                    SessionState::Disconnected => self.in_disconnected(other).await,
                    SessionState::Connecting => self.in_connecting(other).await,
                    SessionState::Connected => self.in_connected(other).await,
                    SessionState::Disconnecting => self.defer(other),
                    SessionState::UpdatingSas => self.in_updating_sas(other).await,
                },
            }
        })
    }

    // ---- state transition plumbing ----------------------------------

    fn transition(&mut self, new_state: SessionState) {
        tracing::debug!(from = %self.state, to = %new_state, "state transition");
        if self.state == SessionState::Connected {
            self.teardown_receiver();
        }
        self.state = new_state;
        if new_state == SessionState::UpdatingSas {
            self.renewal_fut = None;
        }
    }

    fn defer(&mut self, cmd: Command) {
        self.deferred.push_back(cmd);
    }

    /// Drain and replay the deferred queue against the current state, in
    /// issue order (`spec.md` §8, property 3).
    fn drain_deferred(&mut self) -> BoxFut<'_, ()> {
        Box::pin(async move {
            let pending: Vec<Command> = self.deferred.drain(..).collect();
            for cmd in pending {
                self.process(cmd).await;
            }
        })
    }

    fn fanout_failure(&mut self, err: &DeviceError) {
        let msg = err.to_string();
        let pending: Vec<Command> = self.deferred.drain(..).collect();
        for cmd in pending {
            cmd.fail(DeviceError::transport(msg.clone()));
        }
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events_tx.send(event);
    }

    // ---- connect / disconnect ----------------------------------------

    fn begin_connect(&mut self, reply: Option<Reply<()>>) {
        self.pending_open = reply;
        self.transition(SessionState::Connecting);
        let transport = self.transport.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = if transport.supports_connect() {
                transport.connect().await
            } else {
                Ok(())
            };
            let _ = self_tx.send(Command::ConnectCompleted(result));
        });
    }

    async fn on_connect_completed(&mut self, result: Result<(), DeviceError>) {
        if self.state != SessionState::Connecting {
            tracing::debug!("ignoring stale connect completion");
            return;
        }
        match result {
            Ok(()) => {
                self.transition(SessionState::Connected);
                self.disconnect_fut = Some(self.transport.disconnect_signal());
                if let Some(reply) = self.pending_open.take() {
                    let _ = reply.send(Ok(()));
                }
                self.evaluate_subscriptions().await;
                self.drain_deferred().await;
            }
            Err(e) => {
                self.transition(SessionState::Disconnected);
                if let Some(reply) = self.pending_open.take() {
                    let _ = reply.send(Err(e));
                } else {
                    self.fanout_failure(&e);
                }
            }
        }
    }

    fn begin_disconnect(&mut self, reply: Reply<()>) {
        self.pending_close = Some(reply);
        self.transition(SessionState::Disconnecting);
        let transport = self.transport.clone();
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            let result = transport.disconnect().await;
            let _ = self_tx.send(Command::DisconnectCompleted(result));
        });
    }

    async fn on_disconnect_completed(&mut self, result: Result<(), DeviceError>) {
        self.transition(SessionState::Disconnected);
        if let Some(reply) = self.pending_close.take() {
            let _ = reply.send(result);
        }
        self.drain_deferred().await;
    }

    async fn on_spontaneous_disconnect(&mut self, err: Option<DeviceError>) {
        self.transition(SessionState::Disconnected);
        self.emit(ControllerEvent::Disconnect(err.map(Arc::new)));
    }

    // ---- credential rotation ------------------------------------------

    fn begin_rotation(&mut self, signature: String, reply: Reply<SasUpdateResult>) {
        self.pending_rotation = Some(reply);
        self.transition(SessionState::UpdatingSas);
        self.credential_generation += 1;
        let _ = self.credential_tx.send(self.credential_generation);

        let blob_peer = self.blob_peer.clone();
        let transport = self.transport.clone();
        let self_tx = self.self_tx.clone();
        let sig_for_blob = signature.clone();
        tokio::spawn(async move {
            blob_peer.update_credential(&sig_for_blob).await;
            let result = transport.update_credential(&signature).await;
            let _ = self_tx.send(Command::CredentialUpdateCompleted(result));
        });
    }

    async fn on_credential_update_completed(
        &mut self,
        result: Result<crate::transport::CredentialUpdateOutcome, DeviceError>,
    ) {
        match result {
            Err(e) => {
                self.transition(SessionState::Disconnected);
                if let Some(reply) = self.pending_rotation.take() {
                    let _ = reply.send(Err(e));
                }
            }
            Ok(outcome) if outcome.needs_reconnect => {
                self.transition(SessionState::Connecting);
                let transport = self.transport.clone();
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    let result = transport.connect().await;
                    let _ = self_tx.send(Command::ReconnectCompleted(result));
                });
            }
            Ok(_) => {
                self.reschedule_renewal();
                self.transition(SessionState::Connected);
                if let Some(reply) = self.pending_rotation.take() {
                    let _ = reply.send(Ok(SasUpdateResult { reconnected: false }));
                }
                self.evaluate_subscriptions().await;
                self.drain_deferred().await;
            }
        }
    }

    async fn on_reconnect_completed(&mut self, result: Result<(), DeviceError>) {
        match result {
            Ok(()) => {
                self.reschedule_renewal();
                self.transition(SessionState::Connected);
                self.disconnect_fut = Some(self.transport.disconnect_signal());
                if let Some(reply) = self.pending_rotation.take() {
                    // §9 Open Questions: `reconnected` is reported `false`
                    // even though a reconnect just happened; kept as-is.
                    let _ = reply.send(Ok(SasUpdateResult { reconnected: false }));
                }
                self.evaluate_subscriptions().await;
                self.drain_deferred().await;
            }
            Err(e) => {
                self.transition(SessionState::Disconnected);
                if let Some(reply) = self.pending_rotation.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    async fn on_renewal_timer_fired(&mut self) {
        let Some(parts) = self.conn_parts.clone() else { return };
        let AuthMode::SharedKey { .. } = &parts.auth else { return };

        match mint_signature(&parts, self.signature_lifetime, SystemTime::now()) {
            Ok(sig) => {
                let (tx, rx) = oneshot::channel();
                self.begin_rotation(sig, tx);
                let self_tx_events = self.events_tx.clone();
                tokio::spawn(async move {
                    if let Ok(Err(e)) = rx.await {
                        let _ = self_tx_events.send(ControllerEvent::Error(Arc::new(e)));
                    }
                });
            }
            Err(e) => self.emit(ControllerEvent::Error(Arc::new(e))),
        }
    }

    fn reschedule_renewal(&mut self) {
        if self.auto_renewal {
            self.renewal_fut = Some(Box::pin(tokio::time::sleep(self.sas_renewal_interval)));
        }
    }

    // ---- subscription manager orchestration ---------------------------

    async fn ensure_receiver(&mut self) {
        if self.receiver_task.is_some() {
            return;
        }
        match self.transport.get_receiver().await {
            Ok(mut receiver) => {
                let self_tx = self.self_tx.clone();
                let task = tokio::spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        if self_tx.send(Command::ReceiverEvent(event)).is_err() {
                            break;
                        }
                    }
                });
                self.receiver_task = Some(task);
            }
            Err(e) => {
                self.emit(ControllerEvent::Error(Arc::new(e)));
            }
        }
    }

    fn teardown_receiver(&mut self) {
        if let Some(task) = self.receiver_task.take() {
            task.abort();
        }
    }

    async fn evaluate_subscriptions(&mut self) {
        if self.state != SessionState::Connected {
            return;
        }
        if self.subs.has_interest() {
            self.ensure_receiver().await;
        } else {
            self.teardown_receiver();
        }
    }

    async fn on_receiver_event(&mut self, event: ReceiverEvent) {
        match event {
            ReceiverEvent::Message(msg) => self.emit(ControllerEvent::Message(msg)),
            ReceiverEvent::ErrorReceived(err) => {
                self.emit(ControllerEvent::Error(Arc::new(DeviceError::from(err))))
            }
            ReceiverEvent::Method(raw) => {
                if let Some(handler) = self.subs.method_handler(&raw.method_name) {
                    let request = MethodRequest::from_raw(&raw);
                    let responder = MethodResponder::new(raw.request_id, self.transport.clone());
                    handler(request, responder);
                } else {
                    tracing::warn!(method = %raw.method_name, "no handler registered for method invocation");
                }
            }
        }
    }

    // ---- per-state command tables (spec.md §4.6) -----------------------

    async fn in_disconnected(&mut self, cmd: Command) {
        match cmd {
            Command::Open(reply) => self.begin_connect(Some(reply)),
            Command::Close(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::UpdateCredential(sig, reply) => {
                match self.transport.update_credential(&sig).await {
                    Ok(_) => {
                        let _ = reply.send(Ok(SasUpdateResult { reconnected: false }));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::StopMessageReceiver => {
                self.subs.remove_message_listener();
            }
            other => {
                self.defer(other);
                self.begin_connect(None);
            }
        }
    }

    async fn in_connecting(&mut self, cmd: Command) {
        match cmd {
            Command::Close(reply) => self.begin_disconnect(reply),
            other => self.defer(other),
        }
    }

    async fn in_connected(&mut self, cmd: Command) {
        match cmd {
            Command::Open(reply) => {
                let _ = reply.send(Ok(()));
            }
            Command::Close(reply) => self.begin_disconnect(reply),
            Command::SendEvent(msg, reply) => {
                if self.transport.supports_sending() {
                    let _ = reply.send(self.transport.send_event(msg).await);
                } else {
                    let _ = reply.send(Err(DeviceError::UnsupportedOperation("send-event")));
                }
            }
            Command::SendEventBatch(msgs, reply) => {
                if self.transport.supports_sending() {
                    let _ = reply.send(self.transport.send_event_batch(msgs).await);
                } else {
                    let _ =
                        reply.send(Err(DeviceError::UnsupportedOperation("send-event-batch")));
                }
            }
            Command::Complete(msg, reply) => self.settle(msg, reply, Settlement::Complete).await,
            Command::Reject(msg, reply) => self.settle(msg, reply, Settlement::Reject).await,
            Command::Abandon(msg, reply) => self.settle(msg, reply, Settlement::Abandon).await,
            Command::UpdateCredential(sig, reply) => self.begin_rotation(sig, reply),
            Command::SetOptions(opts, reply) => {
                let _ = reply.send(self.transport.set_options(opts).await);
            }
            Command::StartMessageReceiver(reply) => {
                self.subs.add_message_listener();
                self.evaluate_subscriptions().await;
                let _ = reply.send(Ok(()));
            }
            Command::StopMessageReceiver => {
                self.subs.remove_message_listener();
                self.evaluate_subscriptions().await;
            }
            Command::StartMethodReceiver(name, handler, reply) => {
                match self.subs.register_method(name, handler) {
                    Ok(()) => {
                        self.evaluate_subscriptions().await;
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::GetTwin(maybe_twin, reply) => {
                let twin = maybe_twin.unwrap_or_else(|| {
                    Twin::new(
                        self.conn_parts
                            .as_ref()
                            .map(|p| p.device_id.clone())
                            .unwrap_or_default(),
                        self.credential_tx.subscribe(),
                    )
                });
                let _ = reply.send(Ok(twin));
            }
            other => self.defer(other),
        }
    }

    async fn in_updating_sas(&mut self, cmd: Command) {
        match cmd {
            Command::Close(reply) => self.begin_disconnect(reply),
            other => self.defer(other),
        }
    }

    async fn settle(&mut self, msg: InboundMessage, reply: Reply<()>, kind: Settlement) {
        if !self.transport.supports_settlement() {
            let _ = reply.send(Err(DeviceError::UnsupportedOperation(kind.op_name())));
            return;
        }
        let result = match kind {
            Settlement::Complete => self.transport.complete(msg).await,
            Settlement::Reject => self.transport.reject(msg).await,
            Settlement::Abandon => self.transport.abandon(msg).await,
        };
        let _ = reply.send(result);
    }
}

#[derive(Clone, Copy)]
enum Settlement {
    Complete,
    Reject,
    Abandon,
}

impl Settlement {
    fn op_name(self) -> &'static str {
        match self {
            Settlement::Complete => "complete",
            Settlement::Reject => "reject",
            Settlement::Abandon => "abandon",
        }
    }
}
