//! End-to-end scenarios against a hand-rolled mock transport, covering the
//! universal properties and literal scenarios used to validate the session
//! controller.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use iothub_device_client::{
    ClientHandle, ClientOptions, CredentialUpdateOutcome, DeviceError, InboundMessage,
    MethodResponse, OutboundMessage, Receiver, ReceiverEvent, Transport, TransportError,
    TransportOptions,
};

#[derive(Clone, Copy)]
enum ConnectBehavior {
    Succeed,
    Fail,
}

#[derive(Clone, Copy)]
enum RotationBehavior {
    InPlace,
    NeedsReconnect,
    Fail,
}

struct Inner {
    connect_behavior: ConnectBehavior,
    rotation_behavior: RotationBehavior,
    supports_sending: bool,
    supports_settlement: bool,
    supports_method_responses: bool,
    disconnect_tx: Option<oneshot::Sender<DeviceError>>,
    receiver_tx: Option<mpsc::UnboundedSender<ReceiverEvent>>,
}

#[derive(Debug)]
struct MockTransport {
    inner: Mutex<Inner>,
    connect_calls: AtomicUsize,
    get_receiver_calls: AtomicUsize,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner").finish_non_exhaustive()
    }
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                connect_behavior: ConnectBehavior::Succeed,
                rotation_behavior: RotationBehavior::InPlace,
                supports_sending: true,
                supports_settlement: false,
                supports_method_responses: true,
                disconnect_tx: None,
                receiver_tx: None,
            }),
            connect_calls: AtomicUsize::new(0),
            get_receiver_calls: AtomicUsize::new(0),
        })
    }

    fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.inner.lock().unwrap().connect_behavior = behavior;
    }

    fn set_rotation_behavior(&self, behavior: RotationBehavior) {
        self.inner.lock().unwrap().rotation_behavior = behavior;
    }

    fn set_supports_method_responses(&self, supported: bool) {
        self.inner.lock().unwrap().supports_method_responses = supported;
    }

    fn connect_call_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    fn get_receiver_call_count(&self) -> usize {
        self.get_receiver_calls.load(Ordering::SeqCst)
    }

    fn trigger_disconnect(&self, err: DeviceError) {
        if let Some(tx) = self.inner.lock().unwrap().disconnect_tx.take() {
            let _ = tx.send(err);
        }
    }

    fn push_message(&self, msg: InboundMessage) {
        if let Some(tx) = &self.inner.lock().unwrap().receiver_tx {
            let _ = tx.send(ReceiverEvent::Message(msg));
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn supports_connect(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), DeviceError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.lock().unwrap().connect_behavior {
            ConnectBehavior::Succeed => Ok(()),
            ConnectBehavior::Fail => Err(DeviceError::Transport(TransportError::new("mock connect failure"))),
        }
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn disconnect_signal(&self) -> Pin<Box<dyn Future<Output = DeviceError> + Send>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().disconnect_tx = Some(tx);
        Box::pin(async move { rx.await.unwrap_or(DeviceError::Closed) })
    }

    fn supports_sending(&self) -> bool {
        self.inner.lock().unwrap().supports_sending
    }

    async fn send_event(&self, _msg: OutboundMessage) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn send_event_batch(&self, _msgs: Vec<OutboundMessage>) -> Result<(), DeviceError> {
        Ok(())
    }

    fn supports_settlement(&self) -> bool {
        self.inner.lock().unwrap().supports_settlement
    }

    async fn complete(&self, _msg: InboundMessage) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn update_credential(
        &self,
        _signature: &str,
    ) -> Result<CredentialUpdateOutcome, DeviceError> {
        match self.inner.lock().unwrap().rotation_behavior {
            RotationBehavior::InPlace => Ok(CredentialUpdateOutcome { needs_reconnect: false }),
            RotationBehavior::NeedsReconnect => {
                Ok(CredentialUpdateOutcome { needs_reconnect: true })
            }
            RotationBehavior::Fail => Err(DeviceError::Transport(TransportError::new("mock rotation failure"))),
        }
    }

    async fn set_options(&self, _opts: TransportOptions) -> Result<(), DeviceError> {
        Ok(())
    }

    fn supports_method_responses(&self) -> bool {
        self.inner.lock().unwrap().supports_method_responses
    }

    async fn send_method_response(&self, _resp: MethodResponse) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn get_receiver(&self) -> Result<Box<dyn Receiver>, DeviceError> {
        self.get_receiver_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().receiver_tx = Some(tx);
        Ok(Box::new(MockReceiver { rx }))
    }
}

#[derive(Debug)]
struct MockReceiver {
    rx: mpsc::UnboundedReceiver<ReceiverEvent>,
}

#[async_trait]
impl Receiver for MockReceiver {
    async fn recv(&mut self) -> Option<ReceiverEvent> {
        self.rx.recv().await
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// S1 — open from disconnected with a working connect.
#[tokio::test]
async fn open_from_disconnected_succeeds() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());

    handle.open().await.unwrap();

    assert_eq!(transport.connect_call_count(), 1);
}

/// Property 4 — idempotent close.
#[tokio::test]
async fn close_from_disconnected_is_idempotent() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());

    handle.close().await.unwrap();
    handle.close().await.unwrap();

    assert_eq!(transport.connect_call_count(), 0);
}

/// S6 — unsupported settlement surfaces synchronously.
#[tokio::test]
async fn unsupported_settlement_fails() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();

    let err = handle
        .complete(InboundMessage {
            lock_token: "lt-1".into(),
            body: vec![],
            properties: Default::default(),
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::UnsupportedOperation("complete")));
}

/// S6, mirrored for method registration — a transport without method-response
/// support rejects registration synchronously, at validation time, without
/// ever reaching the actor (no receiver is attached).
#[tokio::test]
async fn unsupported_method_responses_rejects_registration() {
    let transport = MockTransport::new();
    transport.set_supports_method_responses(false);
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();

    let err = handle
        .on_device_method("reboot", Arc::new(|_, _| {}))
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::UnsupportedOperation("send-method-response")));
    assert_eq!(transport.get_receiver_call_count(), 0);
}

/// Property 6 — x509 rejects rotation synchronously, without ever reaching
/// the transport (connect call count is unaffected by the rejected call).
#[tokio::test]
async fn x509_rejects_credential_rotation() {
    use iothub_device_client::{AuthMode, ConnectionStringParts};

    let transport = MockTransport::new();
    let parts = ConnectionStringParts {
        host: "hub.azure-devices.net".into(),
        device_id: "device-1".into(),
        hub_name: "hub".into(),
        auth: AuthMode::X509,
    };
    let handle = ClientHandle::new(transport.clone(), Some(parts), ClientOptions::default());
    handle.open().await.unwrap();

    let err = handle
        .update_credential("SharedAccessSignature sr=x&sig=y&se=1")
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::IncompatibleAuth));
    assert_eq!(transport.connect_call_count(), 1);

    let err = iothub_device_client::mint_signature(
        &parts_x509(),
        Duration::from_secs(3600),
        std::time::SystemTime::now(),
    )
    .unwrap_err();
    assert!(matches!(err, DeviceError::IncompatibleAuth));
}

fn parts_x509() -> iothub_device_client::ConnectionStringParts {
    iothub_device_client::ConnectionStringParts {
        host: "hub.azure-devices.net".into(),
        device_id: "device-1".into(),
        hub_name: "hub".into(),
        auth: iothub_device_client::AuthMode::X509,
    }
}

/// S4 — rotation with reconnect calls `connect` exactly once more before
/// completion (property 5), and `reconnected` is reported `false` (§9 Open
/// Questions resolution, preserved verbatim).
#[tokio::test]
async fn rotation_with_reconnect_reports_false() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();
    assert_eq!(transport.connect_call_count(), 1);

    transport.set_rotation_behavior(RotationBehavior::NeedsReconnect);
    let result = handle.update_credential("SharedAccessSignature sr=x&sig=y&se=1").await.unwrap();

    assert_eq!(transport.connect_call_count(), 2);
    assert!(!result.reconnected);
}

/// S3 — registering two method handlers back-to-back attaches the receiver
/// exactly once.
#[tokio::test]
async fn method_registration_attaches_receiver_once() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();

    handle.on_device_method("m1", Arc::new(|_, _| {})).await.unwrap();
    handle.on_device_method("m2", Arc::new(|_, _| {})).await.unwrap();

    assert_eq!(transport.get_receiver_call_count(), 1);
}

/// Duplicate method registration is rejected without tearing anything down.
#[tokio::test]
async fn duplicate_method_registration_is_rejected() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();

    handle.on_device_method("reboot", Arc::new(|_, _| {})).await.unwrap();
    let err = handle.on_device_method("reboot", Arc::new(|_, _| {})).await.unwrap_err();

    assert!(matches!(err, DeviceError::DuplicateRegistration(name) if name == "reboot"));
}

/// S5 — spontaneous disconnect surfaces as a public event and resets state
/// back to disconnected (a subsequent `open` reconnects cleanly).
#[tokio::test]
async fn spontaneous_disconnect_is_observable() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();

    let mut disconnects = handle.disconnects();
    transport.trigger_disconnect(DeviceError::Transport(TransportError::new("link dropped")));

    let event = tokio::time::timeout(Duration::from_secs(1), disconnects.next())
        .await
        .expect("disconnect event should arrive")
        .expect("stream should not end");
    assert!(event.is_some());

    // the controller collapsed back to disconnected; a fresh open reconnects.
    handle.open().await.unwrap();
    assert_eq!(transport.connect_call_count(), 2);
}

/// Inbound messages delivered by the receiver surface on the `messages`
/// stream once a listener has been installed.
#[tokio::test]
async fn inbound_messages_are_delivered() {
    let transport = MockTransport::new();
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());
    handle.open().await.unwrap();
    handle.start_message_receiver().await.unwrap();
    settle().await;

    let mut messages = handle.messages();
    transport.push_message(InboundMessage {
        lock_token: "lt-1".into(),
        body: b"hello".to_vec(),
        properties: Default::default(),
    });

    let msg = tokio::time::timeout(Duration::from_secs(1), messages.next())
        .await
        .expect("message should arrive")
        .expect("stream should not end");
    assert_eq!(msg.lock_token, "lt-1");
}

/// Property 3 — deferred commands replay in issue order. `send-event` and
/// `close` issued back-to-back while still connecting both observe a single
/// resolved connect before either completes, in submission order.
#[tokio::test]
async fn send_event_while_connecting_is_ordered_after_connect() {
    let transport = MockTransport::new();
    transport.set_connect_behavior(ConnectBehavior::Succeed);
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());

    let open_fut = handle.open();
    let send_fut = handle.send_event(OutboundMessage { body: vec![1], properties: Default::default() });

    let (open_result, send_result) = tokio::join!(open_fut, send_fut);
    open_result.unwrap();
    send_result.unwrap();
    assert_eq!(transport.connect_call_count(), 1);
}

/// A failing connect surfaces the transport error to the caller and leaves
/// the controller back in disconnected (no stuck `connecting`).
#[tokio::test]
async fn failed_connect_returns_to_disconnected() {
    let transport = MockTransport::new();
    transport.set_connect_behavior(ConnectBehavior::Fail);
    let handle = ClientHandle::new(transport.clone(), None, ClientOptions::default());

    let err = handle.open().await.unwrap_err();
    assert!(matches!(err, DeviceError::Transport(_)));

    transport.set_connect_behavior(ConnectBehavior::Succeed);
    handle.open().await.unwrap();
    assert_eq!(transport.connect_call_count(), 2);
}
