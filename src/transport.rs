use async_trait::async_trait;
use std::{fmt::Debug, future::Future, pin::Pin};

use crate::{error::DeviceError, receiver::Receiver};

/// Outcome of a credential rotation at the transport level.
///
/// Mirrors the IoT Hub protocol detail that some transports (e.g. a stateful
/// MQTT connection) must drop and re-establish the underlying connection to
/// pick up a new signature, while others (a bare HTTPS client) can rotate the
/// credential in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialUpdateOutcome {
    pub needs_reconnect: bool,
}

/// Options forwarded verbatim to the transport via [`Transport::set_options`].
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub polling_interval: Option<std::time::Duration>,
    pub ca_cert: Option<String>,
    pub extra: std::collections::HashMap<String, String>,
}

/// A message queued for device-to-cloud delivery.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    pub properties: std::collections::HashMap<String, String>,
}

/// A response to a direct-method invocation, bound back to the transport
/// that delivered the original request.
#[derive(Debug, Clone)]
pub struct MethodResponse {
    pub request_id: String,
    pub status: i32,
    pub body: serde_json::Value,
}

/// A message received from the cloud, pending settlement.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub lock_token: String,
    pub body: Vec<u8>,
    pub properties: std::collections::HashMap<String, String>,
}

/// The capability-probe surface (C4): which optional operations the bound
/// transport actually implements.
///
/// The default implementations all report "unsupported" — a transport only
/// needs to override the capability flags (and the matching operation) it
/// actually provides. This replaces the original's dynamic reflection-based
/// probing with a static, compile-time-checkable declaration.
#[async_trait]
pub trait Transport: Debug + Send + Sync {
    /// Attempt to establish the underlying connection.
    ///
    /// Transports that are stateless (e.g. a plain HTTPS client) can report
    /// `supports_connect() == false`; the state machine then treats the
    /// transport as always-connected.
    fn supports_connect(&self) -> bool {
        false
    }
    async fn connect(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Tear down the underlying connection, if one exists.
    async fn disconnect(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// A future that resolves the next time this transport disconnects
    /// spontaneously (`spec.md` §4.1: "the transport also emits a
    /// `disconnect` event that the core subscribes to upon successful
    /// `connect`"). Called once per successful connect; the default never
    /// resolves, appropriate for transports that can't disconnect on their
    /// own.
    fn disconnect_signal(&self) -> Pin<Box<dyn Future<Output = DeviceError> + Send>> {
        Box::pin(std::future::pending())
    }

    fn supports_sending(&self) -> bool {
        false
    }
    async fn send_event(&self, _msg: OutboundMessage) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("send-event"))
    }
    async fn send_event_batch(&self, _msgs: Vec<OutboundMessage>) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("send-event-batch"))
    }

    fn supports_settlement(&self) -> bool {
        false
    }
    async fn complete(&self, _msg: InboundMessage) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("complete"))
    }
    async fn reject(&self, _msg: InboundMessage) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("reject"))
    }
    async fn abandon(&self, _msg: InboundMessage) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("abandon"))
    }

    /// Rotate the credential in use. Always implemented: every transport has
    /// *some* way to authenticate, even if it is a no-op for transports that
    /// are reconstructed per-call.
    async fn update_credential(
        &self,
        signature: &str,
    ) -> Result<CredentialUpdateOutcome, DeviceError>;

    async fn set_options(&self, _opts: TransportOptions) -> Result<(), DeviceError> {
        Ok(())
    }

    fn supports_method_responses(&self) -> bool {
        false
    }
    async fn send_method_response(&self, _resp: MethodResponse) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("send-method-response"))
    }

    /// Obtain the transport's receiver. The only non-optional operation: a
    /// transport that can't ever deliver cloud-to-device data isn't a valid
    /// transport for this controller.
    async fn get_receiver(&self) -> Result<Box<dyn Receiver>, DeviceError>;
}
