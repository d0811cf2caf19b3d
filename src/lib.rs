//! Device-side session controller for an IoT hub client.
//!
//! A device process holds one [`ClientHandle`], bound at construction to a
//! [`Transport`] implementation. The handle brokers all interaction with the
//! remote hub: telemetry submission, cloud-to-device message reception,
//! direct-method invocation, device-twin acquisition, settlement of
//! received messages, and credential rotation. Everything that orders those
//! operations against an asynchronous, fallible connection lifecycle lives
//! in [`controller`], driven by a single actor task so the state machine
//! itself never needs locking.
//!
//! This crate does not implement a wire protocol, persist messages across
//! restarts, retry failed transport operations beyond the single reconnect
//! a credential rotation can trigger, or multiplex several devices. Bring
//! your own [`Transport`] and [`Receiver`].

mod blob;
mod command;
mod controller;
mod credential;
mod error;
mod factory;
mod handle;
mod options;
mod receiver;
mod state;
mod subscription;
mod transport;
mod twin;

pub use blob::{BlobUploadPeer, NoopBlobUploadPeer};
pub use command::SasUpdateResult;
pub use controller::ControllerEvent;
pub use credential::{
    mint_signature, parse_connection_string, parse_signature_resource, AuthMode,
    ConnectionStringParts,
};
pub use error::{DeviceError, TransportError};
pub use factory::IotHubClient;
pub use handle::ClientHandle;
pub use options::{ClientOptions, DEFAULT_SAS_RENEWAL_INTERVAL, DEFAULT_SIGNATURE_LIFETIME};
pub use receiver::{RawMethodInvocation, Receiver, ReceiverEvent};
pub use state::SessionState;
pub use subscription::{MethodHandlerFn, MethodRequest, MethodResponder};
pub use transport::{
    CredentialUpdateOutcome, InboundMessage, MethodResponse, OutboundMessage, Transport,
    TransportOptions,
};
pub use twin::Twin;
