use std::{error::Error as StdError, fmt};

use thiserror::Error;

/// An opaque error surfaced by a [`crate::transport::Transport`] implementation.
///
/// Transports are free to wrap whatever underlying error type they have (an
/// MQTT client error, an AMQP link error, ...); the controller never inspects
/// the cause, it only propagates it.
#[derive(Debug)]
pub struct TransportError(Box<dyn StdError + Send + Sync + 'static>);

impl TransportError {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.0.as_ref())
    }
}

/// The stable set of error kinds the controller can report to a caller.
///
/// [`DeviceError::MissingArgument`] and [`DeviceError::WrongType`] are always
/// returned synchronously from the facade, before a [`crate::command::Command`]
/// is ever constructed. [`DeviceError::UnsupportedOperation`] is synchronous
/// wherever the facade can check the transport's capability flags itself
/// (e.g. `on_device_method`); otherwise it is discovered only once the
/// command reaches the transport and is delivered through the completion
/// sink. [`DeviceError::DuplicateRegistration`] can only be detected by the
/// subscription manager inside the actor, since only it holds the live
/// registration set — it is always delivered through the completion sink,
/// not thrown synchronously, despite being an argument-validation error in
/// spirit.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A required argument was missing or empty.
    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    /// An argument had the wrong shape (e.g. a method name that isn't a string).
    #[error("argument has the wrong type: {0}")]
    WrongType(&'static str),

    /// The bound transport does not implement the operation that was requested.
    #[error("operation not supported by the bound transport: {0}")]
    UnsupportedOperation(&'static str),

    /// A method handler was already registered under this name.
    #[error("a method handler is already registered for '{0}'")]
    DuplicateRegistration(String),

    /// Credential rotation was attempted while authenticating with x509.
    #[error("credential rotation is not supported under x509 authentication")]
    IncompatibleAuth,

    /// The transport reported a failure while servicing a request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The controller's actor task has shut down; no further commands can be serviced.
    #[error("the session controller has been closed")]
    Closed,

    /// Failed to parse a connection string or shared-access-signature.
    #[error("failed to parse connection string: {0}")]
    InvalidConnectionString(String),
}

impl DeviceError {
    pub(crate) fn transport(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::Transport(TransportError::new(err))
    }
}
