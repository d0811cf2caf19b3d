use std::{sync::Arc, time::SystemTime};

use crate::{
    credential::{mint_signature, parse_connection_string, parse_signature_resource, AuthMode},
    error::DeviceError,
    handle::ClientHandle,
    options::ClientOptions,
    transport::Transport,
};

/// Peripheral convenience constructors (`spec.md` §6, "Factory surface
/// (peripheral, specified for completeness)"). Not part of the core state
/// machine — they only parse the caller's credential and hand an initial
/// signature to the transport before binding a [`ClientHandle`] to it.
pub struct IotHubClient;

impl IotHubClient {
    /// Build a handle from a `HostName=...;DeviceId=...;SharedAccessKey=...`
    /// connection string. If the string carries a shared key, mints an
    /// initial signature valid one hour from now and passes it through
    /// [`Transport::set_options`] before the handle is returned.
    pub async fn from_connection_string(
        conn_str: &str,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Result<ClientHandle, DeviceError> {
        if conn_str.is_empty() {
            return Err(DeviceError::MissingArgument("connection-string"));
        }
        let parts = parse_connection_string(conn_str)?;

        if let AuthMode::SharedKey { .. } = &parts.auth {
            let sas = mint_signature(&parts, options.signature_lifetime, SystemTime::now())?;
            transport.update_credential(&sas).await?;
        }

        Ok(ClientHandle::new(transport, Some(parts), options))
    }

    /// Build a handle from a raw shared-access-signature, recovering the
    /// host and device id by percent-decoding its resource URI.
    ///
    /// A signature-derived handle has no cached connection string, so
    /// automatic renewal is disabled: there is no key to mint a successor
    /// signature from (`spec.md` §3, "automatic-renewal flag derived from
    /// that mode").
    pub async fn from_shared_access_signature(
        signature: &str,
        transport: Arc<dyn Transport>,
        options: ClientOptions,
    ) -> Result<ClientHandle, DeviceError> {
        if signature.is_empty() {
            return Err(DeviceError::MissingArgument("signature"));
        }
        let (_host, _device_id) = parse_signature_resource(signature)?;
        transport.update_credential(signature).await?;

        Ok(ClientHandle::new(transport, None, options))
    }
}
