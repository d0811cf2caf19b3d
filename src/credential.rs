use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use sha2::Sha256;

use crate::error::DeviceError;

type HmacSha256 = Hmac<Sha256>;

/// How the controller authenticates with the hub, parsed out of the
/// connection string / signature handed to the factory constructors.
///
/// `X509` forbids credential rotation (`spec.md` §3, §7 *incompatible-auth*).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    SharedKey { key_name: Option<String>, key: String },
    X509,
    Token,
}

impl AuthMode {
    /// Whether this mode participates in automatic renewal (§3: "an
    /// automatic-renewal flag derived from that mode").
    pub fn supports_auto_renewal(&self) -> bool {
        matches!(self, AuthMode::SharedKey { .. })
    }
}

/// Parsed connection-string fields needed to address the hub and mint
/// signatures (`spec.md` §6, Factory surface).
#[derive(Debug, Clone)]
pub struct ConnectionStringParts {
    pub host: String,
    pub device_id: String,
    pub hub_name: String,
    pub auth: AuthMode,
}

/// Parse a `HostName=...;DeviceId=...;SharedAccessKey=...` style connection
/// string. This is a convenience shell, not part of the core state machine
/// (`spec.md` §1).
pub fn parse_connection_string(conn_str: &str) -> Result<ConnectionStringParts, DeviceError> {
    let mut host = None;
    let mut device_id = None;
    let mut shared_key = None;
    let mut key_name = None;

    for part in conn_str.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((k, v)) = part.split_once('=') else {
            return Err(DeviceError::InvalidConnectionString(format!(
                "malformed segment: '{part}'"
            )));
        };
        match k {
            "HostName" => host = Some(v.to_string()),
            "DeviceId" => device_id = Some(v.to_string()),
            "SharedAccessKey" => shared_key = Some(v.to_string()),
            "SharedAccessKeyName" => key_name = Some(v.to_string()),
            _ => {}
        }
    }

    let host =
        host.ok_or_else(|| DeviceError::InvalidConnectionString("missing HostName".into()))?;
    let device_id = device_id
        .ok_or_else(|| DeviceError::InvalidConnectionString("missing DeviceId".into()))?;
    let hub_name = host
        .split('.')
        .next()
        .ok_or_else(|| DeviceError::InvalidConnectionString("malformed HostName".into()))?
        .to_string();

    let auth = match shared_key {
        Some(key) => AuthMode::SharedKey { key_name, key },
        None => AuthMode::X509,
    };

    Ok(ConnectionStringParts { host, device_id, hub_name, auth })
}

/// Percent-decode a signature's resource URI and extract host/device-id from
/// its path segments (`spec.md` §6, Factory surface).
pub fn parse_signature_resource(signature: &str) -> Result<(String, String), DeviceError> {
    let sr = signature
        .split('&')
        .find_map(|kv| kv.strip_prefix("sr="))
        .ok_or_else(|| DeviceError::InvalidConnectionString("signature missing 'sr'".into()))?;

    let decoded = percent_decode_str(sr)
        .decode_utf8()
        .map_err(|e| DeviceError::InvalidConnectionString(e.to_string()))?;

    let mut segments = decoded.splitn(2, '/');
    let host = segments
        .next()
        .ok_or_else(|| DeviceError::InvalidConnectionString("empty resource URI".into()))?
        .to_string();
    let device_id = segments
        .next()
        .and_then(|rest| rest.split('/').nth(1))
        .unwrap_or_default()
        .to_string();

    Ok((host, device_id))
}

fn unix_seconds(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Mint a shared-access-signature valid from `now` for `lifetime`, per
/// `spec.md` §2 C3 / §6 constants (signature lifetime = 60 min).
pub fn mint_signature(
    parts: &ConnectionStringParts,
    lifetime: Duration,
    now: SystemTime,
) -> Result<String, DeviceError> {
    let AuthMode::SharedKey { key, key_name } = &parts.auth else {
        return Err(DeviceError::IncompatibleAuth);
    };

    let resource_uri = format!("{}/devices/{}", parts.host, parts.device_id);
    let encoded_uri = utf8_percent_encode(&resource_uri, NON_ALPHANUMERIC).to_string();
    let expiry = unix_seconds(now) + lifetime.as_secs();
    let to_sign = format!("{encoded_uri}\n{expiry}");

    let key_bytes = STANDARD
        .decode(key)
        .map_err(|e| DeviceError::InvalidConnectionString(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .map_err(|e| DeviceError::InvalidConnectionString(e.to_string()))?;
    mac.update(to_sign.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());
    let encoded_sig = utf8_percent_encode(&signature, NON_ALPHANUMERIC).to_string();

    let mut sas = format!("SharedAccessSignature sr={encoded_uri}&sig={encoded_sig}&se={expiry}");
    if let Some(name) = key_name {
        sas.push_str(&format!("&skn={name}"));
    }
    Ok(sas)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shared_key_connection_string() {
        let parts = parse_connection_string(
            "HostName=my-hub.azure-devices.net;DeviceId=thermostat-1;SharedAccessKey=dGVzdGtleQ==",
        )
        .unwrap();
        assert_eq!(parts.host, "my-hub.azure-devices.net");
        assert_eq!(parts.device_id, "thermostat-1");
        assert_eq!(parts.hub_name, "my-hub");
        assert!(parts.auth.supports_auto_renewal());
    }

    #[test]
    fn missing_device_id_is_rejected() {
        let err = parse_connection_string("HostName=my-hub.azure-devices.net").unwrap_err();
        assert!(matches!(err, DeviceError::InvalidConnectionString(_)));
    }

    #[test]
    fn mints_a_well_formed_signature() {
        let parts = parse_connection_string(
            "HostName=my-hub.azure-devices.net;DeviceId=d1;SharedAccessKey=dGVzdGtleQ==",
        )
        .unwrap();
        let sas = mint_signature(&parts, Duration::from_secs(3600), UNIX_EPOCH).unwrap();
        assert!(sas.starts_with("SharedAccessSignature sr="));
        assert!(sas.contains("&sig="));
        assert!(sas.contains("&se=3600"));
    }

    #[test]
    fn x509_cannot_mint_a_signature() {
        let parts = ConnectionStringParts {
            host: "h".into(),
            device_id: "d".into(),
            hub_name: "h".into(),
            auth: AuthMode::X509,
        };
        let err = mint_signature(&parts, Duration::from_secs(3600), UNIX_EPOCH).unwrap_err();
        assert!(matches!(err, DeviceError::IncompatibleAuth));
    }
}
