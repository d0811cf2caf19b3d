use std::time::Duration;

/// `sas-renewal-interval` from `spec.md` §6 Constants: 45 minutes.
pub const DEFAULT_SAS_RENEWAL_INTERVAL: Duration = Duration::from_millis(2_700_000);

/// Signature lifetime from `spec.md` §6 Constants: 60 minutes.
pub const DEFAULT_SIGNATURE_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Construction-time options for a [`crate::handle::ClientHandle`].
///
/// `spec.md` §9 calls the renewal interval and signature lifetime "compile
/// time configurable per build but [with] no per-instance mutation path" —
/// we resolve that open question by making them overridable at construction
/// only (not mutable afterwards), so tests can use short intervals without
/// needing a compile-time feature flag. See `DESIGN.md`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub sas_renewal_interval: Duration,
    pub signature_lifetime: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            sas_renewal_interval: DEFAULT_SAS_RENEWAL_INTERVAL,
            signature_lifetime: DEFAULT_SIGNATURE_LIFETIME,
        }
    }
}
