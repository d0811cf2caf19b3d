use tokio::sync::watch;

/// The device-twin subsystem, treated as a black box by the controller
/// (`spec.md` §1, Out of scope; §4.6 `get-twin`).
///
/// `Twin` only borrows the controller's internal notification channel for
/// the duration of construction (`spec.md` §9, "Cyclic references"): once
/// built it holds a cheap `watch::Receiver` clone, not a reference back into
/// the controller, so there is no controller-twin reference cycle.
#[derive(Debug, Clone)]
pub struct Twin {
    device_id: String,
    credential_updates: watch::Receiver<u64>,
}

impl Twin {
    /// Constructed by the controller on `get-twin`, using its current
    /// credential-update notification channel.
    pub(crate) fn new(device_id: String, credential_updates: watch::Receiver<u64>) -> Self {
        Self { device_id, credential_updates }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// How many times the bound credential has been rotated since this twin
    /// was constructed. Stands in for the real twin subsystem's behavior of
    /// re-synchronizing reported properties after a rotation-triggered
    /// reconnect (`spec.md` §4.7, `_credential-updated`).
    pub fn credential_generation(&self) -> u64 {
        *self.credential_updates.borrow()
    }
}
