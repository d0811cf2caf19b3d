use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::DeviceError;

/// The blob-upload peer: out of scope for the core (`spec.md` §1), but a
/// collaborator the state machine must notify on credential rotation
/// (`spec.md` §4.6 `update-credential`: "propagate to blob-upload peer").
#[async_trait]
pub trait BlobUploadPeer: Debug + Send + Sync {
    /// Forward a freshly minted signature so the peer's own client stays in sync.
    async fn update_credential(&self, signature: &str);

    /// Upload a blob, delegating wholesale to the peer (`spec.md` §6 `upload-to-blob`).
    async fn upload(
        &self,
        blob_name: &str,
        data: Vec<u8>,
        length: u64,
    ) -> Result<(), DeviceError>;
}

/// A peer that has never been configured; every operation fails with
/// [`DeviceError::UnsupportedOperation`]. Used when a controller is built
/// without a blob-upload collaborator.
#[derive(Debug, Default)]
pub struct NoopBlobUploadPeer;

#[async_trait]
impl BlobUploadPeer for NoopBlobUploadPeer {
    async fn update_credential(&self, _signature: &str) {}

    async fn upload(
        &self,
        _blob_name: &str,
        _data: Vec<u8>,
        _length: u64,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::UnsupportedOperation("upload-to-blob"))
    }
}
