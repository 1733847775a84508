//! Request/response façade over the remote sync contract.

use crate::{
    RemoteError,
    model::{RecordingId, RecordingInfo},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body of a block proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockProposal {
    /// Block index within the recording.
    pub index: u64,
    /// Block size in bytes.
    pub size: u64,
    /// Recording mime type.
    pub mime_type: String,
    /// Base64 SHA-256 of the block.
    pub digest: String,
}

/// Single-use destination for one block's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    /// Presigned URL to `PUT` the bytes to.
    pub upload_url: String,
}

/// The three remote operations the upload state machine needs.
///
/// Every call may fail transiently or definitively; callers back off on both.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Register a recording. Idempotent on the recording identifier.
    async fn register_recording(&self, info: &RecordingInfo) -> Result<(), RemoteError>;

    /// Ask for a single-use upload target for one block.
    async fn propose_block(
        &self,
        recording: &RecordingId,
        proposal: &BlockProposal,
    ) -> Result<UploadTarget, RemoteError>;

    /// Send block bytes to `target`, presenting `digest` for verification.
    async fn upload_block(
        &self,
        target: &UploadTarget,
        digest: &str,
        bytes: Vec<u8>,
    ) -> Result<(), RemoteError>;
}
