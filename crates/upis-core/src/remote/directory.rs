use crate::RemoteError;

use async_trait::async_trait;

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id; local state is kept per owner.
    pub owner_id: String,
    /// Bands the caller belongs to.
    pub band_ids: Vec<String>,
}

/// Session and band directory lookups.
///
/// Failures are not retried: the engine cannot run without an identity.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Verify the caller and return who they are.
    async fn verify_identity(&self) -> Result<Identity, RemoteError>;

    /// Whether the caller may record for `band_id`.
    async fn is_band_member(&self, band_id: &str) -> Result<bool, RemoteError>;
}
