use base64::Engine;
use sha2::{Digest, Sha256};

/// Header carrying the block digest on the upload request.
pub const DIGEST_HEADER: &str = "x-amz-checksum-sha256";

/// Base64-encoded SHA-256 of a block.
pub fn block_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}
