//! SHA-256 hashing and the short-fingerprint naming scheme (§4.1).
//!
//! The 16-hex-character truncation is deliberate — compactness over
//! collision resistance at astronomical entry counts — and must be
//! preserved exactly for cross-version compatibility (§4.1, §9 S6).

use sha2::{Digest, Sha256};

pub const FINGERPRINT_HEX_LEN: usize = 16;

/// The truncated hex fingerprint alone, e.g. for naming a local file before
/// handing it to `put_from_path` (§4.1).
pub fn short_fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    truncate_digest_hex(&hex::encode(digest))
}

/// Truncate a full hex digest to the naming scheme's fingerprint length.
/// Factored out of [`short_fingerprint`] so the collision-acceptance
/// behavior (two distinct full digests sharing a 16-hex prefix collapse to
/// one fingerprint) is testable without needing a real SHA-256 collision.
fn truncate_digest_hex(full_hex_digest: &str) -> String {
    full_hex_digest[..FINGERPRINT_HEX_LEN].to_string()
}

/// Compute the archive location `archives/sha256-<16hex>.tar.zst` for a
/// payload, matching exactly.
pub fn archive_location_for(data: &[u8]) -> String {
    format!("archives/sha256-{}.tar.zst", short_fingerprint(data))
}

/// `put_from_path`: the filename already encodes the hash and is reused
/// verbatim, no re-hashing (§4.1).
pub fn archive_location_from_filename(filename: &str) -> anyhow::Result<String> {
    if !filename.starts_with("sha256-") || !filename.ends_with(".tar.zst") {
        anyhow::bail!("archive filename '{filename}' does not match 'sha256-<hex>.<ext>'");
    }
    Ok(format!("archives/{filename}"))
}
