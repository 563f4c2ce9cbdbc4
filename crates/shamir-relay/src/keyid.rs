//! `getCurrentKeyId()` — a stable identifier for the server's currently
//! loaded lock keypair, so a client can detect that a key rotation
//! happened between `applyServerLock` and `removeServerLock` calls.
//!
//! A 32-bit FNV digest would also satisfy this contract when no
//! stronger hash is available, but would silently disagree with a
//! SHA-256 form across environments. This relay only ever runs on one
//! target, so it picks the SHA-256 form unconditionally.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

/// Derived from `e_s_b64u` alone: the encryption exponent is the value a
/// client-visible `applyServerLock` response is generated against, so it
/// uniquely identifies which keypair generation produced a given
/// `kek_cs`.
pub fn current_key_id(e_s_b64u: &str) -> String {
    let digest = Sha256::digest(e_s_b64u.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_deterministic_for_the_same_exponent() {
        assert_eq!(current_key_id("abc123"), current_key_id("abc123"));
    }

    #[test]
    fn key_id_changes_when_the_exponent_changes() {
        assert_ne!(current_key_id("abc123"), current_key_id("xyz789"));
    }

    #[test]
    fn key_id_is_url_safe_base64_with_no_padding() {
        let id = current_key_id("abc123");
        assert!(!id.contains('+') && !id.contains('/') && !id.contains('='));
    }
}
