//! PKCE material for the account-service login flow. Lengths mirror the web
//! player: 21-char base64url verifier and state, 64-char hex challenge.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const VERIFIER_LEN: usize = 21;
pub const CHALLENGE_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct PkceAuthorization {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkceAuthorization {
    pub fn generate() -> Self {
        let verifier = random_urlsafe(VERIFIER_LEN);
        let challenge = challenge_for(&verifier);
        let state = random_urlsafe(VERIFIER_LEN);
        Self {
            verifier,
            challenge,
            state,
        }
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
    encoded.truncate(len);
    encoded
}

/// S256 challenge, hex-encoded (the account service expects hex, not the
/// RFC 7636 base64url form).
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_has_expected_lengths() {
        let pkce = PkceAuthorization::generate();
        assert_eq!(pkce.verifier.len(), VERIFIER_LEN);
        assert_eq!(pkce.state.len(), VERIFIER_LEN);
        assert_eq!(pkce.challenge.len(), CHALLENGE_LEN);
        assert!(pkce.challenge.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn challenge_is_deterministic_for_verifier() {
        assert_eq!(challenge_for("abc"), challenge_for("abc"));
        assert_ne!(challenge_for("abc"), challenge_for("abd"));
    }

    #[test]
    fn verifier_and_state_differ() {
        let pkce = PkceAuthorization::generate();
        assert_ne!(pkce.verifier, pkce.state);
    }
}
