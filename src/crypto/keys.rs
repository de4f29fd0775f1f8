use sha2::{Digest, Sha256};
use zeroize::Zeroize;

pub const KEY_LENGTH: usize = 32; // AES-256

/// Length of a secret that is already a hex-encoded raw key.
const HEX_KEY_LENGTH: usize = KEY_LENGTH * 2;

/// Content encryption key shared with the journal service. Zeroed on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct ContentKey {
    pub(super) key_bytes: [u8; KEY_LENGTH],
}

impl ContentKey {
    /// Derive the key the producer used for a shared secret.
    ///
    /// A secret of exactly 64 hex characters is the raw key; any other
    /// secret is hashed with SHA-256.
    pub fn from_secret(secret: &str) -> Self {
        let mut key_bytes = [0u8; KEY_LENGTH];

        if is_hex_key(secret) && hex::decode_to_slice(secret, &mut key_bytes).is_ok() {
            return Self { key_bytes };
        }

        let digest = Sha256::digest(secret.as_bytes());
        key_bytes.copy_from_slice(&digest);
        Self { key_bytes }
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(key_bytes: [u8; KEY_LENGTH]) -> Self {
        Self { key_bytes }
    }

    /// Access the raw key bytes (internal use only)
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key_bytes
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ContentKey([redacted])")
    }
}

fn is_hex_key(secret: &str) -> bool {
    secret.len() == HEX_KEY_LENGTH && secret.bytes().all(|b| b.is_ascii_hexdigit())
}
