use aes_gcm::aead::consts::U16;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::aes::Aes256;
use aes_gcm::{Aes256Gcm, AesGcm, Key, Nonce};
use serde::{Deserialize, Serialize};

use super::keys::ContentKey;
use super::CryptoError;

/// Standard GCM nonce length.
pub const NONCE_LENGTH: usize = 12;

/// IV length used by the journal service when it encrypts entries.
pub const LONG_NONCE_LENGTH: usize = 16;

/// AES-GCM authentication tag length.
pub const TAG_LENGTH: usize = 16;

/// AES-256-GCM with a 16-byte IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Encrypted journal content as stored by the journal service.
///
/// Every field is hex. The ciphertext and tag are stored apart and have to
/// be joined before decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub iv: String,
    pub content: String,
    pub tag: String,
}

impl EncryptedBlob {
    /// Decrypt into UTF-8 text using AES-256-GCM without associated data.
    pub fn decrypt(&self, key: &ContentKey) -> Result<String, CryptoError> {
        let iv = decode_field("iv", &self.iv)?;
        let mut payload = decode_field("content", &self.content)?;
        let tag = decode_field("tag", &self.tag)?;

        if tag.len() != TAG_LENGTH {
            return Err(CryptoError::Authentication);
        }
        payload.extend_from_slice(&tag);

        let plaintext = match iv.len() {
            NONCE_LENGTH => {
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
                cipher.decrypt(Nonce::from_slice(&iv), payload.as_ref())
            }
            LONG_NONCE_LENGTH => {
                let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes()));
                cipher.decrypt(Nonce::<U16>::from_slice(&iv), payload.as_ref())
            }
            _ => return Err(CryptoError::Authentication),
        }
        .map_err(|_| CryptoError::Authentication)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    /// Encrypt `plaintext` with a caller-chosen IV (12 or 16 bytes).
    ///
    /// Mirrors the journal service's encryption so entries can be seeded
    /// locally.
    pub fn encrypt_with_iv(
        key: &ContentKey,
        iv: &[u8],
        plaintext: &str,
    ) -> Result<Self, CryptoError> {
        let mut sealed = match iv.len() {
            NONCE_LENGTH => {
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
                cipher.encrypt(Nonce::from_slice(iv), plaintext.as_bytes())
            }
            LONG_NONCE_LENGTH => {
                let cipher = Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key.as_bytes()));
                cipher.encrypt(Nonce::<U16>::from_slice(iv), plaintext.as_bytes())
            }
            _ => return Err(CryptoError::EncryptionFailed),
        }
        .map_err(|_| CryptoError::EncryptionFailed)?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LENGTH);

        Ok(Self {
            iv: hex::encode(iv),
            content: hex::encode(sealed),
            tag: hex::encode(tag),
        })
    }

    /// Encrypt with a random 16-byte IV, as the journal service does.
    pub fn encrypt(key: &ContentKey, plaintext: &str) -> Result<Self, CryptoError> {
        let mut iv = [0u8; LONG_NONCE_LENGTH];
        OsRng.fill_bytes(&mut iv);
        Self::encrypt_with_iv(key, &iv, plaintext)
    }
}

/// Decrypt a journal blob with the content key.
pub fn decrypt(blob: &EncryptedBlob, key: &ContentKey) -> Result<String, CryptoError> {
    blob.decrypt(key)
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value).map_err(|e| CryptoError::MalformedBlob(format!("{name}: {e}")))
}
