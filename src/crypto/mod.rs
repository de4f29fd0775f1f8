pub mod keys;
pub mod encryption;

pub use keys::*;
pub use encryption::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Tag verification failed: tampered content, wrong key or unusable IV.
    #[error("Authentication failed: wrong key or corrupted data")]
    Authentication,

    #[error("Malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("Decrypted content is not valid UTF-8")]
    InvalidUtf8,
}
