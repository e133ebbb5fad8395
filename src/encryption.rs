//! Optional transport encryption of KRPC packets.
//!
//! An encrypted packet is a bencoded envelope `{a: ciphertext, s: salt}`
//! whose plaintext is a regular KRPC message.

use std::fmt::Debug;

use serde_bencode::value::Value;
use serde_bytes::Bytes as ByteSlice;

use crate::common::{messages::internal::DHTEncrypted, validate, ID_SIZE};

/// Size of the per-packet salt, used as the AEAD nonce.
pub const SALT_SIZE: usize = 12;
/// Shortest plaintext worth decoding.
const PLAINTEXT_SIZE_MIN: usize = ID_SIZE;

/// Symmetric cipher shared by every node of a private swarm.
pub trait Cipher: Debug + Send + Sync {
    /// Encrypt `plaintext` with a fresh salt.
    fn encrypt(&self, plaintext: &[u8]) -> Option<(Vec<u8>, [u8; SALT_SIZE])>;

    fn decrypt(&self, ciphertext: &[u8], salt: &[u8; SALT_SIZE]) -> Option<Vec<u8>>;
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// Reasons for dropping an encrypted packet.
pub enum EnvelopeError {
    #[error("Envelope is not a dictionary")]
    NotADictionary,

    #[error("Salt missing or broken")]
    Salt,

    #[error("Ciphertext missing or broken")]
    Ciphertext,

    #[error("Decryption failed")]
    Decryption,

    #[error("Plaintext contains less than {PLAINTEXT_SIZE_MIN} bytes")]
    TooSmall,

    #[error("Plaintext is not valid bencode")]
    Malformed,
}

/// Encrypt an encoded message into an envelope.
pub fn seal(cipher: &dyn Cipher, plaintext: &[u8]) -> Option<Vec<u8>> {
    let (ciphertext, salt) = cipher.encrypt(plaintext)?;

    let envelope = DHTEncrypted {
        ciphertext: ByteSlice::new(&ciphertext),
        salt: ByteSlice::new(&salt),
    };

    serde_bencode::to_bytes(&envelope).ok()
}

/// Decrypt an envelope that already passed [validate], returning a plaintext
/// that passed it too.
pub fn open(cipher: &dyn Cipher, bytes: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = match serde_bencode::from_bytes::<Value>(bytes) {
        Ok(Value::Dict(dict)) => dict,
        _ => return Err(EnvelopeError::NotADictionary),
    };

    let salt: [u8; SALT_SIZE] = match envelope.get(b"s".as_slice()) {
        Some(Value::Bytes(salt)) => salt
            .as_slice()
            .try_into()
            .map_err(|_| EnvelopeError::Salt)?,
        _ => return Err(EnvelopeError::Salt),
    };

    let ciphertext = match envelope.get(b"a".as_slice()) {
        Some(Value::Bytes(ciphertext)) if ciphertext.len() > 2 => ciphertext,
        _ => return Err(EnvelopeError::Ciphertext),
    };

    let plaintext = cipher
        .decrypt(ciphertext, &salt)
        .ok_or(EnvelopeError::Decryption)?;

    if plaintext.len() < PLAINTEXT_SIZE_MIN {
        return Err(EnvelopeError::TooSmall);
    }
    if !validate(&plaintext) {
        return Err(EnvelopeError::Malformed);
    }

    Ok(plaintext)
}

#[cfg(feature = "encryption")]
pub use aes::AesGcmCipher;

#[cfg(feature = "encryption")]
mod aes {
    use aes_gcm::{
        aead::{Aead, KeyInit},
        Aes256Gcm, Nonce,
    };
    use sha2::{Digest, Sha256};

    use super::{Cipher, SALT_SIZE};

    /// AES-256-GCM keyed with the SHA-256 of a shared passphrase.
    pub struct AesGcmCipher {
        cipher: Aes256Gcm,
    }

    impl AesGcmCipher {
        pub fn new(passphrase: &str) -> Self {
            let key = Sha256::digest(passphrase.as_bytes());

            AesGcmCipher {
                cipher: Aes256Gcm::new(&key),
            }
        }
    }

    impl std::fmt::Debug for AesGcmCipher {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "AesGcmCipher (_)")
        }
    }

    impl Cipher for AesGcmCipher {
        fn encrypt(&self, plaintext: &[u8]) -> Option<(Vec<u8>, [u8; SALT_SIZE])> {
            let salt: [u8; SALT_SIZE] = rand::random();

            let ciphertext = self
                .cipher
                .encrypt(Nonce::from_slice(&salt), plaintext)
                .ok()?;

            Some((ciphertext, salt))
        }

        fn decrypt(&self, ciphertext: &[u8], salt: &[u8; SALT_SIZE]) -> Option<Vec<u8>> {
            self.cipher
                .decrypt(Nonce::from_slice(salt), ciphertext)
                .ok()
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;
        use crate::encryption::{open, seal, EnvelopeError};

        const PING: &[u8] = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t4:aaaa1:y1:qe";

        #[test]
        fn envelope_round_trip() {
            let cipher = AesGcmCipher::new("secret");

            let sealed = seal(&cipher, PING).unwrap();
            assert!(crate::common::validate(&sealed));
            assert_eq!(open(&cipher, &sealed).unwrap(), PING);
        }

        #[test]
        fn wrong_passphrase() {
            let sealed = seal(&AesGcmCipher::new("secret"), PING).unwrap();

            assert_eq!(
                open(&AesGcmCipher::new("other"), &sealed),
                Err(EnvelopeError::Decryption)
            );
        }
    }
}
