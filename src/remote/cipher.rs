//! Encryption of sensitive payload fields before they leave the device.
//!
//! Client data is sealed with a [`PayloadCipher`] and travels base64 encoded.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::model::ClientData;

/// Symmetric cipher for payload fields.
pub trait PayloadCipher: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// # Errors
    ///
    /// Returns an error if the ciphertext can't be decrypted.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Pass-through cipher, for remotes that encrypt at the transport level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl PayloadCipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// AES-256-GCM with a random nonce per message.
///
/// Ciphertext layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// # Errors
    ///
    /// Returns [`Error::Config`] unless `key` is exactly [`KEY_SIZE`] bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| {
            Error::Config(format!(
                "encryption key must be {KEY_SIZE} bytes, got {}",
                key.len()
            ))
        })?;
        Ok(Self { cipher })
    }

    /// Key given as base64, as it appears in config.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid base64 or a wrong key length.
    pub fn from_base64(key: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(key.trim())
            .map_err(|e| Error::Config(format!("encryption key is not valid base64: {e}")))?;
        Self::new(&bytes)
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").field("key", &"[REDACTED]").finish()
    }
}

impl PayloadCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| Error::Other("client data encryption failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::Other("sealed client data is too short".to_string()));
        }
        let (nonce, body) = ciphertext.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), body)
            .map_err(|_| Error::Other("client data could not be decrypted".to_string()))
    }
}

/// Encrypt client data and encode it for the wire.
///
/// # Errors
///
/// Returns an error if serialization or encryption fails.
pub fn seal_client(client: &ClientData, cipher: &dyn PayloadCipher) -> Result<String> {
    let plaintext = serde_json::to_vec(client)?;
    Ok(STANDARD.encode(cipher.encrypt(&plaintext)?))
}

/// Decode and decrypt client data received from the wire.
///
/// # Errors
///
/// Returns an error if the value isn't valid base64, can't be decrypted or
/// doesn't hold client data.
pub fn open_client(sealed: &str, cipher: &dyn PayloadCipher) -> Result<ClientData> {
    let ciphertext = STANDARD
        .decode(sealed)
        .map_err(|e| Error::Other(format!("client data is not valid base64: {e}")))?;
    let plaintext = cipher.decrypt(&ciphertext)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Toy cipher so the tests can tell sealed from plain bytes.
    struct XorCipher(u8);

    impl PayloadCipher for XorCipher {
        fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
            Ok(plaintext.iter().map(|b| b ^ self.0).collect())
        }

        fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            self.encrypt(ciphertext)
        }
    }

    fn client() -> ClientData {
        ClientData {
            name: "Acme GmbH".into(),
            address: "Hauptstraße 1".into(),
        }
    }

    #[test]
    fn test_seal_hides_plaintext() {
        let sealed = seal_client(&client(), &XorCipher(0x5a)).unwrap();
        let plain = seal_client(&client(), &PlaintextCipher).unwrap();
        assert_ne!(sealed, plain);

        assert_eq!(open_client(&sealed, &XorCipher(0x5a)).unwrap(), client());
        assert!(open_client(&sealed, &PlaintextCipher).is_err());
    }

    #[test]
    fn test_aes_gcm_round_trip() {
        let cipher = AesGcmCipher::new(&[7u8; KEY_SIZE]).unwrap();
        let sealed = seal_client(&client(), &cipher).unwrap();
        assert_eq!(open_client(&sealed, &cipher).unwrap(), client());

        // Fresh nonce every time
        assert_ne!(sealed, seal_client(&client(), &cipher).unwrap());

        let wrong = AesGcmCipher::new(&[8u8; KEY_SIZE]).unwrap();
        assert!(open_client(&sealed, &wrong).is_err());
        assert!(open_client(&sealed, &PlaintextCipher).is_err());
    }

    #[test]
    fn test_aes_gcm_key_checks() {
        assert!(matches!(AesGcmCipher::new(&[0u8; 16]), Err(Error::Config(_))));
        assert!(matches!(
            AesGcmCipher::from_base64("not base64!"),
            Err(Error::Config(_))
        ));
        let key = STANDARD.encode([1u8; KEY_SIZE]);
        assert!(AesGcmCipher::from_base64(&key).is_ok());

        let cipher = AesGcmCipher::new(&[1u8; KEY_SIZE]).unwrap();
        assert!(cipher.decrypt(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(open_client("not base64!", &PlaintextCipher).is_err());
    }
}
