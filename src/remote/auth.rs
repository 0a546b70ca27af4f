//! Bearer credentials for the remote.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks bearer tokens.
pub trait TokenIssuer: Send + Sync {
    /// Token to present on behalf of `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if no token can be produced.
    fn issue(&self, subject: &str) -> Result<String>;

    /// The subject a token was issued for, or `None` if it isn't valid.
    fn verify(&self, token: &str) -> Option<String>;
}

/// A pre-shared token, e.g. from `INVSYNC_TOKEN`.
#[derive(Debug, Clone)]
pub struct StaticCredential {
    token: String,
    subject: String,
}

impl StaticCredential {
    #[must_use]
    pub fn new(token: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            subject: subject.into(),
        }
    }
}

impl TokenIssuer for StaticCredential {
    fn issue(&self, _subject: &str) -> Result<String> {
        if self.token.is_empty() {
            return Err(Error::Config("remote token is empty".to_string()));
        }
        Ok(self.token.clone())
    }

    fn verify(&self, token: &str) -> Option<String> {
        (!self.token.is_empty() && token == self.token).then(|| self.subject.clone())
    }
}

/// Tokens of the form `<subject>.<signature>`, signed with a shared secret.
///
/// Both parts are base64url encoded; the signature is the HMAC-SHA256 of the
/// subject under the secret.
#[derive(Debug, Clone)]
pub struct SignedTokenIssuer {
    secret: String,
}

impl SignedTokenIssuer {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, subject: &str) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("unusable signing key: {e}")))?;
        mac.update(subject.as_bytes());
        Ok(mac)
    }
}

impl TokenIssuer for SignedTokenIssuer {
    fn issue(&self, subject: &str) -> Result<String> {
        if subject.is_empty() {
            return Err(Error::InvalidArgument("token subject is empty".to_string()));
        }
        let tag = self.mac(subject)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(subject),
            URL_SAFE_NO_PAD.encode(tag)
        ))
    }

    fn verify(&self, token: &str) -> Option<String> {
        let (encoded, signature) = token.split_once('.')?;
        let subject = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).ok()?).ok()?;
        let tag = URL_SAFE_NO_PAD.decode(signature).ok()?;
        // Constant-time comparison
        self.mac(&subject).ok()?.verify_slice(&tag).ok()?;
        Some(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credential() {
        let cred = StaticCredential::new("s3cret", "alice");
        assert_eq!(cred.issue("anyone").unwrap(), "s3cret");
        assert_eq!(cred.verify("s3cret").as_deref(), Some("alice"));
        assert_eq!(cred.verify("guess"), None);

        assert!(StaticCredential::new("", "alice").issue("alice").is_err());
    }

    #[test]
    fn test_signed_token_round_trip_and_tamper() {
        let issuer = SignedTokenIssuer::new("key");
        let token = issuer.issue("agent-1").unwrap();
        assert_eq!(issuer.verify(&token).as_deref(), Some("agent-1"));

        let other = SignedTokenIssuer::new("other-key");
        assert_eq!(other.verify(&token), None);

        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode("admin"), "00");
        assert_eq!(issuer.verify(&forged), None);
        assert_eq!(issuer.verify("no-dot"), None);
    }

    #[test]
    fn test_signature_is_hmac_of_subject() {
        use sha2::{Digest, Sha256};

        let token = SignedTokenIssuer::new("key").issue("agent").unwrap();
        let (_, signature) = token.split_once('.').unwrap();
        let tag = URL_SAFE_NO_PAD.decode(signature).unwrap();

        let mut expected = HmacSha256::new_from_slice(b"key").unwrap();
        expected.update(b"agent");
        expected.verify_slice(&tag).unwrap();

        // Not a bare hash of secret and subject
        let prefixed = Sha256::digest(b"key.agent");
        assert_ne!(tag.as_slice(), prefixed.as_slice());
    }

    #[test]
    fn test_swapped_subject_fails_verification() {
        let issuer = SignedTokenIssuer::new("key");
        let token = issuer.issue("agent").unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let swapped = format!("{}.{signature}", URL_SAFE_NO_PAD.encode("admin"));
        assert_eq!(issuer.verify(&swapped), None);
    }
}
