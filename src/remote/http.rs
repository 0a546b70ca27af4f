//! HTTP remote record store.
//!
//! Endpoints, relative to the configured base URL:
//!
//! - `GET /records/{id}` (404 = absent)
//! - `POST /records`
//! - `PUT /records/{id}` with `If-Match: <version>` (412 = precondition failed)
//! - `DELETE /records/{id}` (404 = already gone)
//! - `GET /health`
//!
//! Every request carries a bearer token. Client data is sealed with the
//! configured [`PayloadCipher`] before it is sent: AES-256-GCM when an
//! encryption key is configured, otherwise plain base64.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::model::{InvoicePayload, LineItem};

use super::auth::{SignedTokenIssuer, StaticCredential, TokenIssuer};
use super::cipher::{open_client, seal_client, AesGcmCipher, PayloadCipher, PlaintextCipher};
use super::store::{RemoteRecord, RemoteStore};

/// Record body as it travels over HTTP.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    id: String,
    version: i64,
    created_at: i64,
    modified_at: i64,
    checksum: String,
    invoice_number: String,
    invoice_date: String,
    /// Sealed [`crate::model::ClientData`], base64
    client: String,
    line_items: Vec<LineItem>,
    total_amount: i64,
}

/// Body of a 412 response, when the server includes one.
#[derive(Debug, Deserialize)]
struct PreconditionBody {
    version: i64,
}

/// Remote store over HTTP.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    auth: Box<dyn TokenIssuer>,
    subject: String,
    cipher: Box<dyn PayloadCipher>,
}

impl HttpRemote {
    /// Create a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the HTTP client can't be built.
    pub fn new(
        base_url: &str,
        auth: Box<dyn TokenIssuer>,
        subject: &str,
        cipher: Box<dyn PayloadCipher>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            subject: subject.to_string(),
            cipher,
        })
    }

    /// Build from configuration.
    ///
    /// A configured token is sent as-is; otherwise tokens are signed per
    /// subject with the signing key. Client data is encrypted when an
    /// encryption key is set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no remote URL or credential is configured,
    /// or the encryption key is unusable.
    pub fn from_config(config: &SyncConfig, subject: &str) -> Result<Self> {
        let url = config.remote_url.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "no remote configured (set remote_url or {})",
                crate::config::REMOTE_URL_ENV
            ))
        })?;
        let auth: Box<dyn TokenIssuer> = match (&config.token, &config.signing_key) {
            (Some(token), _) => Box::new(StaticCredential::new(token.clone(), subject)),
            (None, Some(key)) => Box::new(SignedTokenIssuer::new(key.clone())),
            (None, None) => {
                return Err(Error::Config(format!(
                    "no remote credential configured (set token or {}, or signing_key or {})",
                    crate::config::TOKEN_ENV,
                    crate::config::SIGNING_KEY_ENV
                )));
            }
        };

        let cipher: Box<dyn PayloadCipher> = match &config.encryption_key {
            Some(key) => Box::new(AesGcmCipher::from_base64(key)?),
            None => Box::new(PlaintextCipher),
        };

        Self::new(url, auth, subject, cipher, config.request_timeout())
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.issue(&self.subject)?))
    }

    fn to_wire(&self, record: &RemoteRecord) -> Result<WireRecord> {
        Ok(WireRecord {
            id: record.id.clone(),
            version: record.version,
            created_at: record.created_at,
            modified_at: record.modified_at,
            checksum: record.checksum.clone(),
            invoice_number: record.payload.invoice_number.clone(),
            invoice_date: record.payload.invoice_date.clone(),
            client: seal_client(&record.payload.client, self.cipher.as_ref())?,
            line_items: record.payload.line_items.clone(),
            total_amount: record.payload.total_amount,
        })
    }

    fn from_wire(&self, wire: WireRecord) -> Result<RemoteRecord> {
        let client = open_client(&wire.client, self.cipher.as_ref())?;
        Ok(RemoteRecord {
            id: wire.id,
            version: wire.version,
            created_at: wire.created_at,
            modified_at: wire.modified_at,
            checksum: wire.checksum,
            payload: InvoicePayload {
                invoice_number: wire.invoice_number,
                invoice_date: wire.invoice_date,
                client,
                line_items: wire.line_items,
                total_amount: wire.total_amount,
            },
        })
    }

    async fn read_record(&self, response: reqwest::Response) -> Result<RemoteRecord> {
        let wire: WireRecord = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("malformed remote record: {e}")))?;
        self.from_wire(wire)
    }
}

impl RemoteStore for HttpRemote {
    async fn fetch(&self, id: &str) -> Result<Option<RemoteRecord>> {
        let response = self
            .client
            .get(self.url(&format!("/records/{id}")))
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(classify_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, id, None).await?;
        self.read_record(response).await.map(Some)
    }

    async fn create(&self, record: &RemoteRecord) -> Result<RemoteRecord> {
        let body = self.to_wire(record)?;
        let response = self
            .client
            .post(self.url("/records"))
            .header("Authorization", self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = check_status(response, &record.id, None).await?;
        self.read_record(response).await
    }

    async fn update(&self, record: &RemoteRecord, if_match: i64) -> Result<RemoteRecord> {
        let body = self.to_wire(record)?;
        let response = self
            .client
            .put(self.url(&format!("/records/{}", record.id)))
            .header("Authorization", self.bearer()?)
            .header("If-Match", if_match.to_string())
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = check_status(response, &record.id, Some(if_match)).await?;
        self.read_record(response).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/records/{id}")))
            .header("Authorization", self.bearer()?)
            .send()
            .await
            .map_err(classify_send_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, id, None).await?;
        Ok(())
    }

    async fn health(&self) -> bool {
        let Ok(bearer) = self.bearer() else {
            return false;
        };
        match self
            .client
            .get(self.url("/health"))
            .header("Authorization", bearer)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

/// Pass successful responses through, turn the rest into errors.
async fn check_status(
    response: reqwest::Response,
    id: &str,
    if_match: Option<i64>,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status.as_u16(), &body, id, if_match))
}

fn classify_send_error(err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::Config(format!("invalid remote request: {err}"))
    } else {
        // Timeouts, refused connections, resets
        Error::TransientNetwork(err.to_string())
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn classify_status(status: u16, body: &str, id: &str, if_match: Option<i64>) -> Error {
    match status {
        412 => {
            let expected = if_match.unwrap_or_default();
            let actual = serde_json::from_str::<PreconditionBody>(body)
                .map(|b| b.version)
                .unwrap_or_default();
            Error::VersionConflict {
                id: id.to_string(),
                expected,
                actual,
            }
        }
        408 | 429 | 500..=599 => Error::TransientNetwork(format!("remote returned {status}")),
        _ => Error::Remote {
            status,
            message: if body.is_empty() {
                "no details".to_string()
            } else {
                body.chars().take(200).collect()
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClientData;
    use crate::sync::compute_checksum;

    fn remote() -> HttpRemote {
        HttpRemote::new(
            "http://localhost:9/",
            Box::new(StaticCredential::new("t", "tester")),
            "tester",
            Box::new(PlaintextCipher),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(503, "", "r1", None),
            Error::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(429, "", "r1", None),
            Error::TransientNetwork(_)
        ));
        assert!(matches!(
            classify_status(400, "bad total", "r1", None),
            Error::Remote { status: 400, ref message } if message == "bad total"
        ));

        match classify_status(412, r#"{"version":7}"#, "r1", Some(4)) {
            Error::VersionConflict {
                expected, actual, ..
            } => assert_eq!((expected, actual), (4, 7)),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(classify_status(412, "", "r1", Some(4)).is_retryable());
        assert!(!classify_status(422, "", "r1", None).is_retryable());
    }

    #[test]
    fn test_wire_round_trip_seals_client() {
        let remote = remote();
        assert_eq!(remote.base_url(), "http://localhost:9");

        let payload = InvoicePayload::new(
            "INV-1",
            "2025-01-20",
            ClientData {
                name: "Acme".into(),
                address: "1 Road".into(),
            },
            vec![LineItem::new(1, "Widgets", 2, 50)],
        );
        let record = RemoteRecord {
            id: "r1".into(),
            version: 3,
            created_at: 1,
            modified_at: 2,
            checksum: compute_checksum(&payload),
            payload,
        };

        let wire = remote.to_wire(&record).unwrap();
        assert!(!wire.client.contains("Acme"));

        let json = serde_json::to_string(&wire).unwrap();
        let parsed: WireRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(remote.from_wire(parsed).unwrap(), record);
    }

    #[test]
    fn test_from_config_requires_remote() {
        let config = SyncConfig::default();
        assert!(matches!(
            HttpRemote::from_config(&config, "me"),
            Err(Error::Config(_))
        ));

        let config = SyncConfig {
            remote_url: Some("http://example.invalid".into()),
            ..SyncConfig::default()
        };
        assert!(matches!(
            HttpRemote::from_config(&config, "me"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_encryption_key_seals_client_data() {
        use base64::Engine as _;

        let key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        let config = SyncConfig {
            remote_url: Some("http://example.invalid".into()),
            token: Some("t".into()),
            encryption_key: Some(key.clone()),
            ..SyncConfig::default()
        };
        let remote = HttpRemote::from_config(&config, "me").unwrap();

        let payload = InvoicePayload::new(
            "INV-2",
            "2025-01-21",
            ClientData {
                name: "Acme".into(),
                address: "1 Road".into(),
            },
            vec![LineItem::new(1, "Widgets", 1, 50)],
        );
        let record = RemoteRecord {
            id: "r2".into(),
            version: 1,
            created_at: 1,
            modified_at: 1,
            checksum: compute_checksum(&payload),
            payload,
        };

        let wire = remote.to_wire(&record).unwrap();
        assert!(open_client(&wire.client, &PlaintextCipher).is_err());
        let reader = AesGcmCipher::from_base64(&key).unwrap();
        assert_eq!(open_client(&wire.client, &reader).unwrap(), record.payload.client);
        assert_eq!(remote.from_wire(wire).unwrap(), record);

        let bad = SyncConfig {
            encryption_key: Some("c2hvcnQ=".into()),
            ..config
        };
        assert!(matches!(
            HttpRemote::from_config(&bad, "me"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_signing_key_issues_per_subject_tokens() {
        let config = SyncConfig {
            remote_url: Some("http://example.invalid/".into()),
            signing_key: Some("shared".into()),
            ..SyncConfig::default()
        };
        let remote = HttpRemote::from_config(&config, "agent-7").unwrap();
        assert_eq!(remote.base_url(), "http://example.invalid");

        let header = remote.bearer().unwrap();
        let token = header.strip_prefix("Bearer ").unwrap();
        assert_eq!(
            SignedTokenIssuer::new("shared").verify(token).as_deref(),
            Some("agent-7")
        );
    }
}
