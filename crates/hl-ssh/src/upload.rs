//! Public key registration over HTTPS

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;

use hl_core::traits::KeyUploader;
use hl_core::{Host, ProvisioningError, PublicKeyInfo};

/// Path of the key registration endpoint on each host
pub const DEFAULT_KEYS_PATH: &str = "/api/ssh-keys";

/// Request body for key registration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterKey<'a> {
    public_key: &'a str,
    fingerprint: &'a str,
    /// Name of this machine, shown on the host's key list
    device: String,
}

/// Posts public keys to `<host>/api/ssh-keys` with the host's credential
#[derive(Debug, Clone)]
pub struct HttpKeyUploader {
    client: reqwest::Client,
    path: String,
}

impl HttpKeyUploader {
    /// Create an uploader whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hostlink/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            path: DEFAULT_KEYS_PATH.to_string(),
        })
    }

    /// Registration URL for `host`; bare addresses are reached over HTTPS
    pub fn endpoint(&self, host: &Host) -> String {
        let base = host.address.trim().trim_end_matches('/');
        if base.contains("://") {
            format!("{}{}", base, self.path)
        } else {
            format!("https://{}{}", base, self.path)
        }
    }
}

#[async_trait]
impl KeyUploader for HttpKeyUploader {
    async fn upload(&self, host: &Host, key: &PublicKeyInfo) -> Result<(), ProvisioningError> {
        let url = self.endpoint(host);
        let body = RegisterKey {
            public_key: &key.openssh,
            fingerprint: &key.fingerprint,
            device: whoami::devicename(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(credential) = &host.credential {
            request = request.bearer_auth(credential);
        }

        tracing::debug!("Uploading key {} to {}", key.fingerprint, url);
        let response = request
            .send()
            .await
            .map_err(|e| ProvisioningError::Network(format!("{}: {}", url, e)))?;

        classify(response.status())
    }
}

/// Map the registration response onto provisioning outcomes
fn classify(status: StatusCode) -> Result<(), ProvisioningError> {
    match status {
        s if s.is_success() => Ok(()),
        // Already registered
        StatusCode::CONFLICT => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ProvisioningError::UploadRejected(status.to_string()))
        }
        s => Err(ProvisioningError::Network(format!("unexpected response {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults_to_https() {
        let uploader = HttpKeyUploader::new(Duration::from_secs(5)).unwrap();
        assert_eq!(
            uploader.endpoint(&Host::new("Work", "sync.example.com/")),
            "https://sync.example.com/api/ssh-keys"
        );
        assert_eq!(
            uploader.endpoint(&Host::new("Local", "http://127.0.0.1:8080")),
            "http://127.0.0.1:8080/api/ssh-keys"
        );
    }

    #[test]
    fn test_classify_responses() {
        assert!(classify(StatusCode::CREATED).is_ok());
        assert!(classify(StatusCode::CONFLICT).is_ok());
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED),
            Err(ProvisioningError::UploadRejected(_))
        ));
        assert!(matches!(
            classify(StatusCode::FORBIDDEN),
            Err(ProvisioningError::UploadRejected(_))
        ));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY),
            Err(ProvisioningError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_a_network_error() {
        let uploader = HttpKeyUploader::new(Duration::from_secs(2)).unwrap();
        let host = Host::new("Nowhere", "http://127.0.0.1:1");
        let key = PublicKeyInfo {
            openssh: "ssh-ed25519 AAAA hostlink".into(),
            fingerprint: "SHA256:abc".into(),
            private_key_path: "/keys/abc".into(),
        };
        assert!(matches!(
            uploader.upload(&host, &key).await,
            Err(ProvisioningError::Network(_))
        ));
    }
}
