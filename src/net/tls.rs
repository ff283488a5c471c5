//! TLS material for the WebTransport endpoint.
//!
//! Production deployments point TLS_CERT_PATH / TLS_KEY_PATH at real PEM
//! files. Development falls back to a self-signed certificate generated
//! into the certs directory; browsers accept it through the
//! serverCertificateHashes mechanism, which is why validity is capped at
//! fourteen days.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::env;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::info;
use wtransport::Identity;

/// Browser cap for serverCertificateHashes certificates
const DEV_CERT_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for the WebTransport server
pub struct TlsConfig {
    /// The wtransport Identity containing certificate and key
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate, for client configuration
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load from env-specified paths, an existing certs directory, or
    /// generate a fresh self-signed dev certificate
    pub async fn load_or_generate(certs_dir: &str) -> Result<Self> {
        if let (Ok(cert_path), Ok(key_path)) = (env::var("TLS_CERT_PATH"), env::var("TLS_KEY_PATH"))
        {
            info!("loading TLS certificate from environment paths");
            return Self::load_from_paths(&cert_path, &key_path).await;
        }

        let cert_file = format!("{}/cert.pem", certs_dir);
        let key_file = format!("{}/key.pem", certs_dir);
        if Path::new(&cert_file).exists() && Path::new(&key_file).exists() {
            info!("loading dev certificate from {}", certs_dir);
            return Self::load_from_paths(&cert_file, &key_file).await;
        }

        info!("generating self-signed dev certificate in {}", certs_dir);
        Self::generate_dev_cert(certs_dir, &cert_file, &key_file)?;
        Self::load_from_paths(&cert_file, &key_file).await
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("failed to load certificate from PEM files")?;

        let cert_hash = Self::compute_cert_hash(&identity);
        info!("certificate hash: {}", cert_hash);
        Ok(Self {
            identity,
            cert_hash,
        })
    }

    fn generate_dev_cert(certs_dir: &str, cert_file: &str, key_file: &str) -> Result<()> {
        std::fs::create_dir_all(certs_dir)
            .with_context(|| format!("creating certs dir {}", certs_dir))?;

        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "AdLands Dev");
        let now = SystemTime::now();
        params.not_before = now.into();
        params.not_after = (now + DEV_CERT_VALIDITY).into();

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        std::fs::write(cert_file, cert.pem()).context("writing dev certificate")?;
        std::fs::write(key_file, key_pair.serialize_pem()).context("writing dev key")?;
        Ok(())
    }

    fn compute_cert_hash(identity: &Identity) -> String {
        identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| {
                let hash = digest(&SHA256, cert.der());
                STANDARD.encode(hash.as_ref())
            })
            .unwrap_or_default()
    }

    pub fn get_cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_certs_dir() -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static N: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "adlands-certs-{}-{}",
            std::process::id(),
            N.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_generate_and_load() {
        let dir = temp_certs_dir();
        let config = TlsConfig::load_or_generate(&dir).await.unwrap();
        assert!(!config.cert_hash.is_empty());
        // SHA-256 is 32 bytes
        assert_eq!(STANDARD.decode(&config.cert_hash).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_reload_keeps_same_hash() {
        let dir = temp_certs_dir();
        let first = TlsConfig::load_or_generate(&dir).await.unwrap();
        let second = TlsConfig::load_or_generate(&dir).await.unwrap();
        assert_eq!(first.cert_hash, second.cert_hash);
    }
}
