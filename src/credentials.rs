// Copyright 2023 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Device credentials: private key, CSR and client certificate.
//!
//! All three live as PEM files in one directory. The key and CSR are
//! generated on first use; the certificate is installed by the pairing
//! flow and deleted when the broker rejects it, which forces a renewal on
//! the next connection attempt.

use std::{io, path::PathBuf};

use rcgen::{CertificateParams, DnType, KeyPair};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use x509_parser::pem::parse_x509_pem;

const KEY_FILE: &str = "device.key";
const CSR_FILE: &str = "device.csr";
const CERTIFICATE_FILE: &str = "device.crt";
const SECRET_FILE: &str = "credentials_secret";

/// Placeholder subject; the pairing service issues the certificate with
/// the real common name.
const CSR_COMMON_NAME: &str = "temporary";

/// Errors of the credential manager.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("I/O error on `{file}`: {source}")]
    Io {
        file: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("key or CSR generation failed: {0}")]
    Generation(#[from] rcgen::Error),
    #[error("certificate PEM is invalid")]
    InvalidPem,
    #[error("certificate is not valid X.509")]
    InvalidCertificate,
    #[error("certificate has no common name")]
    MissingCommonName,
}

impl CredentialsError {
    fn io(file: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { file, source }
    }
}

/// Manager for the credential directory.
///
/// All operations are idempotent with respect to repeated invocation.
#[derive(Clone, Debug)]
pub struct Credentials {
    dir: PathBuf,
}

impl Credentials {
    /// Opens the credential directory, creating it and the key/CSR pair
    /// when absent.
    pub async fn init(dir: impl Into<PathBuf>) -> Result<Self, CredentialsError> {
        let this = Self { dir: dir.into() };

        fs::create_dir_all(&this.dir)
            .await
            .map_err(CredentialsError::io("credentials directory"))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&this.dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(CredentialsError::io("credentials directory"))?;
        }

        if !this.has_key().await {
            this.create_key().await?;
        }
        if !this.has_csr().await {
            this.create_csr().await?;
        }
        Ok(this)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Generates a fresh private key, dropping any CSR derived from the
    /// previous key.
    pub async fn create_key(&self) -> Result<(), CredentialsError> {
        info!("generating a new device key");
        let key = KeyPair::generate()?;
        fs::write(self.path(KEY_FILE), key.serialize_pem())
            .await
            .map_err(CredentialsError::io(KEY_FILE))?;

        match fs::remove_file(self.path(CSR_FILE)).await {
            Ok(()) => debug!("stale CSR removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(CredentialsError::io(CSR_FILE)(err)),
        }
        Ok(())
    }

    /// Generates a CSR from the stored key.
    pub async fn create_csr(&self) -> Result<(), CredentialsError> {
        let key_pem = self.key().await?;
        let key = KeyPair::from_pem(&key_pem)?;

        let mut params = CertificateParams::new(Vec::new())?;
        params
            .distinguished_name
            .push(DnType::CommonName, CSR_COMMON_NAME);
        let csr = params.serialize_request(&key)?;

        fs::write(self.path(CSR_FILE), csr.pem()?)
            .await
            .map_err(CredentialsError::io(CSR_FILE))?;
        Ok(())
    }

    /// Installs a certificate PEM after checking it parses.
    pub async fn save_certificate(&self, pem: &str) -> Result<(), CredentialsError> {
        Self::common_name(pem)?;
        fs::write(self.path(CERTIFICATE_FILE), pem)
            .await
            .map_err(CredentialsError::io(CERTIFICATE_FILE))?;
        Ok(())
    }

    /// Removes the installed certificate. Not an error if absent.
    pub async fn delete_certificate(&self) -> Result<(), CredentialsError> {
        match fs::remove_file(self.path(CERTIFICATE_FILE)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CredentialsError::io(CERTIFICATE_FILE)(err)),
        }
    }

    /// The stored private key PEM.
    pub async fn key(&self) -> Result<String, CredentialsError> {
        fs::read_to_string(self.path(KEY_FILE))
            .await
            .map_err(CredentialsError::io(KEY_FILE))
    }

    /// The stored CSR PEM.
    pub async fn csr(&self) -> Result<String, CredentialsError> {
        fs::read_to_string(self.path(CSR_FILE))
            .await
            .map_err(CredentialsError::io(CSR_FILE))
    }

    /// The installed certificate PEM.
    pub async fn certificate(&self) -> Result<String, CredentialsError> {
        fs::read_to_string(self.path(CERTIFICATE_FILE))
            .await
            .map_err(CredentialsError::io(CERTIFICATE_FILE))
    }

    /// Whether a private key is stored.
    pub async fn has_key(&self) -> bool {
        fs::try_exists(self.path(KEY_FILE)).await.unwrap_or(false)
    }

    /// Whether a CSR is stored.
    pub async fn has_csr(&self) -> bool {
        fs::try_exists(self.path(CSR_FILE)).await.unwrap_or(false)
    }

    /// Whether a certificate is installed.
    pub async fn has_certificate(&self) -> bool {
        fs::try_exists(self.path(CERTIFICATE_FILE))
            .await
            .unwrap_or(false)
    }

    /// Persists the credentials secret obtained at registration.
    pub async fn store_secret(&self, secret: &str) -> Result<(), CredentialsError> {
        let path = self.path(SECRET_FILE);
        fs::write(&path, secret)
            .await
            .map_err(CredentialsError::io(SECRET_FILE))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(CredentialsError::io(SECRET_FILE))?;
        }
        Ok(())
    }

    /// The persisted credentials secret, if the device registered before.
    pub async fn secret(&self) -> Option<String> {
        fs::read_to_string(self.path(SECRET_FILE)).await.ok()
    }

    /// Extracts the subject common name from a certificate PEM.
    ///
    /// The common name is the device topic; it is sourced exclusively from
    /// the installed certificate.
    pub fn common_name(cert_pem: &str) -> Result<String, CredentialsError> {
        let (_, pem) =
            parse_x509_pem(cert_pem.as_bytes()).map_err(|_| CredentialsError::InvalidPem)?;
        let cert = pem
            .parse_x509()
            .map_err(|_| CredentialsError::InvalidCertificate)?;
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_owned)
            .ok_or(CredentialsError::MissingCommonName);
        common_name
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn credentials() -> (tempfile::TempDir, Credentials) {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Credentials::init(dir.path()).await.unwrap();
        (dir, credentials)
    }

    fn self_signed(common_name: &str) -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.self_signed(&key).unwrap().pem()
    }

    #[tokio::test]
    async fn init_creates_key_and_csr() {
        let (_dir, credentials) = credentials().await;
        assert!(credentials.has_key().await);
        assert!(credentials.has_csr().await);
        assert!(!credentials.has_certificate().await);

        let csr = credentials.csr().await.unwrap();
        assert!(csr.contains("BEGIN CERTIFICATE REQUEST"));
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let (dir, credentials) = credentials().await;
        let key_before = credentials.key().await.unwrap();

        let again = Credentials::init(dir.path()).await.unwrap();
        assert_eq!(again.key().await.unwrap(), key_before);
    }

    #[tokio::test]
    async fn fresh_key_drops_the_csr() {
        let (_dir, credentials) = credentials().await;
        let csr_before = credentials.csr().await.unwrap();

        credentials.create_key().await.unwrap();
        assert!(!credentials.has_csr().await);

        credentials.create_csr().await.unwrap();
        assert_ne!(credentials.csr().await.unwrap(), csr_before);
    }

    #[tokio::test]
    async fn certificate_roundtrip_and_delete() {
        let (_dir, credentials) = credentials().await;
        let pem = self_signed("abc123");

        credentials.save_certificate(&pem).await.unwrap();
        assert!(credentials.has_certificate().await);
        assert_eq!(credentials.certificate().await.unwrap(), pem);

        credentials.delete_certificate().await.unwrap();
        assert!(!credentials.has_certificate().await);
        // Deleting again is fine.
        credentials.delete_certificate().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_garbage_certificates() {
        let (_dir, credentials) = credentials().await;
        assert!(credentials.save_certificate("not a pem").await.is_err());
    }

    #[test]
    fn common_name_extraction() {
        let pem = self_signed("abc123");
        assert_eq!(Credentials::common_name(&pem).unwrap(), "abc123");
    }

    #[tokio::test]
    async fn secret_roundtrip() {
        let (_dir, credentials) = credentials().await;
        assert!(credentials.secret().await.is_none());

        credentials.store_secret("SECRET").await.unwrap();
        assert_eq!(credentials.secret().await.unwrap(), "SECRET");
    }
}
