use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore, pki_types::CertificateDer};

/// Errors that can occur while building a TLS config
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to open file {0}: {1}")]
    CertFileIo(PathBuf, std::io::Error),
    #[error("failed to read certificate PEM")]
    CertPem(std::io::Error),
    #[error("failed to parse private key PEM")]
    KeyPem(std::io::Error),
    #[error("no private keys found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("no certificates found in {0}")]
    NoRootCertificates(PathBuf),
    #[error("client authentication needs both `cert` and `key`")]
    IncompleteClientAuth,
    #[error("failed to add root CA certificate")]
    RootCertError(rustls::Error),
    #[error("failed to build client config")]
    ClientConfigError(rustls::Error),
}

/// TLS settings for a `wss://` push endpoint signed by a private CA.
///
/// `cert` and `key` are only needed when the server asks for a client
/// certificate.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub root_ca: PathBuf,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            root_ca: PathBuf::from("./keys/rootCA.pem"),
            cert: None,
            key: None,
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::CertFileIo(path.to_path_buf(), e))?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::CertPem)
}

/// Install ring as the process-wide rustls crypto provider.
///
/// The dependency graph enables both ring and aws-lc-rs, so rustls cannot
/// pick a default by itself and panics on first use. Returns false when a
/// provider was already installed.
pub fn install_crypto_provider() -> bool {
    rustls::crypto::ring::default_provider()
        .install_default()
        .is_ok()
}

pub fn client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
    install_crypto_provider();

    let client_auth = match (&config.cert, &config.key) {
        (Some(cert), Some(key)) => Some((cert, key)),
        (None, None) => None,
        _ => return Err(TlsError::IncompleteClientAuth),
    };

    let mut root_store = RootCertStore::empty();
    let roots = load_certs(&config.root_ca)?;
    if roots.is_empty() {
        return Err(TlsError::NoRootCertificates(config.root_ca.clone()));
    }
    for cert in roots {
        root_store.add(cert).map_err(TlsError::RootCertError)?;
    }

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    let Some((cert, key)) = client_auth else {
        return Ok(builder.with_no_client_auth());
    };

    let cert_chain = load_certs(cert)?;

    let mut key_reader = open(key)?;
    let key_der = rustls_pemfile::private_key(&mut key_reader)
        .map_err(TlsError::KeyPem)?
        .ok_or_else(|| TlsError::NoPrivateKey(key.clone()))?;

    // with_client_auth_cert presents the cert whenever the server requests one
    builder
        .with_client_auth_cert(cert_chain, key_der)
        .map_err(TlsError::ClientConfigError)
}
