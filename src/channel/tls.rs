//! TLS acceptor construction from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::TlsAcceptor;

use super::Acceptor;
use crate::config::TlsConfig;
use crate::error::{Dnp3Error, Result};

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Dnp3Error::tls(format!("{}: {}", path.display(), e)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Dnp3Error::tls(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Dnp3Error::tls(format!(
            "{}: no certificate found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Dnp3Error::tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| Dnp3Error::tls(format!("{}: no private key found", path.display())))
}

/// Build a rustls server configuration (TLS 1.2 and 1.3, no client auth).
pub fn load_server_config(config: &TlsConfig) -> Result<ServerConfig> {
    let certs = load_certificates(&config.certificate_path)?;
    let key = load_private_key(&config.private_key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Dnp3Error::tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Dnp3Error::tls(e.to_string()))
}

impl Acceptor {
    /// TLS acceptor from PEM files.
    pub fn tls(config: &TlsConfig) -> Result<Self> {
        let server_config = load_server_config(config)?;
        Ok(Self::Tls(Arc::new(TlsAcceptor::from(Arc::new(server_config)))))
    }
}
