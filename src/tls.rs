//! TLS setup for the DoH listener: PEM-loaded certificates, or a
//! self-signed development certificate when configured without paths.

use rustls::ServerConfig as RustlsConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::config::TlsSettings;
use crate::error::{DnsError, Result};

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| DnsError::Config(format!("cannot read certificate {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    let certs: std::io::Result<Vec<_>> = rustls_pemfile::certs(&mut reader).collect();
    let certs = certs.map_err(|e| DnsError::Config(format!("bad certificate {}: {}", path, e)))?;
    if certs.is_empty() {
        return Err(DnsError::Config(format!("no certificates in {}", path)));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| DnsError::Config(format!("cannot read key {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| DnsError::Config(format!("bad key {}: {}", path, e)))?
        .ok_or_else(|| DnsError::Config(format!("no private key in {}", path)))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| DnsError::Config(format!("self-signed generation failed: {}", e)))?;
    let cert_der = CertificateDer::from(cert.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(cert.key_pair.serialize_der())
        .map_err(|e| DnsError::Config(format!("self-signed key rejected: {}", e)))?;
    Ok((vec![cert_der], key_der))
}

/// Build the acceptor for the DoH listener, or `None` when TLS is not
/// configured (plain HTTP behind a terminating proxy).
pub fn build_acceptor(settings: Option<&TlsSettings>) -> Result<Option<TlsAcceptor>> {
    let Some(settings) = settings else {
        return Ok(None);
    };

    let (certs, key) = match (&settings.cert_path, &settings.key_path) {
        (Some(cert), Some(key)) => (load_certs(cert)?, load_key(key)?),
        _ if settings.self_signed => {
            warn!("DoH running with a self-signed certificate");
            self_signed()?
        }
        _ => {
            return Err(DnsError::Config(
                "doh_tls needs cert_path and key_path, or self_signed = true".into(),
            ));
        }
    };

    let mut config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| DnsError::Config(format!("TLS configuration rejected: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!("DoH TLS enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_settings_disable_tls() {
        assert!(build_acceptor(None).unwrap().is_none());
    }

    #[test]
    fn self_signed_acceptor_builds() {
        let settings = TlsSettings {
            cert_path: None,
            key_path: None,
            self_signed: true,
        };
        assert!(build_acceptor(Some(&settings)).unwrap().is_some());
    }

    #[test]
    fn missing_paths_without_self_signed_fail() {
        let settings = TlsSettings::default();
        assert!(build_acceptor(Some(&settings)).is_err());
    }
}
