//! TLS configuration for the secure-multiplexed mode.

use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsMaterial;
use crate::net::listener::BindError;

/// ALPN protocol id for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// Host names the generated certificate is valid for.
const SELF_SIGNED_NAMES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Build a TLS acceptor that only negotiates HTTP/2.
pub async fn build_acceptor(material: &TlsMaterial) -> Result<TlsAcceptor, BindError> {
    let config = RustlsConfig::from_pem(material.cert.clone(), material.key.clone())
        .await
        .map_err(|e| BindError::Tls(e.to_string()))?;

    let mut server_config = (*config.get_inner()).clone();
    server_config.alpn_protocols = vec![ALPN_H2.to_vec()];

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

/// Generate a throwaway self-signed key and certificate for `localhost`.
pub fn generate_self_signed() -> Result<TlsMaterial, rcgen::Error> {
    let names = SELF_SIGNED_NAMES.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    let certified = rcgen::generate_simple_self_signed(names)?;

    tracing::debug!("Generated self-signed certificate");

    Ok(TlsMaterial {
        key: certified.key_pair.serialize_pem().into_bytes(),
        cert: certified.cert.pem().into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_material_is_pem() {
        let material = generate_self_signed().unwrap();
        let cert = String::from_utf8(material.cert).unwrap();
        let key = String::from_utf8(material.key).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY-----"));
    }

    #[tokio::test]
    async fn acceptor_accepts_generated_material() {
        let material = generate_self_signed().unwrap();
        assert!(build_acceptor(&material).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_material_is_a_tls_bind_error() {
        let material = TlsMaterial::new("not a key", "not a cert");
        let err = build_acceptor(&material).await.err().unwrap();
        assert!(matches!(err, BindError::Tls(_)));
    }
}
