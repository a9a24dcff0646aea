//! Socket bypass and TLS trust-all helpers shared by the tunnel and UDP
//! session layers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::warn;

/// Invoked immediately after a socket is created (and before it connects),
/// so the host can mark it to bypass the TUN's routes — the same moment the
/// teacher applies TCP keepalive/nodelay in `tunnel::client::configure_tcp_socket`.
/// Returns `false` if the socket could not be marked; callers log that and
/// carry on rather than aborting the connection attempt.
pub type BypassFn = Arc<dyn Fn(&socket2::SockRef<'_>) -> bool + Send + Sync>;

/// A no-op bypass for hosts that route control traffic correctly without it
/// (e.g. tests, or platforms where the TUN fd is already excluded).
pub fn no_bypass() -> BypassFn {
    Arc::new(|_| true)
}

/// `rustls::ClientConfig` with the platform webpki roots, for `verify_tls = true`.
pub fn trusted_tls_config() -> rustls::ClientConfig {
    let root_store = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// `rustls::ClientConfig` that accepts any server certificate, for
/// `verify_tls = false`. Warns once per process via an `AtomicBool` guard,
/// the teacher's `Once`-guarded warning idiom applied to an async-safe type.
pub fn insecure_tls_config() -> rustls::ClientConfig {
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier::default()))
        .with_no_client_auth()
}

#[derive(Debug, Default)]
struct InsecureCertVerifier {
    warned: AtomicBool,
}

impl ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.warned.compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed).is_ok() {
            warn!("verify_tls=false: accepting relay certificate without verification");
        }
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
