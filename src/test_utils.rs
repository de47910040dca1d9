//! Certificate fixtures shared by the unit tests.

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls_pki_types::CertificateDer;

/// Self-signed certificate for `host`, issued by `issuer`.
pub fn self_signed(key_pair: &KeyPair, host: &str, issuer: &str) -> CertificateDer<'static> {
    let mut params =
        CertificateParams::new(vec![host.to_owned()]).expect("valid subject alt name");
    params.distinguished_name.push(DnType::CommonName, issuer);
    params
        .self_signed(key_pair)
        .expect("self-signing should succeed")
        .der()
        .clone()
}

/// Fresh key, fresh certificate.
pub fn certificate(host: &str) -> CertificateDer<'static> {
    let key_pair = KeyPair::generate().expect("key generation should succeed");
    self_signed(&key_pair, host, host)
}
