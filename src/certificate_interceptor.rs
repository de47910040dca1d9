use crate::{
    decision::CertificateErrorEvent, error::AppResult, store::SharedTrustStore, types::Origin,
};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use std::{fmt::Debug, sync::Arc};
use tokio::sync::OnceCell;
use tokio_rustls::rustls::{
    client::{
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        WebPkiServerVerifier,
    },
    CertificateError, DigitallySignedStruct, Error as RustlsError, RootCertStore, SignatureScheme,
};

/// Chain validation with a trust-on-first-use fallback for one origin.
///
/// A certificate the web PKI rejects is still accepted when the store trusts
/// it for this origin. Otherwise the rejected certificate is kept so the caller
/// can ask the operator after the handshake has failed.
#[derive(Debug)]
pub struct TofuVerifier {
    origin: Origin,
    store: SharedTrustStore,
    verifier: Arc<WebPkiServerVerifier>,
    rejected: OnceCell<CertificateErrorEvent>,
}

impl TofuVerifier {
    pub fn new(
        origin: Origin,
        store: SharedTrustStore,
        roots: Arc<RootCertStore>,
    ) -> AppResult<Self> {
        Ok(Self::with_verifier(
            origin,
            store,
            WebPkiServerVerifier::builder(roots).build()?,
        ))
    }

    pub fn with_verifier(
        origin: Origin,
        store: SharedTrustStore,
        verifier: Arc<WebPkiServerVerifier>,
    ) -> Self {
        Self {
            origin,
            store,
            verifier,
            rejected: Default::default(),
        }
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The certificate error that made the last handshake fail, if any.
    pub fn certificate_error(&self) -> Option<CertificateErrorEvent> {
        self.rejected.get().cloned()
    }

    fn stored_decision(&self, end_entity: &CertificateDer<'_>) -> Result<bool, RustlsError> {
        let store = self
            .store
            .read()
            .map_err(|_| RustlsError::General("trust store lock poisoned".to_owned()))?;

        store.is_trusted(&self.origin, end_entity).map_err(|e| {
            warn!("Cannot evaluate certificate for {}: {}", self.origin, e);
            RustlsError::InvalidCertificate(CertificateError::BadEncoding)
        })
    }
}

impl ServerCertVerifier for TofuVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let error = match self.verifier.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => return Ok(verified),
            Err(RustlsError::InvalidCertificate(error)) => error,
            Err(e) => return Err(e),
        };

        if self.stored_decision(end_entity)? {
            debug!("Overriding {:?} for trusted {}", error, self.origin);
            return Ok(ServerCertVerified::assertion());
        }

        trace!("Untrusted certificate for {}: {:?}", self.origin, error);
        self.rejected
            .set(CertificateErrorEvent {
                origin: self.origin.clone(),
                certificate: end_entity.clone().into_owned(),
                error: error.clone(),
            })
            .ok();
        Err(RustlsError::InvalidCertificate(error))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.verifier.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        self.verifier.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.verifier.supported_verify_schemes()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{store::TrustDecisionStore, test_utils};
    use tempfile::TempDir;

    fn verifier(dir: &TempDir, origin: &Origin) -> TofuVerifier {
        let mut roots = RootCertStore::empty();
        roots
            .roots
            .extend_from_slice(webpki_roots::TLS_SERVER_ROOTS);
        let store = TrustDecisionStore::load(dir.path().join("certificate.json")).into_shared();
        TofuVerifier::new(origin.clone(), store, Arc::new(roots)).unwrap()
    }

    fn verify(
        verifier: &TofuVerifier,
        cert: &CertificateDer<'_>,
    ) -> Result<ServerCertVerified, RustlsError> {
        let server_name = verifier.origin().server_name().unwrap();
        verifier.verify_server_cert(cert, &[], &server_name, &[], UnixTime::now())
    }

    #[test]
    fn unknown_self_signed_certificate_is_captured() {
        let dir = TempDir::new().unwrap();
        let origin: Origin = "https://a.example".parse().unwrap();
        let verifier = verifier(&dir, &origin);
        let cert = test_utils::certificate("a.example");

        let err = verify(&verifier, &cert).unwrap_err();
        assert!(matches!(err, RustlsError::InvalidCertificate(_)));

        let event = verifier.certificate_error().unwrap();
        assert_eq!(event.origin, origin);
        assert_eq!(event.certificate, cert);
    }

    #[test]
    fn trusted_certificate_overrides_the_failure() {
        let dir = TempDir::new().unwrap();
        let origin: Origin = "https://a.example".parse().unwrap();
        let verifier = verifier(&dir, &origin);
        let cert = test_utils::certificate("a.example");
        verifier.store.write().unwrap().add(&origin, &cert).unwrap();

        assert!(verify(&verifier, &cert).is_ok());
        assert!(verifier.certificate_error().is_none());
    }

    #[test]
    fn trust_is_scoped_to_the_origin() {
        let dir = TempDir::new().unwrap();
        let origin: Origin = "https://a.example:8443".parse().unwrap();
        let verifier = verifier(&dir, &origin);
        let cert = test_utils::certificate("a.example");
        verifier
            .store
            .write()
            .unwrap()
            .add(&"https://a.example".parse().unwrap(), &cert)
            .unwrap();

        assert!(verify(&verifier, &cert).is_err());
        assert!(verifier.certificate_error().is_some());
    }
}
