use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::RootCertStore;

/// Where chain validation gets its trust anchors from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootsSource {
    #[default]
    Webpki,
    Native,
}

impl RootsSource {
    pub fn load(self) -> AppResult<RootCertStore> {
        let mut root_certs = RootCertStore::empty();
        match self {
            RootsSource::Webpki => {
                root_certs
                    .roots
                    .extend_from_slice(webpki_roots::TLS_SERVER_ROOTS);
            }
            RootsSource::Native => {
                let certs = rustls_native_certs::load_native_certs()?;
                let (added, ignored) = root_certs.add_parsable_certificates(certs);
                if ignored > 0 {
                    warn!("Ignored {} unparsable system root certificate(s)", ignored);
                }
                debug!("Loaded {} system root certificate(s)", added);
            }
        }
        Ok(root_certs)
    }
}
