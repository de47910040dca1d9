#[cfg(feature = "backtrace")]
use backtrace::Backtrace;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    reason: ErrorReason,
    #[cfg(feature = "backtrace")]
    bt: Backtrace,
}

impl AppError {
    pub(crate) fn new(reason: ErrorReason) -> Self {
        Self {
            reason,
            #[cfg(feature = "backtrace")]
            bt: Backtrace::new(),
        }
    }

    pub fn reason(&self) -> &ErrorReason {
        &self.reason
    }

    #[cfg(feature = "backtrace")]
    pub fn backtrace(&self) -> &Backtrace {
        &self.bt
    }
}

impl<E> From<E> for AppError
where
    E: Into<ErrorReason>,
{
    fn from(reason: E) -> Self {
        Self::new(reason.into())
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.reason)?;
        if let Some(source) = std::error::Error::source(&self.reason) {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.reason.source()
    }
}

#[derive(Debug, Error)]
pub enum ErrorReason {
    #[error("failed to load the configuration")]
    Config(#[from] config::ConfigError),
    #[error("IO error")]
    Io(#[from] std::io::Error),
    #[error("failed to replace the trust store file")]
    Persist(#[from] tempfile::PersistError),
    #[error("trust store encoding error")]
    Json(#[from] serde_json::Error),
    #[error("X509 certificate parsing error")]
    X509(#[from] x509_certificate::X509CertificateError),
    #[error("TLS error")]
    Tls(#[from] tokio_rustls::rustls::Error),
    #[error("failed to build the certificate verifier")]
    RootStore(#[from] tokio_rustls::rustls::client::VerifierBuilderError),
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),
    #[error("Invalid server name")]
    InvalidServerName(#[from] rustls_pki_types::InvalidDnsNameError),
    #[error("Invalid certificate input")]
    InvalidCertificate,
    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),
    #[error("The trust store lock was poisoned")]
    StorePoisoned,
}

impl ErrorReason {
    /// Whether the failure comes from certificate material handed in by the caller.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ErrorReason::InvalidCertificate | ErrorReason::InvalidOrigin(_)
        )
    }
}
