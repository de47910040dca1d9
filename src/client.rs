use crate::{
    certificate_interceptor::TofuVerifier,
    configs::DEFAULT_CONNECT_TIMEOUT,
    decision::{DecisionProtocol, Prompter, Resolution},
    error::AppResult,
    store::SharedTrustStore,
    types::Origin,
};
use std::{
    io::{Error as IoError, ErrorKind as IoErrorKind},
    sync::Arc,
    time::Duration,
};
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::{
    client::TlsStream,
    rustls::{ClientConfig, Error as RustlsError, RootCertStore},
    TlsConnector,
};

/// An established connection, plus the decision taken to get there if the
/// operator had to be asked.
#[derive(Debug)]
pub struct Connection {
    pub stream: TlsStream<TcpStream>,
    pub resolution: Option<Resolution>,
}

/// TLS client that falls back to the operator's trust decisions.
pub struct TrustingClient<P> {
    protocol: DecisionProtocol<P>,
    roots: Arc<RootCertStore>,
    connect_timeout: Duration,
}

impl<P: Prompter> TrustingClient<P> {
    pub fn new(protocol: DecisionProtocol<P>, roots: Arc<RootCertStore>) -> Self {
        Self {
            protocol,
            roots,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn store(&self) -> &SharedTrustStore {
        self.protocol.store()
    }

    fn build_tls_config(&self, origin: &Origin) -> AppResult<(ClientConfig, Arc<TofuVerifier>)> {
        let verifier = Arc::new(TofuVerifier::new(
            origin.clone(),
            self.store().clone(),
            self.roots.clone(),
        )?);

        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier.clone())
            .with_no_client_auth();

        Ok((config, verifier))
    }

    async fn handshake(
        &self,
        origin: &Origin,
    ) -> AppResult<(Result<TlsStream<TcpStream>, IoError>, Arc<TofuVerifier>)> {
        let (tls_config, verifier) = self.build_tls_config(origin)?;
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = origin.server_name()?;

        let conn_result = match timeout(self.connect_timeout, async {
            let stream = TcpStream::connect((origin.connect_host(), origin.port())).await?;
            Ok::<_, IoError>(connector.connect(server_name, stream).await?)
        })
        .await
        {
            Ok(conn_result) => conn_result,
            Err(elapsed) => Err(IoError::new(IoErrorKind::TimedOut, elapsed)),
        };

        Ok((conn_result, verifier))
    }

    /// Connects to `origin`, asking the operator when the certificate is not
    /// trusted yet. An accepted certificate gets exactly one retry.
    pub async fn connect(&self, origin: &Origin) -> AppResult<Connection> {
        let (conn_result, verifier) = self.handshake(origin).await?;
        let err = match conn_result {
            Ok(stream) => {
                return Ok(Connection {
                    stream,
                    resolution: None,
                })
            }
            Err(err) => err,
        };

        // No captured certificate means the failure was not about trust
        let Some(event) = verifier.certificate_error() else {
            return Err(err.into());
        };
        let rejected = RustlsError::InvalidCertificate(event.error.clone());

        let resolution = self.protocol.resolve(event).await?;
        if !resolution.is_trusted() {
            return Err(rejected.into());
        }

        let (conn_result, _) = self.handshake(origin).await?;
        Ok(Connection {
            stream: conn_result?,
            resolution: Some(resolution),
        })
    }
}
