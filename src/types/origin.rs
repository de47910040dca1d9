use crate::error::{AppError, AppResult, ErrorReason};
use rustls_pki_types::ServerName;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use url::Url;

/// The scheme, host and port a trust decision is scoped to.
///
/// Always carries an explicit port, so `https://a.example` and
/// `https://a.example:443` are the same origin while `:8443` is not.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Origin {
    scheme: String,
    host: String,
    port: u16,
}

impl Origin {
    pub fn from_url(url: &Url) -> AppResult<Self> {
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ErrorReason::InvalidOrigin(url.to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ErrorReason::InvalidOrigin(url.to_string()))?;

        Ok(Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host as it appears in a URL; IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Host usable for socket resolution and SNI.
    pub fn connect_host(&self) -> &str {
        self.host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(&self.host)
    }

    pub fn server_name(&self) -> AppResult<ServerName<'static>> {
        Ok(ServerName::try_from(self.connect_host())?.to_owned())
    }
}

impl FromStr for Origin {
    type Err = AppError;

    fn from_str(origin: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(origin.trim())
            .map_err(|_| ErrorReason::InvalidOrigin(origin.to_owned()))?;
        Self::from_url(&url)
    }
}

impl TryFrom<String> for Origin {
    type Error = AppError;

    fn try_from(origin: String) -> Result<Self, Self::Error> {
        origin.parse()
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.to_string()
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
