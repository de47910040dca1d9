use crate::error::{AppError, AppResult, ErrorReason};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use rustls_pki_types::CertificateDer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::{Display, Formatter},
    ops::Deref,
    str::FromStr,
};
use x509_certificate::{asn1time::Time, X509Certificate};

const SHA256_LEN: usize = 32;

/// Which part of a certificate a fingerprint covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintPolicy {
    /// SHA-256 over the full DER encoding. Any renewal re-prompts.
    #[default]
    Certificate,
    /// SHA-256 over the subject public key. Renewals that keep the key are accepted.
    PublicKey,
}

impl FingerprintPolicy {
    fn prefix(self) -> &'static str {
        match self {
            FingerprintPolicy::Certificate => "sha256",
            FingerprintPolicy::PublicKey => "spki-sha256",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sha256" => Some(FingerprintPolicy::Certificate),
            "spki-sha256" => Some(FingerprintPolicy::PublicKey),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint {
    policy: FingerprintPolicy,
    digest: Vec<u8>,
}

impl Fingerprint {
    pub fn policy(&self) -> FingerprintPolicy {
        self.policy
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.policy.prefix(), STANDARD.encode(&self.digest))
    }
}

impl FromStr for Fingerprint {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ErrorReason::InvalidFingerprint(s.to_owned());

        let (prefix, encoded) = s.split_once(':').ok_or_else(invalid)?;
        let policy = FingerprintPolicy::from_prefix(prefix).ok_or_else(invalid)?;
        let digest = STANDARD.decode(encoded).map_err(|_| invalid())?;
        if digest.len() != SHA256_LEN {
            return Err(invalid().into());
        }

        Ok(Self { policy, digest })
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_string()
    }
}

/// A certificate presented by a peer, checked to be well-formed X.509.
#[derive(Clone, Debug)]
pub struct ParsedCertificate {
    der: CertificateDer<'static>,
    parsed: X509Certificate,
}

impl ParsedCertificate {
    pub fn from_der(der: &CertificateDer<'_>) -> AppResult<Self> {
        let parsed = X509Certificate::from_der(der.as_ref()).map_err(|e| {
            debug!("Rejecting malformed certificate: {}", e);
            ErrorReason::InvalidCertificate
        })?;

        Ok(Self {
            der: der.clone().into_owned(),
            parsed,
        })
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    pub fn fingerprint(&self, policy: FingerprintPolicy) -> Fingerprint {
        let digest = match policy {
            FingerprintPolicy::Certificate => Sha256::digest(self.der.as_ref()),
            FingerprintPolicy::PublicKey => Sha256::digest(self.parsed.public_key_data()),
        };

        Fingerprint {
            policy,
            digest: digest.to_vec(),
        }
    }

    pub fn not_before(&self) -> i64 {
        timestamp(&self.parsed.as_ref().tbs_certificate.validity.not_before)
    }

    pub fn not_after(&self) -> i64 {
        timestamp(&self.parsed.as_ref().tbs_certificate.validity.not_after)
    }
}

fn timestamp(time: &Time) -> i64 {
    match time {
        Time::UtcTime(t) => t.timestamp(),
        Time::GeneralTime(t) => DateTime::<Utc>::from(t.clone()).timestamp(),
    }
}

impl Deref for ParsedCertificate {
    type Target = X509Certificate;

    fn deref(&self) -> &Self::Target {
        &self.parsed
    }
}

impl Display for ParsedCertificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.parsed.subject_common_name() {
            Some(cn) => write!(f, "{}", cn),
            None => write!(f, "{}", self.fingerprint(FingerprintPolicy::Certificate)),
        }
    }
}
