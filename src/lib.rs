//! Trust-on-first-use decisions for TLS certificates that failed chain validation.
//!
//! [`TrustDecisionStore`] remembers which certificate the operator accepted for
//! each origin. [`DecisionProtocol`] asks the operator when needed and
//! [`TofuVerifier`] plugs the store into a rustls handshake.

#[macro_use]
extern crate tracing;

pub mod certificate_interceptor;
pub mod client;
pub mod configs;
pub mod decision;
pub mod error;
pub mod prompt;
pub mod records;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use certificate_interceptor::TofuVerifier;
pub use client::{Connection, TrustingClient};
pub use decision::{
    CertificateErrorEvent, ChannelPrompter, DecisionProtocol, PendingAnswer, PromptKind,
    PromptRequest, Prompter, RejectReason, Resolution, TrustPrompt,
};
pub use error::{AppError, AppResult, ErrorReason};
pub use records::TrustRecordSet;
pub use store::{LoadOutcome, SharedTrustStore, TrustDecisionStore, TrustSnapshot};
pub use types::{Fingerprint, FingerprintPolicy, Origin, ParsedCertificate};
