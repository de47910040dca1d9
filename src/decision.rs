use crate::{
    error::{AppError, AppResult, ErrorReason},
    store::{SharedTrustStore, TrustDecisionStore},
    types::{Fingerprint, Origin, ParsedCertificate},
};
use rustls_pki_types::CertificateDer;
use std::{
    fmt::{Display, Formatter},
    io::{Error as IoError, ErrorKind as IoErrorKind},
    sync::{Arc, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};
use tokio_rustls::rustls::CertificateError;

/// A certificate that failed chain validation for `origin`.
#[derive(Clone, Debug)]
pub struct CertificateErrorEvent {
    pub origin: Origin,
    pub certificate: CertificateDer<'static>,
    pub error: CertificateError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromptKind {
    /// Nothing was ever trusted for the origin.
    FirstUse,
    /// A different certificate was trusted before. Possible interception.
    CertificateChanged,
}

/// Everything the operator needs to answer one trust question.
#[derive(Clone, Debug)]
pub struct TrustPrompt {
    pub kind: PromptKind,
    pub origin: Origin,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub fingerprint: Fingerprint,
    pub previous: Option<Fingerprint>,
    pub error: String,
}

impl TrustPrompt {
    fn new(store: &TrustDecisionStore, event: &CertificateErrorEvent) -> AppResult<Self> {
        let certificate = ParsedCertificate::from_der(&event.certificate)?;
        let previous = store.trusted_fingerprint(&event.origin).cloned();
        let kind = if previous.is_some() {
            PromptKind::CertificateChanged
        } else {
            PromptKind::FirstUse
        };

        Ok(Self {
            kind,
            origin: event.origin.clone(),
            issuer: certificate.issuer_common_name(),
            subject: certificate.subject_common_name(),
            fingerprint: certificate.fingerprint(store.policy()),
            previous,
            error: format!("{:?}", event.error),
        })
    }

    pub fn title(&self) -> &'static str {
        match self.kind {
            PromptKind::FirstUse => "Certificate error",
            PromptKind::CertificateChanged => "Certificate changed",
        }
    }

    pub fn message(&self) -> String {
        format!(
            "Do you trust certificate from \"{}\"?",
            self.issuer.as_deref().unwrap_or("unknown issuer")
        )
    }

    pub fn detail(&self) -> String {
        let mut detail = String::new();
        if let Some(previous) = &self.previous {
            detail.push_str(&format!(
                "Certificate is different from previous one.\nPreviously trusted: {}\n\n",
                previous
            ));
        }
        detail.push_str(&format!(
            "URL: {}\nError: {}\nFingerprint: {}",
            self.origin, self.error, self.fingerprint
        ));
        detail
    }
}

impl Display for TrustPrompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}\n\n{}", self.title(), self.message(), self.detail())
    }
}

/// The operator's answer to one prompt, as seen by the protocol.
///
/// `shown` fires once the question is actually in front of the operator; the
/// prompt timeout only runs from then. Dropping the answer sender without
/// answering counts as a rejection.
#[derive(Debug)]
pub struct PendingAnswer {
    pub shown: oneshot::Receiver<()>,
    pub answer: oneshot::Receiver<bool>,
}

impl PendingAnswer {
    /// For prompters that show their question right away.
    pub fn shown_now(answer: oneshot::Receiver<bool>) -> Self {
        let (shown_tx, shown) = oneshot::channel();
        shown_tx.send(()).ok();
        Self { shown, answer }
    }
}

/// Asks the operator.
pub trait Prompter: Send + Sync {
    fn prompt(&self, prompt: TrustPrompt) -> PendingAnswer;
}

impl<P: Prompter + ?Sized> Prompter for Arc<P> {
    fn prompt(&self, prompt: TrustPrompt) -> PendingAnswer {
        (**self).prompt(prompt)
    }
}

/// A prompt waiting for an answer from whichever task owns the UI.
#[derive(Debug)]
pub struct PromptRequest {
    pub prompt: TrustPrompt,
    pub answer: oneshot::Sender<bool>,
}

/// Forwards prompts to a UI task over a channel.
#[derive(Clone, Debug)]
pub struct ChannelPrompter {
    requests: mpsc::UnboundedSender<PromptRequest>,
}

impl ChannelPrompter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PromptRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, rx)
    }
}

impl Prompter for ChannelPrompter {
    fn prompt(&self, prompt: TrustPrompt) -> PendingAnswer {
        let (answer, rx) = oneshot::channel();
        if self.requests.send(PromptRequest { prompt, answer }).is_err() {
            warn!("Prompt UI is gone, the certificate will be rejected");
        }
        PendingAnswer::shown_now(rx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    Declined,
    Cancelled,
    TimedOut,
}

/// Terminal state of one certificate-error event.
#[derive(Debug)]
pub enum Resolution {
    /// The exact certificate was already trusted, nobody was asked.
    AlreadyTrusted,
    /// The operator accepted. `saved` reports whether the decision reached disk.
    Accepted { saved: AppResult<()> },
    Rejected { reason: RejectReason },
}

impl Resolution {
    pub fn is_trusted(&self) -> bool {
        matches!(
            self,
            Resolution::AlreadyTrusted | Resolution::Accepted { .. }
        )
    }
}

/// Runs the PENDING -> ACCEPTED/REJECTED protocol against a shared store.
pub struct DecisionProtocol<P> {
    store: SharedTrustStore,
    prompter: P,
    prompt_timeout: Option<Duration>,
    save_guard: Mutex<()>,
}

impl<P: Prompter> DecisionProtocol<P> {
    pub fn new(store: SharedTrustStore, prompter: P) -> Self {
        Self {
            store,
            prompter,
            prompt_timeout: None,
            save_guard: Mutex::new(()),
        }
    }

    /// Prompts left unanswered for `prompt_timeout` after being shown are rejected.
    pub fn with_prompt_timeout(mut self, prompt_timeout: Duration) -> Self {
        self.prompt_timeout = Some(prompt_timeout);
        self
    }

    pub fn store(&self) -> &SharedTrustStore {
        &self.store
    }

    pub async fn resolve(&self, event: CertificateErrorEvent) -> AppResult<Resolution> {
        // No store lock may be held across the prompt.
        let prompt = {
            let store = self.read_store()?;
            if store.is_trusted(&event.origin, &event.certificate)? {
                return Ok(Resolution::AlreadyTrusted);
            }
            TrustPrompt::new(&store, &event)?
        };
        let kind = prompt.kind;

        if let Err(reason) = self.ask(prompt).await {
            info!("Rejected certificate for {} ({:?})", event.origin, reason);
            return Ok(Resolution::Rejected { reason });
        }

        self.write_store()?.add(&event.origin, &event.certificate)?;
        match kind {
            PromptKind::FirstUse => info!("Accepted first certificate for {}", event.origin),
            PromptKind::CertificateChanged => {
                warn!("Accepted changed certificate for {}", event.origin)
            }
        }

        let saved = self.persist().await;
        if let Err(e) = &saved {
            error!(
                "Trust decision for {} will not survive a restart: {}",
                event.origin, e
            );
        }
        Ok(Resolution::Accepted { saved })
    }

    async fn ask(&self, prompt: TrustPrompt) -> Result<(), RejectReason> {
        let PendingAnswer { shown, mut answer } = self.prompter.prompt(prompt);

        let answer = match self.prompt_timeout {
            Some(limit) => {
                // Queued prompts are not timed until they are on screen.
                tokio::select! {
                    answer = &mut answer => return interpret(answer),
                    _ = shown => {}
                }
                timeout(limit, answer)
                    .await
                    .map_err(|_| RejectReason::TimedOut)?
            }
            None => answer.await,
        };
        interpret(answer)
    }

    async fn persist(&self) -> AppResult<()> {
        // Snapshots are taken under the guard so an older one never lands last.
        let _guard = self.save_guard.lock().await;
        let snapshot = self.read_store()?.snapshot()?;

        tokio::task::spawn_blocking(move || snapshot.write())
            .await
            .map_err(|e| AppError::from(IoError::new(IoErrorKind::Other, e)))?
    }

    fn read_store(&self) -> AppResult<RwLockReadGuard<'_, TrustDecisionStore>> {
        self.store
            .read()
            .map_err(|_| ErrorReason::StorePoisoned.into())
    }

    fn write_store(&self) -> AppResult<RwLockWriteGuard<'_, TrustDecisionStore>> {
        self.store
            .write()
            .map_err(|_| ErrorReason::StorePoisoned.into())
    }
}

fn interpret(answer: Result<bool, oneshot::error::RecvError>) -> Result<(), RejectReason> {
    match answer {
        Ok(true) => Ok(()),
        Ok(false) => Err(RejectReason::Declined),
        Err(_) => Err(RejectReason::Cancelled),
    }
}
