use crate::decision::{PendingAnswer, PromptKind, Prompter, TrustPrompt};
use std::{
    io::{stderr, stdin, BufRead, Result as IoResult, Write},
    sync::Arc,
    thread,
};
use tokio::sync::{mpsc, oneshot, Mutex};

/// Asks on the controlling terminal, one prompt at a time.
///
/// End of input drops the answer, which rejects. A prompt that is given up on
/// while shown releases the terminal for the next one.
#[derive(Clone, Debug)]
pub struct TerminalPrompter {
    lines: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl TerminalPrompter {
    /// Answers come from stdin.
    pub fn new() -> Self {
        Self::from_lines(spawn_stdin_reader())
    }

    /// Answers come from `lines`, one per prompt.
    pub fn from_lines(lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn prompt(&self, prompt: TrustPrompt) -> PendingAnswer {
        let (shown_tx, shown) = oneshot::channel();
        let (mut answer_tx, answer) = oneshot::channel();
        let lines = self.lines.clone();

        tokio::spawn(async move {
            let mut lines = lines.lock().await;
            if answer_tx.is_closed() {
                return;
            }
            // Drop type-ahead so it cannot answer a question not yet asked
            while lines.try_recv().is_ok() {}

            if let Err(e) = show(&prompt) {
                warn!("Failed to prompt for {}: {}", prompt.origin, e);
                return;
            }
            shown_tx.send(()).ok();

            let line = tokio::select! {
                line = lines.recv() => line,
                _ = answer_tx.closed() => {
                    write!(stderr(), "\nNo answer in time, rejected {}.\n", prompt.origin).ok();
                    return;
                }
            };
            match line {
                Some(line) => {
                    answer_tx.send(parse_answer(prompt.kind, &line)).ok();
                }
                None => debug!("Prompt for {} closed without an answer", prompt.origin),
            }
        });

        PendingAnswer { shown, answer }
    }
}

/// Blocking stdin reads run on their own thread, never on the runtime, so a
/// read nobody waits for anymore cannot hold up shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        for line in stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from the terminal: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

fn show(prompt: &TrustPrompt) -> IoResult<()> {
    let hint = match prompt.kind {
        PromptKind::FirstUse => "[y/N]",
        PromptKind::CertificateChanged => "[type 'yes' to trust]",
    };

    let mut out = stderr().lock();
    write!(out, "\n{}\n{} ", prompt, hint)?;
    out.flush()
}

/// Anything but an explicit yes is a no. A changed certificate needs the full word.
pub fn parse_answer(kind: PromptKind, line: &str) -> bool {
    let line = line.trim().to_ascii_lowercase();
    match kind {
        PromptKind::FirstUse => matches!(line.as_str(), "y" | "yes"),
        PromptKind::CertificateChanged => line == "yes",
    }
}
