//! Message transports.

use super::Notification;
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Upper bound on one sendmail invocation.
pub const SENDMAIL_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors reported by a transport. All are transient: the notification is
/// retried on the next run.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The mailer could not be started or fed.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Mailer path.
        program: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The mailer exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Rejected {
        /// Mailer path.
        program: Utf8PathBuf,
        /// Exit status text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
    /// The mailer did not finish in time and was killed.
    #[error("{program} timed out after {seconds}s")]
    Timeout {
        /// Mailer path.
        program: Utf8PathBuf,
        /// Timeout in seconds.
        seconds: u64,
    },
    /// The message has no recipients.
    #[error("notification for {namespace} has no recipients")]
    NoRecipients {
        /// Project the message was for.
        namespace: String,
    },
}

/// Hands a message to the outside world.
///
/// `send` blocks; the dispatcher calls it from a blocking task. `Ok` means
/// the message was accepted for delivery and may be recorded as notified.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationTransport: Send + Sync {
    /// Deliver `message`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the message was not accepted.
    fn send(&self, message: &Notification) -> Result<(), TransportError>;
}

/// Render `message` as an RFC 5322 message for a mailer reading headers
/// from its input.
#[must_use]
pub fn render_rfc5322(message: &Notification) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}",
        message.sender,
        message.recipients.join(", "),
        message.subject,
        message.body
    )
}

/// Delivers through a local `sendmail`-compatible binary (`-t -oi`).
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: Utf8PathBuf,
    timeout: Duration,
}

impl SendmailTransport {
    /// Create a transport invoking `program`.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: SENDMAIL_TIMEOUT,
        }
    }

    /// Override the per-message timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mailer path.
    #[must_use]
    pub fn program(&self) -> &Utf8Path {
        &self.program
    }

    fn spawn_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    /// Kill an abandoned mailer and collect its exit status.
    fn reap(&self, child: &mut Child) {
        if let Err(err) = child.kill() {
            debug!("could not kill {}: {err}", self.program);
        }
        if let Err(err) = child.wait() {
            debug!("could not reap {}: {err}", self.program);
        }
    }
}

impl NotificationTransport for SendmailTransport {
    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        if message.recipients.is_empty() {
            return Err(TransportError::NoRecipients {
                namespace: message.namespace.to_string(),
            });
        }
        let mut child = Command::new(self.program.as_std_path())
            .args(["-t", "-oi"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.spawn_error(err))?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin.write_all(render_rfc5322(message).as_bytes());
            drop(stdin);
            // A mailer that exits early closes its input; its status decides.
            if let Err(err) = written.or_else(|err| {
                if err.kind() == std::io::ErrorKind::BrokenPipe {
                    Ok(())
                } else {
                    Err(err)
                }
            }) {
                self.reap(&mut child);
                return Err(self.spawn_error(err));
            }
        }

        match child
            .wait_timeout(self.timeout)
            .map_err(|err| self.spawn_error(err))?
        {
            Some(status) if status.success() => {
                info!(
                    "notified {} about {} artefact(s)",
                    message.recipients.join(", "),
                    message.artefacts.len()
                );
                Ok(())
            }
            Some(status) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take()
                    && let Err(err) = pipe.read_to_string(&mut stderr)
                {
                    debug!("could not read {} stderr: {err}", self.program);
                }
                Err(TransportError::Rejected {
                    program: self.program.clone(),
                    status: status.to_string(),
                    stderr: stderr.trim().to_owned(),
                })
            }
            None => {
                self.reap(&mut child);
                warn!("{} killed after {}s", self.program, self.timeout.as_secs());
                Err(TransportError::Timeout {
                    program: self.program.clone(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Dry-run transport: logs the rendered message and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

impl NotificationTransport for LogTransport {
    fn send(&self, message: &Notification) -> Result<(), TransportError> {
        info!(
            "dry run, not sending; the message would have been:\n{}",
            render_rfc5322(message)
        );
        Ok(())
    }
}
