//! Outbound notifications and the background queue that delivers them.
//!
//! Requests enqueue a [`Notification`] and return immediately. A single
//! worker task issues the verification token, renders the message and hands
//! it to the [`Notifier`]. Failures are logged and dropped.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{TokenPurpose, VerificationTokenManager};

/// Outbound message transport.
pub trait Notifier: Send + Sync + 'static {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Notifier that only writes the message to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        info!(to = %to, subject = %subject, "notification sent");
        Ok(())
    }
}

/// Work item for the notification worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Invitation or re-verification: issue an email-verification token.
    VerifyEmail { email: String },
    /// Forgot-password: issue a password-reset token.
    PasswordReset { email: String },
}

impl Notification {
    fn email(&self) -> &str {
        match self {
            Self::VerifyEmail { email } | Self::PasswordReset { email } => email,
        }
    }

    fn purpose(&self) -> TokenPurpose {
        match self {
            Self::VerifyEmail { .. } => TokenPurpose::EmailVerification,
            Self::PasswordReset { .. } => TokenPurpose::PasswordReset,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Self::VerifyEmail { .. } => "email-verification",
            Self::PasswordReset { .. } => "reset-password",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Self::VerifyEmail { .. } => "Verify your email address",
            Self::PasswordReset { .. } => "Reset your password",
        }
    }
}

/// Fire-and-forget queue backed by one worker task.
pub struct NotificationQueue {
    sender: StdMutex<Option<mpsc::UnboundedSender<Notification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationQueue {
    /// Start the worker.
    pub fn spawn(
        tokens: Arc<VerificationTokenManager>,
        notifier: Arc<dyn Notifier>,
        frontend_host: impl Into<String>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Notification>();
        let frontend_host = frontend_host.into();

        let worker = tokio::spawn(async move {
            debug!("notification worker started");
            while let Some(notification) = receiver.recv().await {
                Self::deliver(&tokens, &notifier, &frontend_host, notification).await;
            }
            debug!("notification worker stopped");
        });

        Self {
            sender: StdMutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a notification. Never waits for delivery.
    ///
    /// After [`shutdown`](Self::shutdown) the notification is logged and dropped.
    pub fn enqueue(&self, notification: Notification) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let result = match sender.as_ref() {
            Some(sender) => sender.send(notification).map_err(|e| e.0),
            None => Err(notification),
        };

        if let Err(notification) = result {
            error!(email = %notification.email(), "notification queue closed, message dropped");
        }
    }

    /// Stop accepting work and wait for queued notifications to drain.
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(sender);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "notification worker panicked");
            }
            info!("notification queue drained");
        }
    }

    async fn deliver(
        tokens: &VerificationTokenManager,
        notifier: &Arc<dyn Notifier>,
        frontend_host: &str,
        notification: Notification,
    ) {
        let email = notification.email().to_string();

        let token = match tokens.issue(&email, notification.purpose()).await {
            Ok(token) => token,
            Err(e) => {
                error!(email = %email, error = %e, "failed to issue verification token");
                return;
            }
        };

        let link = match action_link(frontend_host, notification.path(), &email, &token) {
            Ok(link) => link,
            Err(e) => {
                error!(email = %email, error = %e, "failed to build notification link");
                return;
            }
        };

        let subject = notification.subject();
        let body = render_body(&notification, &link);
        let notifier = notifier.clone();
        let to = email.clone();

        match tokio::task::spawn_blocking(move || notifier.send(&to, subject, &body)).await {
            Ok(Ok(())) => debug!(email = %email, "notification delivered"),
            Ok(Err(e)) => warn!(email = %email, error = %e, "failed to send notification"),
            Err(e) => error!(email = %email, error = %e, "notification send task failed"),
        }
    }
}

/// `{frontend_host}/{path}?email=..&token=..`
fn action_link(frontend_host: &str, path: &str, email: &str, token: &str) -> Result<Url> {
    let base = format!("{}/{}", frontend_host.trim_end_matches('/'), path);
    Ok(Url::parse_with_params(
        &base,
        &[("email", email), ("token", token)],
    )?)
}

fn render_body(notification: &Notification, link: &Url) -> String {
    match notification {
        Notification::VerifyEmail { .. } => format!(
            "You have been invited to join your school's workspace.\n\n\
             Confirm your email address and choose a password here:\n{}\n\n\
             The link expires soon and can be used once.",
            link
        ),
        Notification::PasswordReset { .. } => format!(
            "A password reset was requested for your account.\n\n\
             Choose a new password here:\n{}\n\n\
             If you did not request this, ignore this message.",
            link
        ),
    }
}
