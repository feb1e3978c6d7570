//! Caller-facing session handle.
//!
//! Cheap to clone; every clone feeds the same ordering context, which
//! admits exactly one outstanding command at a time and serializes writes
//! in admission order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::{AuthMode, SessionConfig};
use crate::imap::command::{quote, xoauth2_token, CommandKind};
use crate::imap::error::SessionError;
use crate::imap::response::Response;
use crate::imap::session::{SessionActor, SessionPhase, Submission};
use crate::transport::{ImapTransport, TransportNotice};

/// Single-resolution future for one dispatched command.
///
/// Resolves exactly once, with the response or with the failure that
/// terminated the command. Dropping the handle does not cancel the
/// command.
#[derive(Debug)]
pub struct CommandHandle {
    rx: oneshot::Receiver<Result<Response, SessionError>>,
}

impl Future for CommandHandle {
    type Output = Result<Response, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(outcome) => outcome,
            Err(_) => Err(SessionError::ConnectionClosed),
        })
    }
}

/// Session-wide login outcome. Resolves exactly once, on the first
/// successful or failed authentication; clones observe the same result.
pub type LoginHandle = Shared<BoxFuture<'static, Result<(), SessionError>>>;

pub struct ImapClient<T: ImapTransport> {
    id: Uuid,
    config: SessionConfig,
    transport: Arc<T>,
    mailbox: mpsc::UnboundedSender<Submission>,
    login: LoginHandle,
    phase: watch::Receiver<SessionPhase>,
    violations: Arc<AtomicU64>,
}

impl<T: ImapTransport> Clone for ImapClient<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            mailbox: self.mailbox.clone(),
            login: self.login.clone(),
            phase: self.phase.clone(),
            violations: Arc::clone(&self.violations),
        }
    }
}

impl<T: ImapTransport + 'static> ImapClient<T> {
    /// Starts the session engine over an established transport.
    ///
    /// `notices` is the transport's delivery channel: decoded inbound
    /// messages and idle notifications, in arrival order.
    pub fn spawn(
        transport: Arc<T>,
        notices: mpsc::Receiver<TransportNotice>,
        config: SessionConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Connecting);
        let (login_tx, login_rx) = oneshot::channel();
        let violations = Arc::new(AtomicU64::new(0));

        let login = login_rx
            .map(|res| match res {
                Ok(outcome) => outcome,
                Err(_) => Err(SessionError::ConnectionClosed),
            })
            .boxed()
            .shared();

        let actor = SessionActor::new(
            id,
            Arc::clone(&transport),
            mailbox_rx,
            notices,
            phase_tx,
            Arc::clone(&violations),
            config.command_timeout(),
            login_tx,
        );
        tokio::spawn(actor.run());
        info!(
            "[{}] session engine started for {}:{}",
            id, config.host, config.port
        );

        Self {
            id,
            config,
            transport,
            mailbox: mailbox_tx,
            login,
            phase: phase_rx,
            violations,
        }
    }

    /// Submits a command for dispatch.
    ///
    /// Safe to call concurrently; effect order is the order submissions
    /// are admitted by the ordering context. Fails immediately with
    /// `ConnectionClosed` when the connection is down and no write is
    /// attempted.
    pub fn submit(
        &self,
        kind: CommandKind,
        args: Vec<String>,
    ) -> Result<CommandHandle, SessionError> {
        if !self.transport.is_open() {
            return Err(SessionError::ConnectionClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(Submission { kind, args, reply })
            .map_err(|_| SessionError::ConnectionClosed)?;
        Ok(CommandHandle { rx })
    }

    /// Dispatches the authentication handshake for the configured mode and
    /// returns the session-wide login outcome.
    pub fn login(&self) -> Result<LoginHandle, SessionError> {
        match self.config.auth {
            AuthMode::Password => {
                self.submit(
                    CommandKind::Login,
                    vec![self.config.username.clone(), self.config.secret.clone()],
                )?;
            }
            AuthMode::XOAuth2 => {
                self.submit(
                    CommandKind::Authenticate,
                    vec![
                        "XOAUTH2".to_string(),
                        xoauth2_token(&self.config.username, &self.config.secret),
                    ],
                )?;
            }
        }
        Ok(self.login.clone())
    }

    pub fn logout(&self) -> Result<CommandHandle, SessionError> {
        self.submit(CommandKind::Logout, Vec::new())
    }

    /// Keepalive. Also dispatched automatically on idle notifications.
    pub fn noop(&self) -> Result<CommandHandle, SessionError> {
        self.submit(CommandKind::Noop, Vec::new())
    }

    pub fn list(&self, reference: &str, query: &str) -> Result<CommandHandle, SessionError> {
        self.submit(CommandKind::List, vec![quote(reference), quote(query)])
    }

    /// Opens a mailbox: SELECT for read-write, EXAMINE for read-only.
    pub fn open(&self, folder: &str, read_only: bool) -> Result<CommandHandle, SessionError> {
        let kind = if read_only {
            CommandKind::Examine
        } else {
            CommandKind::Select
        };
        self.submit(kind, vec![quote(folder)])
    }

    /// Free-form escape hatch; `verb` goes on the wire as given.
    pub fn send(&self, verb: &str, args: Vec<String>) -> Result<CommandHandle, SessionError> {
        self.submit(CommandKind::Raw(verb.to_string()), args)
    }

    /// Point-in-time check: first authentication succeeded and the
    /// connection is still open.
    pub fn is_logged_in(&self) -> bool {
        matches!(self.login.peek(), Some(Ok(()))) && self.transport.is_open()
    }

    /// Waits for the first authentication outcome.
    pub async fn await_login(&self) -> Result<(), SessionError> {
        self.login.clone().await
    }

    /// Graceful shutdown: logout with a bounded wait, then close the
    /// connection no matter what. Safe to call repeatedly, including while
    /// the connection is already closing.
    pub async fn close(&self) {
        if self.is_logged_in() {
            match self.logout() {
                Ok(handle) => {
                    if timeout(self.config.close_timeout(), handle).await.is_err() {
                        warn!(
                            "[{}] logout did not complete within {:?}, closing anyway",
                            self.id,
                            self.config.close_timeout()
                        );
                    }
                }
                Err(err) => warn!("[{}] logout dispatch failed: {}", self.id, err),
            }
        }
        self.transport.close().await;
    }

    /// Current connection phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Number of inbound messages rejected as protocol violations.
    pub fn protocol_violations(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }
}
