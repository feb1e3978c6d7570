//! Session state machine and command dispatcher.
//!
//! A single actor task owns all per-connection mutable state. Submissions
//! from arbitrary callers and deliveries from the transport meet here, so
//! the one-outstanding-command gate, tag assignment, write order and
//! response routing are all decided on one thread of control and cannot
//! race each other.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

use crate::imap::command::{Command, CommandKind};
use crate::imap::error::SessionError;
use crate::imap::response::{EventKind, Response, ResponseStatus};
use crate::transport::{ImapTransport, TransportNotice};

/// Connection phase of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport exists yet.
    Disconnected,
    /// TCP/TLS establishment in progress.
    Connecting,
    /// Connection up, no authentication attempted.
    Unauthenticated,
    /// Authentication command outstanding.
    Authenticating,
    Authenticated,
    /// Logout dispatched.
    Closing,
    Closed,
}

pub(crate) type ReplySender = oneshot::Sender<Result<Response, SessionError>>;

/// One accepted submission, waiting for or occupying the command slot.
pub(crate) struct Submission {
    pub(crate) kind: CommandKind,
    pub(crate) args: Vec<String>,
    pub(crate) reply: ReplySender,
}

/// Process-local state for one connection. Owned exclusively by the actor.
struct SessionState {
    phase: SessionPhase,
    next_tag: u64,
    /// The single outstanding (or most recently written) command.
    current: Option<Command>,
    /// Completion handle for the outstanding command. Taken on resolution.
    reply: Option<ReplySender>,
    /// Resolves the session-wide login handle. Taken on first resolution.
    login: Option<oneshot::Sender<Result<(), SessionError>>>,
}

pub(crate) struct SessionActor<T: ImapTransport> {
    id: Uuid,
    transport: Arc<T>,
    state: SessionState,
    mailbox: mpsc::UnboundedReceiver<Submission>,
    mailbox_open: bool,
    notices: mpsc::Receiver<TransportNotice>,
    /// Submissions admitted behind the outstanding command, FIFO.
    backlog: VecDeque<Submission>,
    phase_tx: watch::Sender<SessionPhase>,
    violations: Arc<AtomicU64>,
    command_timeout: Option<Duration>,
    /// Watchdog deadline for the outstanding command, when enabled.
    deadline: Option<Instant>,
}

impl<T: ImapTransport> SessionActor<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        transport: Arc<T>,
        mailbox: mpsc::UnboundedReceiver<Submission>,
        notices: mpsc::Receiver<TransportNotice>,
        phase_tx: watch::Sender<SessionPhase>,
        violations: Arc<AtomicU64>,
        command_timeout: Option<Duration>,
        login: oneshot::Sender<Result<(), SessionError>>,
    ) -> Self {
        Self {
            id,
            transport,
            state: SessionState {
                phase: SessionPhase::Connecting,
                next_tag: 0,
                current: None,
                reply: None,
                login: Some(login),
            },
            mailbox,
            mailbox_open: true,
            notices,
            backlog: VecDeque::new(),
            phase_tx,
            violations,
            command_timeout,
            deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.set_phase(SessionPhase::Unauthenticated);
        debug!("[{}] session actor started", self.id);
        loop {
            let deadline = self.deadline;
            let alive = tokio::select! {
                notice = self.notices.recv() => match notice {
                    Some(TransportNotice::Message(response)) => self.handle_message(response).await,
                    Some(TransportNotice::Idle) => {
                        self.handle_idle().await;
                        true
                    }
                    Some(TransportNotice::Closed) | None => {
                        info!("[{}] transport delivery ended", self.id);
                        false
                    }
                },
                submission = self.mailbox.recv(), if self.mailbox_open => match submission {
                    Some(submission) => {
                        self.handle_submission(submission).await;
                        true
                    }
                    None => {
                        self.mailbox_open = false;
                        true
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_command_timeout().await;
                    false
                }
            };
            let idle_with_no_callers = !self.mailbox_open
                && self.state.reply.is_none()
                && self.backlog.is_empty();
            if !alive || idle_with_no_callers {
                self.shutdown().await;
                return;
            }
        }
    }

    // --- Submission path ---

    async fn handle_submission(&mut self, submission: Submission) {
        if self.state.reply.is_some() {
            self.backlog.push_back(submission);
            return;
        }
        self.install(submission).await;
    }

    /// Installs a submission as the outstanding command and writes it.
    ///
    /// Only ever runs with the command slot free; the write happens on this
    /// task, so writes can never interleave even when submitters race.
    async fn install(&mut self, submission: Submission) {
        if !self.transport.is_open() {
            let _ = submission.reply.send(Err(SessionError::ConnectionClosed));
            return;
        }
        let tag = self.assign_tag(&submission.kind);
        let Submission { kind, args, reply } = submission;
        let command = Command::new(tag, kind, args);
        match command.kind {
            CommandKind::Login | CommandKind::Authenticate if self.state.login.is_some() => {
                self.set_phase(SessionPhase::Authenticating)
            }
            CommandKind::Logout => self.set_phase(SessionPhase::Closing),
            _ => {}
        }
        debug!(
            "[{}] writing command {} {}",
            self.id,
            command.tag,
            command.kind.verb()
        );
        self.state.current = Some(command.clone());
        self.state.reply = Some(reply);
        self.deadline = self.command_timeout.map(|t| Instant::now() + t);
        if let Err(err) = self.transport.write(&command).await {
            error!("[{}] write failed: {}", self.id, err);
            self.force_close().await;
        }
    }

    fn assign_tag(&mut self, kind: &CommandKind) -> u64 {
        if *kind == CommandKind::Blank {
            // The blank line finishes a stalled exchange; its terminal
            // response carries the tag of the command it unblocks.
            return self
                .state
                .current
                .as_ref()
                .map(|c| c.tag)
                .unwrap_or(self.state.next_tag);
        }
        let tag = self.state.next_tag;
        self.state.next_tag += 1;
        tag
    }

    async fn drain_backlog(&mut self) {
        while self.state.reply.is_none() {
            let Some(next) = self.backlog.pop_front() else {
                return;
            };
            self.install(next).await;
        }
    }

    // --- Inbound routing ---

    async fn handle_message(&mut self, response: Response) -> bool {
        match response {
            Response::Continuation { message } => {
                self.resolve_continuation(message).await;
                true
            }
            Response::Tagged {
                tag,
                status,
                message,
            } => {
                self.resolve_tagged(tag, status, message).await;
                true
            }
            Response::Event { kind, payload } => self.handle_event(kind, payload).await,
        }
    }

    async fn resolve_continuation(&mut self, message: String) {
        let Some(reply) = self.state.reply.take() else {
            self.report_violation(format!(
                "continuation {:?} with no outstanding command",
                message
            ));
            return;
        };
        self.deadline = None;
        // A continuation during the auth exchange is the server rejecting
        // the credentials; classify before the caller sees the handle.
        if self.awaiting_auth() {
            self.finish_login(Err(SessionError::auth_from_continuation(&message)));
        }
        let _ = reply.send(Ok(Response::Continuation { message }));
        self.drain_backlog().await;
    }

    async fn resolve_tagged(&mut self, tag: u64, status: ResponseStatus, message: String) {
        let Some(expected) = self.state.current.as_ref().map(|c| c.tag) else {
            self.report_violation(format!("tagged response {} with no outstanding command", tag));
            return;
        };
        if tag != expected {
            let detail = format!("expected tag {}, received {}", expected, tag);
            self.report_violation(detail.clone());
            if let Some(reply) = self.state.reply.take() {
                self.deadline = None;
                let _ = reply.send(Err(SessionError::ProtocolViolation(detail)));
                self.drain_backlog().await;
            }
            return;
        }
        let Some(reply) = self.state.reply.take() else {
            // The exchange was already handed to the caller via a
            // continuation; this is its terminal status.
            debug!("[{}] terminal response for continued exchange {}", self.id, tag);
            return;
        };
        self.deadline = None;
        if self.awaiting_auth() {
            let outcome = if status == ResponseStatus::Bad {
                Err(SessionError::AuthenticationFailed(message.clone()))
            } else {
                Ok(())
            };
            self.finish_login(outcome);
        }
        let _ = reply.send(Ok(Response::Tagged {
            tag,
            status,
            message,
        }));
        self.drain_backlog().await;
    }

    async fn handle_event(&mut self, kind: EventKind, payload: String) -> bool {
        match kind {
            EventKind::Bye => {
                let logging_out = matches!(
                    self.state.current.as_ref().map(|c| &c.kind),
                    Some(CommandKind::Logout)
                );
                if logging_out {
                    debug!("[{}] BYE during logout: {}", self.id, payload);
                    true
                } else if self.transport.is_open() {
                    warn!("[{}] server closed the session: {}", self.id, payload);
                    self.force_close().await;
                    false
                } else {
                    true
                }
            }
            EventKind::Info => {
                debug!("[{}] untagged: {}", self.id, payload);
                true
            }
        }
    }

    /// Idle notification: a liveness probe trigger, not a close. One NOOP
    /// per notification, admitted through the ordinary gate.
    async fn handle_idle(&mut self) {
        if !self.transport.is_open() {
            return;
        }
        debug!("[{}] idle interval elapsed, scheduling keepalive", self.id);
        let (reply, _) = oneshot::channel();
        self.handle_submission(Submission {
            kind: CommandKind::Noop,
            args: Vec::new(),
            reply,
        })
        .await;
    }

    // --- Login classification ---

    fn awaiting_auth(&self) -> bool {
        self.state.phase == SessionPhase::Authenticating
            && matches!(
                self.state.current.as_ref().map(|c| &c.kind),
                Some(CommandKind::Login | CommandKind::Authenticate)
            )
            && self.state.login.is_some()
    }

    fn finish_login(&mut self, outcome: Result<(), SessionError>) {
        let Some(login) = self.state.login.take() else {
            return;
        };
        match &outcome {
            Ok(()) => {
                info!("[{}] authenticated", self.id);
                self.set_phase(SessionPhase::Authenticated);
            }
            Err(err) => {
                warn!("[{}] authentication failed: {}", self.id, err);
                self.set_phase(SessionPhase::Closed);
                // Nudge the stalled exchange so the server finishes the
                // rejected handshake before the caller reacts.
                let (reply, _) = oneshot::channel();
                self.backlog.push_front(Submission {
                    kind: CommandKind::Blank,
                    args: Vec::new(),
                    reply,
                });
            }
        }
        let _ = login.send(outcome);
    }

    // --- Failure and shutdown paths ---

    async fn handle_command_timeout(&mut self) {
        let tag = self
            .state
            .current
            .as_ref()
            .map(|c| c.tag)
            .unwrap_or_default();
        error!("[{}] command {} timed out, closing session", self.id, tag);
        if let Some(reply) = self.state.reply.take() {
            let _ = reply.send(Err(SessionError::Timeout(format!(
                "no response for command {}",
                tag
            ))));
        }
        self.force_close().await;
    }

    async fn force_close(&mut self) {
        self.set_phase(SessionPhase::Closed);
        self.transport.close().await;
        self.fail_pending(SessionError::ConnectionClosed);
    }

    async fn shutdown(&mut self) {
        self.set_phase(SessionPhase::Closed);
        self.fail_pending(SessionError::ConnectionClosed);
        self.transport.close().await;
        debug!("[{}] session actor stopped", self.id);
    }

    /// Resolves every handle still pending; nothing is ever left hanging.
    fn fail_pending(&mut self, err: SessionError) {
        self.deadline = None;
        if let Some(reply) = self.state.reply.take() {
            let _ = reply.send(Err(err.clone()));
        }
        while let Some(pending) = self.backlog.pop_front() {
            let _ = pending.reply.send(Err(err.clone()));
        }
        if let Some(login) = self.state.login.take() {
            let _ = login.send(Err(err.clone()));
        }
    }

    fn report_violation(&self, detail: String) {
        self.violations.fetch_add(1, Ordering::SeqCst);
        error!("[{}] protocol violation: {}", self.id, detail);
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        if self.state.phase != phase {
            debug!("[{}] {:?} -> {:?}", self.id, self.state.phase, phase);
            self.state.phase = phase;
            let _ = self.phase_tx.send(phase);
        }
    }
}
