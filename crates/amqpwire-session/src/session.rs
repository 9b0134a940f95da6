use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use amqpwire_frame::{Frame, CONNECTION_CHANNEL};
use amqpwire_transport::ProtocolVersion;
use tracing::{debug, trace, warn};

use crate::command::Command;
use crate::error::{Result, SessionError};
use crate::kind::{ChannelKind, FrameAssembler};
use crate::reason::{ShutdownReason, INTERNAL_ERROR, UNEXPECTED_FRAME};
use crate::signal::{ListenerId, ShutdownSignal};

/// What a session needs from the connection that owns it.
#[async_trait::async_trait]
pub trait SessionHost: Send + Sync {
    /// Connection-wide shutdown broadcast.
    fn shutdown_signal(&self) -> &ShutdownSignal;

    /// Whether `command` may still be sent on a channel that is closed.
    fn can_send_while_closed(&self, command: &Command) -> bool;

    fn protocol_version(&self) -> ProtocolVersion;

    /// Write frames as one contiguous batch.
    async fn write_frames(&self, frames: &[Frame]) -> amqpwire_frame::Result<()>;
}

/// Receives commands reassembled on a session.
///
/// Runs on the connection's reader task, so it must not block for long.
/// An error closes the session.
pub trait CommandHandler: Send + Sync {
    fn handle_command(&self, session: &Session, command: Command) -> Result<()>;
}

impl<F> CommandHandler for F
where
    F: Fn(&Session, Command) -> Result<()> + Send + Sync,
{
    fn handle_command(&self, session: &Session, command: Command) -> Result<()> {
        self(session, command)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    /// Close reason recorded, listeners not yet notified.
    Closing,
    Closed,
}

/// One logical channel on a connection.
pub struct Session {
    channel: u16,
    kind_name: &'static str,
    shutdown: ShutdownSignal,
    assembler: Mutex<ChannelKind>,
    handler: Arc<dyn CommandHandler>,
    host: Weak<dyn SessionHost>,
    subscription: Mutex<Option<ListenerId>>,
}

impl Session {
    /// Create a session and, unless it is the connection channel, subscribe
    /// it to the host's shutdown signal.
    ///
    /// If the host is already shut down the session comes back closed with
    /// the host's reason.
    pub fn open(
        channel: u16,
        kind: ChannelKind,
        handler: Arc<dyn CommandHandler>,
        host: &Arc<dyn SessionHost>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            channel,
            kind_name: kind.name(),
            shutdown: ShutdownSignal::new(),
            assembler: Mutex::new(kind),
            handler,
            host: Arc::downgrade(host),
            subscription: Mutex::new(None),
        });

        if channel != CONNECTION_CHANNEL {
            let weak = Arc::downgrade(&session);
            let id = host.shutdown_signal().add_listener(move |reason| {
                if let Some(session) = weak.upgrade() {
                    session.on_connection_shutdown(reason);
                }
            });

            if let Some(id) = id {
                *lock(&session.subscription) = Some(id);
                // A close may have raced the registration; drop the subscription then.
                if !session.is_open() {
                    session.unsubscribe();
                }
            }
        }

        debug!(channel, kind = session.kind_name, "session opened");
        session
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Name of the channel kind ("control", "method", "content").
    pub fn kind_name(&self) -> &'static str {
        self.kind_name
    }

    pub fn state(&self) -> SessionState {
        if !self.shutdown.is_set() {
            SessionState::Open
        } else if !self.shutdown.is_notified() {
            SessionState::Closing
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_set()
    }

    pub fn close_reason(&self) -> Option<&ShutdownReason> {
        self.shutdown.reason()
    }

    /// Record the close reason. Only the first call takes effect; later
    /// calls leave the recorded reason untouched. With `notify`, shutdown
    /// listeners run before this returns.
    ///
    /// Returns whether this call recorded the reason.
    pub fn close(&self, reason: ShutdownReason, notify: bool) -> bool {
        let first = self.shutdown.set(reason);
        if let (true, Some(reason)) = (first, self.shutdown.reason()) {
            debug!(channel = self.channel, reason = %reason, "session closing");
        }
        if notify {
            self.notify();
        }
        first
    }

    /// Run the shutdown listeners and detach from the connection's
    /// shutdown signal.
    ///
    /// # Panics
    ///
    /// Panics if no close reason has been recorded.
    pub fn notify(&self) {
        self.shutdown.notify();
        self.unsubscribe();
    }

    /// Register a shutdown listener. If the session is already closing the
    /// listener runs immediately and `None` is returned.
    pub fn add_shutdown_listener<F>(&self, listener: F) -> Option<ListenerId>
    where
        F: FnOnce(&ShutdownReason) + Send + 'static,
    {
        self.shutdown.add_listener(listener)
    }

    pub fn remove_shutdown_listener(&self, id: ListenerId) -> bool {
        self.shutdown.remove_listener(id)
    }

    /// Wait for the session's shutdown notification.
    pub async fn closed(&self) -> ShutdownReason {
        self.shutdown.wait().await
    }

    /// A connection-wide shutdown closes the session with the same reason.
    pub fn on_connection_shutdown(&self, reason: &ShutdownReason) {
        self.close(reason.clone(), true);
    }

    /// Feed one inbound frame.
    ///
    /// Frames arriving after close are dropped. An assembly or handler
    /// error closes the session and is returned for logging.
    pub fn handle_frame(&self, frame: Frame) -> Result<()> {
        if frame.channel != self.channel {
            return Err(SessionError::ChannelMismatch {
                expected: self.channel,
                actual: frame.channel,
            });
        }
        if !self.is_open() {
            trace!(channel = self.channel, frame_type = %frame.frame_type, "dropping frame for closed session");
            return Ok(());
        }

        let assembled = lock(&self.assembler).push(frame);
        let result = match assembled {
            Ok(None) => return Ok(()),
            Ok(Some(command)) => self.handler.handle_command(self, command),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            let code = match err {
                SessionError::UnexpectedFrame { .. } => UNEXPECTED_FRAME,
                _ => INTERNAL_ERROR,
            };
            warn!(channel = self.channel, error = %err, "closing session after inbound failure");
            lock(&self.assembler).reset();
            self.close(ShutdownReason::error(code, err.to_string()), true);
        }
        result
    }

    /// Send one command.
    ///
    /// On a closed session only commands the host allows while closed go
    /// out; anything else fails with [`SessionError::AlreadyClosed`]. The
    /// check and the write are separate steps, so a close racing an
    /// in-flight transmit may let that one command through.
    pub async fn transmit(&self, command: &Command) -> Result<()> {
        self.transmit_all(std::slice::from_ref(command)).await
    }

    /// Send several commands as one contiguous write.
    pub async fn transmit_all(&self, commands: &[Command]) -> Result<()> {
        let host = self.host.upgrade().ok_or(SessionError::HostGone)?;

        for command in commands {
            if command.channel() != self.channel {
                return Err(SessionError::ChannelMismatch {
                    expected: self.channel,
                    actual: command.channel(),
                });
            }
            if let Some(reason) = self.close_reason() {
                if !host.can_send_while_closed(command) {
                    return Err(SessionError::AlreadyClosed(reason.clone()));
                }
            }
        }

        let frames: Vec<Frame> = commands
            .iter()
            .flat_map(|c| c.frames().iter().cloned())
            .collect();
        host.write_frames(&frames).await?;
        Ok(())
    }

    /// Protocol version of the owning connection.
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.host.upgrade().map(|host| host.protocol_version())
    }

    fn unsubscribe(&self) {
        let Some(id) = lock(&self.subscription).take() else {
            return;
        };
        if let Some(host) = self.host.upgrade() {
            host.shutdown_signal().remove_listener(id);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("channel", &self.channel)
            .field("kind", &self.kind_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
