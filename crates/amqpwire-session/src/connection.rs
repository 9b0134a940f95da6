//! Reference connection: owns the frame transport and the session table,
//! runs the single reader loop and broadcasts connection shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use amqpwire_frame::{Frame, FrameError, FrameTransport, FrameType, FRAME_OVERHEAD};
use amqpwire_transport::{Endpoint, ProtocolVersion, TransportConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::command::{Command, MethodId};
use crate::error::{Result, SessionError};
use crate::kind::ChannelKind;
use crate::reason::{
    Initiator, ShutdownReason, CONNECTION_FORCED, FRAME_ERROR, INTERNAL_ERROR, REPLY_SUCCESS,
};
use crate::session::{CommandHandler, Session, SessionHost};
use crate::signal::ShutdownSignal;

/// Commands that may still be sent on a closed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClosedSendPolicy {
    allowed: HashSet<MethodId>,
}

impl ClosedSendPolicy {
    pub fn new(allowed: impl IntoIterator<Item = MethodId>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn allows(&self, command: &Command) -> bool {
        command
            .method_id()
            .is_some_and(|id| self.allowed.contains(&id))
    }
}

impl Default for ClosedSendPolicy {
    /// `channel.close` and `channel.close-ok`, so the closing handshake can
    /// finish on a channel that is already closed locally.
    fn default() -> Self {
        Self::new([MethodId::CHANNEL_CLOSE, MethodId::CHANNEL_CLOSE_OK])
    }
}

/// Connection-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub closed_send_policy: ClosedSendPolicy,
    /// Negotiated frame-max (whole frame, header and end marker included).
    /// Zero keeps the transport's payload ceiling.
    pub max_frame_size: usize,
}

impl ConnectionConfig {
    /// Reject a frame-max too small to carry any payload.
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size != 0 && self.max_frame_size <= FRAME_OVERHEAD {
            return Err(SessionError::InvalidConfig(format!(
                "max_frame_size {} leaves no room for payload (frame overhead is {FRAME_OVERHEAD} bytes)",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

/// One broker connection multiplexing many sessions.
pub struct Connection {
    transport: FrameTransport,
    protocol: ProtocolVersion,
    config: ConnectionConfig,
    sessions: Mutex<HashMap<u16, Arc<Session>>>,
    shutdown: ShutdownSignal,
}

impl Connection {
    /// Wrap a connected transport.
    ///
    /// Fails with [`SessionError::InvalidConfig`] if `config` does not
    /// validate.
    pub fn new(transport: FrameTransport, config: ConnectionConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let protocol = transport
            .endpoint()
            .map(|e| e.protocol)
            .unwrap_or_default();
        if config.max_frame_size != 0 {
            transport.set_max_payload_size(config.max_frame_size - FRAME_OVERHEAD);
        }

        Ok(Arc::new(Self {
            transport,
            protocol,
            config,
            sessions: Mutex::new(HashMap::new()),
            shutdown: ShutdownSignal::new(),
        }))
    }

    /// Connect, send the protocol header, and wrap the transport.
    pub async fn connect(
        endpoint: Endpoint,
        transport_config: TransportConfig,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let transport = FrameTransport::connect(endpoint, transport_config).await?;
        if let Err(err) = transport.send_protocol_header().await {
            transport.close().await;
            return Err(err.into());
        }
        info!(remote = %transport.remote_addr(), "connection established");
        Self::new(transport, config)
    }

    /// Register a session on `channel`.
    ///
    /// Fails with [`SessionError::ChannelInUse`] if the channel is taken and
    /// with [`SessionError::AlreadyClosed`] once the connection is shut down.
    /// The session leaves the table by itself when it closes.
    pub fn open_session(
        self: &Arc<Self>,
        channel: u16,
        kind: ChannelKind,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Arc<Session>> {
        if let Some(reason) = self.shutdown.reason() {
            return Err(SessionError::AlreadyClosed(reason.clone()));
        }

        let host: Arc<dyn SessionHost> = self.clone();
        let session = {
            let mut sessions = self.sessions();
            if sessions.contains_key(&channel) {
                return Err(SessionError::ChannelInUse(channel));
            }
            let session = Session::open(channel, kind, handler, &host);
            sessions.insert(channel, Arc::clone(&session));
            session
        };

        let connection: Weak<Self> = Arc::downgrade(self);
        let weak_session = Arc::downgrade(&session);
        session.add_shutdown_listener(move |_| {
            if let Some(connection) = connection.upgrade() {
                connection.forget_session(channel, &weak_session);
            }
        });
        Ok(session)
    }

    pub fn session(&self, channel: u16) -> Option<Arc<Session>> {
        self.sessions().get(&channel).cloned()
    }

    /// Remove a session from the table without closing it.
    pub fn remove_session(&self, channel: u16) -> Option<Arc<Session>> {
        self.sessions().remove(&channel)
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Read frames and route them to sessions until the transport fails
    /// or is closed. Returns the connection's shutdown reason.
    pub async fn run_reader(&self) -> ShutdownReason {
        loop {
            match self.transport.read_frame().await {
                Ok(frame) => self.dispatch(frame),
                Err(err) => {
                    let reason = reason_for(err);
                    if !matches!(reason.initiator(), Initiator::Local) {
                        warn!(reason = %reason, "connection reader stopped");
                    }
                    self.shutdown.fire(reason);
                    self.transport.close().await;
                    break;
                }
            }
        }

        match self.shutdown.reason() {
            Some(reason) => reason.clone(),
            None => ShutdownReason::local(REPLY_SUCCESS, "reader stopped"),
        }
    }

    fn dispatch(&self, frame: Frame) {
        let channel = frame.channel;
        let Some(session) = self.session(channel) else {
            if frame.frame_type == FrameType::Heartbeat {
                trace!("heartbeat received");
            } else {
                warn!(channel, frame_type = %frame.frame_type, "dropping frame for unknown channel");
            }
            return;
        };

        if let Err(err) = session.handle_frame(frame) {
            debug!(channel, error = %err, "session rejected frame");
        }
    }

    /// Shut the connection down: every session closes with `reason`, then
    /// the transport is closed. Returns whether this call set the reason.
    pub async fn close(&self, reason: ShutdownReason) -> bool {
        let first = self.shutdown.fire(reason);
        self.transport.close().await;
        first
    }

    pub fn close_reason(&self) -> Option<&ShutdownReason> {
        self.shutdown.reason()
    }

    pub fn is_open(&self) -> bool {
        !self.shutdown.is_set()
    }

    /// Send a heartbeat on channel 0.
    pub async fn send_heartbeat(&self) -> Result<()> {
        self.transport.write_frame(&Frame::heartbeat()).await?;
        Ok(())
    }

    /// Frame-max used to split outgoing content bodies.
    pub fn frame_max(&self) -> usize {
        match self.config.max_frame_size {
            0 => self.transport.max_payload_size() + FRAME_OVERHEAD,
            n => n,
        }
    }

    pub fn transport(&self) -> &FrameTransport {
        &self.transport
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn forget_session(&self, channel: u16, session: &Weak<Session>) {
        let mut sessions = self.sessions();
        let same = sessions
            .get(&channel)
            .is_some_and(|current| Weak::ptr_eq(&Arc::downgrade(current), session));
        if same {
            sessions.remove(&channel);
            debug!(channel, "session removed");
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u16, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl SessionHost for Connection {
    fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    fn can_send_while_closed(&self, command: &Command) -> bool {
        self.config.closed_send_policy.allows(command)
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn write_frames(&self, frames: &[Frame]) -> amqpwire_frame::Result<()> {
        self.transport.write_frames(frames).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("protocol", &self.protocol)
            .field("sessions", &self.session_count())
            .field("close_reason", &self.shutdown.reason())
            .finish()
    }
}

/// Map a reader failure to the reason broadcast to every session.
fn reason_for(err: FrameError) -> ShutdownReason {
    match err {
        FrameError::Shutdown => ShutdownReason::local(REPLY_SUCCESS, "connection closed locally"),
        FrameError::ConnectionClosed => {
            ShutdownReason::peer(CONNECTION_FORCED, "connection closed by peer")
        }
        err if err.is_protocol_violation() => {
            ShutdownReason::error(FRAME_ERROR, err.to_string()).with_cause(err)
        }
        err => ShutdownReason::error(INTERNAL_ERROR, err.to_string()).with_cause(err),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use amqpwire_frame::encode_frame;
    use bytes::BytesMut;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::kind::MethodIdClassifier;
    use crate::session::SessionState;

    const QOS_OK: &[u8] = b"\x00\x3c\x00\x0b";

    async fn connected() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let connection = Connection::connect(
            Endpoint::new("127.0.0.1", port),
            TransportConfig::default(),
            ConnectionConfig::default(),
        )
        .await
        .unwrap();
        let mut broker = accept.await.unwrap();

        let mut header = [0u8; 8];
        broker.read_exact(&mut header).await.unwrap();
        assert_eq!(&header, b"AMQP\x00\x00\x09\x01");
        (connection, broker)
    }

    fn counting() -> (Arc<AtomicUsize>, Arc<dyn CommandHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = Arc::clone(&count);
        let handler: Arc<dyn CommandHandler> =
            Arc::new(move |_: &Session, _: Command| -> Result<()> {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        (count, handler)
    }

    fn wire(frames: &[Frame]) -> BytesMut {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn default_policy_allows_channel_close_handshake() {
        let policy = ClosedSendPolicy::default();
        assert!(policy.allows(&Command::method(1, &b"\x00\x14\x00\x28"[..])));
        assert!(policy.allows(&Command::method(1, &b"\x00\x14\x00\x29"[..])));
        assert!(!policy.allows(&Command::method(1, QOS_OK)));
        assert!(!policy.allows(&Command::heartbeat()));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ConnectionConfig = serde_json::from_str(r#"{"max_frame_size": 131072}"#).unwrap();
        assert_eq!(config.max_frame_size, 131072);
        assert_eq!(config.closed_send_policy, ClosedSendPolicy::default());

        let custom: ConnectionConfig = serde_json::from_str(
            r#"{"closed_send_policy": [{"class_id": 10, "method_id": 51}]}"#,
        )
        .unwrap();
        assert!(custom
            .closed_send_policy
            .allows(&Command::method(0, &b"\x00\x0a\x00\x33"[..])));
    }

    #[test]
    fn frame_max_without_room_for_payload_is_rejected() {
        for max_frame_size in 1..=FRAME_OVERHEAD {
            let config = ConnectionConfig {
                max_frame_size,
                ..ConnectionConfig::default()
            };
            assert!(matches!(config.validate(), Err(SessionError::InvalidConfig(_))));
        }

        let smallest = ConnectionConfig {
            max_frame_size: FRAME_OVERHEAD + 1,
            ..ConnectionConfig::default()
        };
        assert!(smallest.validate().is_ok());
        assert!(ConnectionConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn connect_rejects_tiny_frame_max_before_dialing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ConnectionConfig {
            max_frame_size: 8,
            ..ConnectionConfig::default()
        };

        let err = Connection::connect(
            Endpoint::new("127.0.0.1", port),
            TransportConfig::default(),
            config,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SessionError::InvalidConfig(_)));

        let accepted =
            tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(accepted.is_err(), "no connection should have been attempted");
    }

    #[test]
    fn reader_failures_map_to_reply_codes() {
        let malformed = reason_for(FrameError::Malformed("bad end".into()));
        assert_eq!(malformed.reply_code(), FRAME_ERROR);
        assert_eq!(malformed.initiator(), Initiator::Error);

        let reset = reason_for(FrameError::ConnectionReset);
        assert_eq!(reset.reply_code(), INTERNAL_ERROR);

        let eof = reason_for(FrameError::ConnectionClosed);
        assert_eq!(eof.reply_code(), CONNECTION_FORCED);
        assert_eq!(eof.initiator(), Initiator::Peer);
    }

    #[tokio::test]
    async fn routes_frames_by_channel() {
        let (connection, mut broker) = connected().await;
        let (ch1, h1) = counting();
        let (ch2, h2) = counting();
        connection.open_session(1, ChannelKind::method(), h1).unwrap();
        connection
            .open_session(
                2,
                ChannelKind::content(Arc::new(MethodIdClassifier::basic())),
                h2,
            )
            .unwrap();

        let reader = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run_reader().await })
        };

        let mut header = Vec::from(&b"\x00\x3c\x00\x00"[..]);
        header.extend_from_slice(&3u64.to_be_bytes());
        header.extend_from_slice(&[0, 0]);
        broker
            .write_all(&wire(&[
                Frame::method(1, QOS_OK),
                Frame::method(9, QOS_OK),
                Frame::method(2, &b"\x00\x3c\x00\x3c"[..]),
                Frame::header(2, header),
                Frame::body(2, &b"abc"[..]),
                Frame::heartbeat(),
            ]))
            .await
            .unwrap();
        drop(broker);

        let reason = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason.reply_code(), CONNECTION_FORCED);
        assert_eq!(ch1.load(Ordering::SeqCst), 1);
        assert_eq!(ch2.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_frame_shuts_every_session() {
        let (connection, mut broker) = connected().await;
        let sessions: Vec<_> = (1..=3)
            .map(|ch| {
                let (_, handler) = counting();
                connection
                    .open_session(ch, ChannelKind::method(), handler)
                    .unwrap()
            })
            .collect();

        let mut bad = wire(&[Frame::method(1, QOS_OK)]);
        let last = bad.len() - 1;
        bad[last] = 0x00;
        broker.write_all(&bad).await.unwrap();

        let reason = connection.run_reader().await;
        assert_eq!(reason.reply_code(), FRAME_ERROR);
        assert!(connection.transport().is_closed());
        for session in &sessions {
            assert_eq!(session.state(), SessionState::Closed);
            assert_eq!(session.close_reason().unwrap().reply_code(), FRAME_ERROR);
        }
        assert_eq!(connection.session_count(), 0);
        assert_eq!(connection.shutdown_signal().listener_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_channel_rejected_and_closed_channel_reusable() {
        let (connection, _broker) = connected().await;
        let (_, handler) = counting();
        let session = connection
            .open_session(4, ChannelKind::method(), Arc::clone(&handler))
            .unwrap();

        assert!(matches!(
            connection.open_session(4, ChannelKind::method(), Arc::clone(&handler)),
            Err(SessionError::ChannelInUse(4))
        ));

        session.close(ShutdownReason::local(REPLY_SUCCESS, "done"), true);
        assert!(connection.session(4).is_none());
        connection
            .open_session(4, ChannelKind::method(), handler)
            .unwrap();
    }

    #[tokio::test]
    async fn local_close_stops_reader_and_rejects_new_sessions() {
        let (connection, _broker) = connected().await;
        let (_, handler) = counting();
        let session = connection
            .open_session(1, ChannelKind::method(), Arc::clone(&handler))
            .unwrap();

        let reader = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.run_reader().await })
        };
        tokio::task::yield_now().await;

        assert!(connection
            .close(ShutdownReason::local(REPLY_SUCCESS, "application exit"))
            .await);
        assert!(!connection
            .close(ShutdownReason::local(REPLY_SUCCESS, "again"))
            .await);

        let reason = reader.await.unwrap();
        assert_eq!(reason.reply_text(), "application exit");
        assert_eq!(session.close_reason().unwrap().reply_text(), "application exit");
        assert!(matches!(
            connection.open_session(2, ChannelKind::method(), handler),
            Err(SessionError::AlreadyClosed(_))
        ));
    }

    #[tokio::test]
    async fn transmit_goes_out_as_one_batch() {
        let (connection, mut broker) = connected().await;
        let (_, handler) = counting();
        let session = connection
            .open_session(
                3,
                ChannelKind::content(Arc::new(MethodIdClassifier::basic())),
                handler,
            )
            .unwrap();

        let mut header = Vec::from(&b"\x00\x3c\x00\x00"[..]);
        header.extend_from_slice(&4u64.to_be_bytes());
        let publish = Command::content(3, &b"\x00\x3c\x00\x28"[..], header, &b"body"[..], 0);
        session.transmit(&publish).await.unwrap();

        let expected = wire(publish.frames());
        let mut received = vec![0u8; expected.len()];
        broker.read_exact(&mut received).await.unwrap();
        assert_eq!(received, expected.as_ref());
        assert_eq!(publish.frames()[2].frame_type, FrameType::Body);

        assert_eq!(
            connection.frame_max(),
            amqpwire_transport::DEFAULT_MAX_PAYLOAD + FRAME_OVERHEAD
        );
        assert_eq!(session.protocol_version(), Some(ProtocolVersion::AMQP_0_9_1));
        connection.send_heartbeat().await.unwrap();
        let mut beat = [0u8; 8];
        broker.read_exact(&mut beat).await.unwrap();
        assert_eq!(beat[0], FrameType::Heartbeat.as_u8());
    }
}
