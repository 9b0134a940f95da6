use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, FamilyPreference, TransportConfig};
use crate::error::{AddressFamily, ConnectAttempt, Result, TransportError};
use crate::stream::AmqpStream;
use crate::upgrade::StreamUpgrade;

/// Connect to `endpoint` with default timeouts.
pub async fn connect(endpoint: &Endpoint) -> Result<AmqpStream> {
    Connector::new(endpoint.clone()).connect().await
}

/// Connect with explicit transport configuration.
pub async fn connect_with_config(
    endpoint: &Endpoint,
    config: &TransportConfig,
) -> Result<AmqpStream> {
    Connector::new(endpoint.clone())
        .with_config(config.clone())
        .connect()
        .await
}

/// Builds a connected [`AmqpStream`] from an [`Endpoint`].
///
/// Resolution tries address families in the order given by the endpoint's
/// [`FamilyPreference`], bounds every attempt by `connect_timeout`, and applies
/// the security upgrade before returning when the endpoint asks for one.
#[derive(Clone)]
pub struct Connector {
    endpoint: Endpoint,
    config: TransportConfig,
    upgrade: Option<Arc<dyn StreamUpgrade>>,
}

impl Connector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            config: TransportConfig::default(),
            upgrade: None,
        }
    }

    /// Override timeouts and limits.
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the security upgrade used when the endpoint enables TLS.
    pub fn with_upgrade(mut self, upgrade: Arc<dyn StreamUpgrade>) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Resolve, connect and (optionally) upgrade.
    pub async fn connect(&self) -> Result<AmqpStream> {
        let addrs = resolve(&self.endpoint).await?;
        let tcp = connect_addrs(
            &self.endpoint.host,
            self.endpoint.port,
            &addrs,
            self.endpoint.family,
            self.config.connect_timeout,
        )
        .await?;
        tcp.set_nodelay(true)?;

        if !self.endpoint.tls.enabled {
            let stream = AmqpStream::from_tcp(tcp)?;
            info!(endpoint = %self.endpoint, addr = %stream.peer_addr(), "connected");
            return Ok(stream);
        }

        let stream = self.upgrade(tcp).await?;
        info!(endpoint = %self.endpoint, addr = %stream.peer_addr(), "connected with security upgrade");
        Ok(stream)
    }

    /// The handshake shares `connect_timeout` with the TCP connect.
    async fn upgrade(&self, tcp: TcpStream) -> Result<AmqpStream> {
        let local_addr = tcp.local_addr()?;
        let peer_addr = tcp.peer_addr()?;
        let upgrade = self.upgrade_hook()?;
        let timeout = self.config.connect_timeout;

        let result = match tokio::time::timeout(timeout, upgrade.upgrade(tcp, &self.endpoint)).await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("handshake timed out after {timeout:?}"),
            )),
        };

        match result {
            Ok(stream) => Ok(AmqpStream::from_upgraded(stream, local_addr, peer_addr)),
            Err(err) => {
                warn!(endpoint = %self.endpoint, upgrade = upgrade.name(), error = %err, "security upgrade failed");
                Err(TransportError::Upgrade(format!("{}: {err}", upgrade.name())))
            }
        }
    }

    fn upgrade_hook(&self) -> Result<Arc<dyn StreamUpgrade>> {
        if let Some(upgrade) = &self.upgrade {
            return Ok(Arc::clone(upgrade));
        }

        #[cfg(feature = "tls")]
        {
            return Ok(Arc::new(crate::upgrade::RustlsUpgrade::with_webpki_roots()));
        }

        #[cfg(not(feature = "tls"))]
        {
            Err(TransportError::Upgrade(format!(
                "tls requested for {} but no upgrade hook is configured (enable the `tls` feature)",
                self.endpoint
            )))
        }
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .field("upgrade", &self.upgrade.as_ref().map(|u| u.name()))
            .finish()
    }
}

async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>> {
    let host = endpoint.host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, endpoint.port)]);
    }

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, endpoint.port))
        .await
        .map_err(|source| TransportError::Resolve {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        })?
        .collect();
    debug!(host, count = addrs.len(), "resolved endpoint");
    Ok(addrs)
}

fn family_order(preference: FamilyPreference) -> &'static [AddressFamily] {
    match preference {
        FamilyPreference::PreferIpv6 => &[AddressFamily::Ipv6, AddressFamily::Ipv4],
        FamilyPreference::PreferIpv4 => &[AddressFamily::Ipv4, AddressFamily::Ipv6],
        FamilyPreference::Ipv6Only => &[AddressFamily::Ipv6],
        FamilyPreference::Ipv4Only => &[AddressFamily::Ipv4],
    }
}

fn family_of(addr: &SocketAddr) -> AddressFamily {
    match addr {
        SocketAddr::V4(_) => AddressFamily::Ipv4,
        SocketAddr::V6(_) => AddressFamily::Ipv6,
    }
}

fn new_socket(family: AddressFamily) -> io::Result<TcpSocket> {
    match family {
        AddressFamily::Ipv4 => TcpSocket::new_v4(),
        AddressFamily::Ipv6 => TcpSocket::new_v6(),
    }
}

async fn connect_addrs(
    host: &str,
    port: u16,
    addrs: &[SocketAddr],
    preference: FamilyPreference,
    timeout: Duration,
) -> Result<TcpStream> {
    connect_addrs_with(host, port, addrs, preference, timeout, |socket, addr| {
        socket.connect(addr)
    })
    .await
}

/// Try every address of every eligible family until one connects.
///
/// `dial` performs the connect on a freshly created socket. Failures are
/// collected rather than surfaced so that the next family gets its turn;
/// only the aggregate is returned.
async fn connect_addrs_with<T, F, Fut>(
    host: &str,
    port: u16,
    addrs: &[SocketAddr],
    preference: FamilyPreference,
    timeout: Duration,
    mut dial: F,
) -> Result<T>
where
    F: FnMut(TcpSocket, SocketAddr) -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempts = Vec::new();

    for &family in family_order(preference) {
        let candidates: Vec<SocketAddr> = addrs
            .iter()
            .copied()
            .filter(|addr| family_of(addr) == family)
            .collect();

        if candidates.is_empty() {
            attempts.push(ConnectAttempt {
                addr: None,
                family,
                error: io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no {family} address for {host}"),
                ),
            });
            continue;
        }

        for addr in candidates {
            // Socket creation fails when the platform lacks the family.
            let socket = match new_socket(family) {
                Ok(socket) => socket,
                Err(error) => {
                    debug!(%family, error = %error, "address family unsupported");
                    attempts.push(ConnectAttempt {
                        addr: Some(addr),
                        family,
                        error,
                    });
                    break;
                }
            };

            match tokio::time::timeout(timeout, dial(socket, addr)).await {
                Ok(Ok(stream)) => {
                    debug!(%addr, %family, "tcp connect succeeded");
                    return Ok(stream);
                }
                Ok(Err(error)) => {
                    debug!(%addr, %family, error = %error, "tcp connect failed");
                    attempts.push(ConnectAttempt {
                        addr: Some(addr),
                        family,
                        error,
                    });
                }
                Err(_) => {
                    debug!(%addr, %family, ?timeout, "tcp connect timed out");
                    attempts.push(ConnectAttempt {
                        addr: Some(addr),
                        family,
                        error: io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("connect timed out after {timeout:?}"),
                        ),
                    });
                }
            }
        }
    }

    Err(TransportError::ConnectFailure {
        host: host.to_string(),
        port,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::stream::AsyncStream;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn falls_back_to_ipv4_when_ipv6_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let v6_port = closed_port().await;

        let addrs: Vec<SocketAddr> = vec![
            format!("[::1]:{v6_port}").parse().unwrap(),
            format!("127.0.0.1:{port}").parse().unwrap(),
        ];

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = connect_addrs(
            "localhost",
            port,
            &addrs,
            FamilyPreference::PreferIpv6,
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        assert!(stream.peer_addr().unwrap().is_ipv4());
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_on_both_families_is_single_failure() {
        let port = closed_port().await;
        let addrs: Vec<SocketAddr> = vec![
            format!("[::1]:{port}").parse().unwrap(),
            format!("127.0.0.1:{port}").parse().unwrap(),
        ];

        let err = connect_addrs(
            "localhost",
            port,
            &addrs,
            FamilyPreference::PreferIpv6,
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

        match err {
            TransportError::ConnectFailure { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                assert_eq!(attempts[0].family, AddressFamily::Ipv6);
                assert_eq!(attempts[1].family, AddressFamily::Ipv4);
            }
            other => panic!("expected ConnectFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ipv6_only_never_tries_ipv4() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addrs: Vec<SocketAddr> = vec![format!("127.0.0.1:{port}").parse().unwrap()];

        let err = connect_addrs(
            "127.0.0.1",
            port,
            &addrs,
            FamilyPreference::Ipv6Only,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        match err {
            TransportError::ConnectFailure { attempts, .. } => {
                assert_eq!(attempts.len(), 1);
                assert!(attempts[0].addr.is_none());
                assert_eq!(attempts[0].family, AddressFamily::Ipv6);
            }
            other => panic!("expected ConnectFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prefer_ipv4_tries_ipv4_first() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let addrs: Vec<SocketAddr> = vec![
            format!("[::1]:{port}").parse().unwrap(),
            format!("127.0.0.1:{port}").parse().unwrap(),
        ];

        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = connect_addrs(
            "localhost",
            port,
            &addrs,
            FamilyPreference::PreferIpv4,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        assert!(stream.peer_addr().unwrap().is_ipv4());
        accept.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_attempt_is_bounded_by_timeout() {
        let addrs: Vec<SocketAddr> = vec![
            "192.0.2.1:5672".parse().unwrap(),
            "192.0.2.2:5672".parse().unwrap(),
        ];
        let started = tokio::time::Instant::now();
        let err = connect_addrs_with(
            "broker.test",
            5672,
            &addrs,
            FamilyPreference::Ipv4Only,
            Duration::from_millis(100),
            |_socket, _addr| std::future::pending::<io::Result<()>>(),
        )
        .await
        .unwrap_err();

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
        match err {
            TransportError::ConnectFailure { attempts, .. } => {
                assert_eq!(attempts.len(), 2);
                for attempt in &attempts {
                    assert!(attempt.addr.is_some());
                    assert_eq!(attempt.family, AddressFamily::Ipv4);
                    assert_eq!(attempt.error.kind(), io::ErrorKind::TimedOut);
                }
            }
            other => panic!("expected ConnectFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connector_connects_to_ip_literal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = connect(&Endpoint::new("127.0.0.1", port)).await.unwrap();
        assert_eq!(stream.peer_addr().port(), port);
        assert!(!stream.is_upgraded());
        accept.await.unwrap();
    }

    struct FailingUpgrade;

    #[async_trait::async_trait]
    impl StreamUpgrade for FailingUpgrade {
        async fn upgrade(
            &self,
            _stream: TcpStream,
            _endpoint: &Endpoint,
        ) -> io::Result<Box<dyn AsyncStream>> {
            Err(io::Error::new(io::ErrorKind::InvalidData, "bad certificate"))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct PlainUpgrade;

    #[async_trait::async_trait]
    impl StreamUpgrade for PlainUpgrade {
        async fn upgrade(
            &self,
            stream: TcpStream,
            _endpoint: &Endpoint,
        ) -> io::Result<Box<dyn AsyncStream>> {
            Ok(Box::new(stream))
        }
    }

    struct StalledUpgrade;

    #[async_trait::async_trait]
    impl StreamUpgrade for StalledUpgrade {
        async fn upgrade(
            &self,
            _stream: TcpStream,
            _endpoint: &Endpoint,
        ) -> io::Result<Box<dyn AsyncStream>> {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn stalled_upgrade_is_bounded_by_connect_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let endpoint = Endpoint::new("127.0.0.1", port).with_tls(None);
        let config = TransportConfig {
            connect_timeout: Duration::from_millis(150),
            ..TransportConfig::default()
        };
        let err = tokio::time::timeout(
            Duration::from_secs(5),
            Connector::new(endpoint)
                .with_config(config)
                .with_upgrade(Arc::new(StalledUpgrade))
                .connect(),
        )
        .await
        .expect("connect must not hang on a stalled handshake")
        .unwrap_err();

        match err {
            TransportError::Upgrade(msg) => {
                assert!(msg.contains("stalled"));
                assert!(msg.contains("timed out"));
            }
            other => panic!("expected Upgrade, got {other:?}"),
        }
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn failed_upgrade_surfaces_upgrade_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let endpoint = Endpoint::new("127.0.0.1", port).with_tls(Some("broker".to_string()));
        let err = Connector::new(endpoint)
            .with_upgrade(Arc::new(FailingUpgrade))
            .connect()
            .await
            .unwrap_err();

        match err {
            TransportError::Upgrade(msg) => assert!(msg.contains("failing")),
            other => panic!("expected Upgrade, got {other:?}"),
        }
        accept.await.unwrap();
    }

    #[tokio::test]
    async fn successful_upgrade_marks_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let endpoint = Endpoint::new("127.0.0.1", port).with_tls(None);
        let stream = Connector::new(endpoint)
            .with_upgrade(Arc::new(PlainUpgrade))
            .connect()
            .await
            .unwrap();
        assert!(stream.is_upgraded());
        assert_eq!(stream.peer_addr().port(), port);
        accept.await.unwrap();
    }

    #[cfg(not(feature = "tls"))]
    #[tokio::test]
    async fn tls_without_hook_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let endpoint = Endpoint::new("127.0.0.1", port).with_tls(None);
        let err = Connector::new(endpoint).connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Upgrade(_)));
        accept.await.unwrap();
    }
}
