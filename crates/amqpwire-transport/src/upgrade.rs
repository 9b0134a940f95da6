//! Security upgrade hook.
//!
//! A [`StreamUpgrade`] receives the raw TCP stream right after connect and
//! before any protocol byte is exchanged, and returns the stream that every
//! later read and write goes through. The handshake itself is the hook's
//! business; with the `tls` feature a rustls-backed [`RustlsUpgrade`] is
//! provided.

use tokio::net::TcpStream;

use crate::endpoint::Endpoint;
use crate::stream::AsyncStream;

/// Turns a raw TCP stream into a secured one.
#[async_trait::async_trait]
pub trait StreamUpgrade: Send + Sync {
    /// Run the handshake. On failure the raw stream is dropped, closing the socket.
    async fn upgrade(
        &self,
        stream: TcpStream,
        endpoint: &Endpoint,
    ) -> std::io::Result<Box<dyn AsyncStream>>;

    /// Name used in diagnostics.
    fn name(&self) -> &'static str {
        "custom"
    }
}

#[cfg(feature = "tls")]
pub use rustls_upgrade::RustlsUpgrade;

#[cfg(feature = "tls")]
mod rustls_upgrade {
    use std::io;
    use std::sync::Arc;

    use tokio::net::TcpStream;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;
    use tracing::debug;

    use super::StreamUpgrade;
    use crate::endpoint::Endpoint;
    use crate::stream::AsyncStream;

    /// TLS upgrade using rustls with the webpki root set, or a caller-built config.
    #[derive(Clone)]
    pub struct RustlsUpgrade {
        config: Arc<ClientConfig>,
    }

    impl RustlsUpgrade {
        /// Verify peers against the bundled webpki roots.
        pub fn with_webpki_roots() -> Self {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Self {
                config: Arc::new(config),
            }
        }

        /// Use an explicit client configuration (custom roots, client certificates).
        pub fn from_config(config: Arc<ClientConfig>) -> Self {
            Self { config }
        }
    }

    impl std::fmt::Debug for RustlsUpgrade {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RustlsUpgrade").finish_non_exhaustive()
        }
    }

    #[async_trait::async_trait]
    impl StreamUpgrade for RustlsUpgrade {
        async fn upgrade(
            &self,
            stream: TcpStream,
            endpoint: &Endpoint,
        ) -> io::Result<Box<dyn AsyncStream>> {
            let server_name = endpoint.tls_server_name().to_string();
            let domain = ServerName::try_from(server_name.clone()).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid server name '{server_name}': {e}"),
                )
            })?;

            debug!(server_name = %server_name, "starting tls handshake");
            let connector = TlsConnector::from(Arc::clone(&self.config));
            let tls = connector.connect(domain, stream).await?;
            Ok(Box::new(tls))
        }

        fn name(&self) -> &'static str {
            "rustls"
        }
    }
}
