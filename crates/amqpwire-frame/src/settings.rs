use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::codec::FrameConfig;

/// Live frame I/O settings shared by a reader, a writer and their owner.
///
/// Values are atomics so a setter never waits behind an in-flight read or
/// write. A stored timeout of zero nanoseconds means "no timeout".
#[derive(Debug)]
pub struct FrameSettings {
    max_payload_size: AtomicUsize,
    read_timeout_nanos: AtomicU64,
    write_timeout_nanos: AtomicU64,
}

impl FrameSettings {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_payload_size: AtomicUsize::new(config.max_payload_size),
            read_timeout_nanos: AtomicU64::new(to_nanos(config.read_timeout)),
            write_timeout_nanos: AtomicU64::new(to_nanos(config.write_timeout)),
        }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size.load(Ordering::Acquire)
    }

    pub fn set_max_payload_size(&self, max_payload_size: usize) {
        self.max_payload_size
            .store(max_payload_size, Ordering::Release);
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        from_nanos(self.read_timeout_nanos.load(Ordering::Acquire))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) {
        self.read_timeout_nanos
            .store(to_nanos(timeout), Ordering::Release);
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        from_nanos(self.write_timeout_nanos.load(Ordering::Acquire))
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) {
        self.write_timeout_nanos
            .store(to_nanos(timeout), Ordering::Release);
    }

    /// Snapshot of the current values.
    pub fn snapshot(&self) -> FrameConfig {
        FrameConfig {
            max_payload_size: self.max_payload_size(),
            read_timeout: self.read_timeout(),
            write_timeout: self.write_timeout(),
        }
    }
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

fn to_nanos(timeout: Option<Duration>) -> u64 {
    timeout
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

fn from_nanos(nanos: u64) -> Option<Duration> {
    (nanos != 0).then(|| Duration::from_nanos(nanos))
}

/// Reject `Some(Duration::ZERO)`, mirroring socket timeout semantics.
pub fn validate_timeout(timeout: Option<Duration>) -> io::Result<()> {
    if timeout == Some(Duration::ZERO) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot set a zero duration timeout",
        ));
    }
    Ok(())
}

/// Run `op`, failing with `TimedOut` if it outlives `timeout`.
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    what: &'static str,
    op: F,
) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, op).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{what} timed out after {limit:?}"),
            )
        })?,
        None => op.await,
    }
}
