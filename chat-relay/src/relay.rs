use std::{io, time::Duration};

use tokio::{io::AsyncWrite, time::timeout};
use tracing::{debug, warn};

use crate::{message::Message, registry::PeerRegistry, wire::write_encoded};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub failed: usize,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.attempted - self.failed
    }
}

/// Fans messages out to every registered peer.
pub struct Relay<W> {
    registry: PeerRegistry<W>,
    write_timeout: Option<Duration>,
}

impl<W> Relay<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(write_timeout: Option<Duration>) -> Self {
        Self {
            registry: PeerRegistry::new(),
            write_timeout,
        }
    }

    pub fn registry(&self) -> &PeerRegistry<W> {
        &self.registry
    }

    /// Writes `message` to every peer registered when the lock is taken.
    ///
    /// The registry stays locked for the whole fan-out. A failed write is
    /// logged and counted but the peer stays registered: only its own
    /// session removes it.
    pub async fn broadcast(&self, message: &Message) -> BroadcastReport {
        let encoded = match message.encode() {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(kind = message.kind(), ?error, "failed to encode broadcast");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut peers = self.registry.lock().await;
        for (id, writer) in peers.iter_mut() {
            report.attempted += 1;
            if let Err(error) = self.deliver(writer, &encoded).await {
                report.failed += 1;
                warn!(peer = id, kind = message.kind(), ?error, "failed to deliver broadcast");
            }
        }
        drop(peers);

        debug!(
            kind = message.kind(),
            attempted = report.attempted,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    async fn deliver(&self, writer: &mut W, encoded: &[u8]) -> io::Result<()> {
        match self.write_timeout {
            Some(limit) => timeout(limit, write_encoded(writer, encoded))
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer write timed out"))?,
            None => write_encoded(writer, encoded).await,
        }
    }
}
