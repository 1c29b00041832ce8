use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{config::ServerConfig, error::RelayError, relay::Relay, session::Session};

pub type TcpRelay = Relay<OwnedWriteHalf>;

/// Pause after a failed `accept` so persistent errors such as EMFILE do not
/// spin the acceptor.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and runs one session task per client.
pub struct Server {
    listener: TcpListener,
    relay: Arc<TcpRelay>,
}

impl Server {
    /// Binds the configured address. Failing to bind is fatal.
    pub async fn bind(config: &ServerConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: &ServerConfig) -> Self {
        Self {
            listener,
            relay: Arc::new(Relay::new(config.write_timeout)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn relay(&self) -> Arc<TcpRelay> {
        Arc::clone(&self.relay)
    }

    /// Accepts until `shutdown` resolves. Sessions already running are left
    /// to finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, relay } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &relay).await;
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    relay: &Arc<TcpRelay>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, relay),
        Err(err) => {
            warn!(error = ?err, "failed to accept connection");
            sleep(ACCEPT_BACKOFF).await;
        }
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, relay: &Arc<TcpRelay>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = ?err, "failed to set TCP_NODELAY");
    }

    let (reader, writer) = stream.into_split();
    let session = Session::new(Arc::clone(relay), BufReader::new(reader), writer).with_peer(peer);
    info!(peer = %peer, id = session.id(), "new client connected");

    tokio::spawn(async move {
        let outcome = session.run().await;
        debug!(peer = %peer, ?outcome, "session finished");
    });
}
