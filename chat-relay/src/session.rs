//! Server side of one client connection.
//!
//! A session moves through `AwaitingName -> Named -> Closed`. It owns the
//! connection until the name is accepted, then lends its write half to the
//! registry so broadcasts can reach it, and takes it back on the way out.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
    message::Message,
    registry::PeerId,
    relay::Relay,
    wire::{NAME_ACCEPTED, SUBMIT_NAME, WireValue, read_value, write_value},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Closed before a name was accepted. Nothing was announced.
    Abandoned,
    /// Was named, has been unregistered, and its departure was announced.
    Departed { name: String },
}

pub struct Session<R, W> {
    id: PeerId,
    peer: Option<SocketAddr>,
    reader: R,
    writer: W,
    relay: Arc<Relay<W>>,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(relay: Arc<Relay<W>>, reader: R, writer: W) -> Self {
        Self {
            id: relay.registry().next_id(),
            peer: None,
            reader,
            writer,
            relay,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Drives the connection to completion. Cleanup always runs; errors end
    /// the session but are never propagated to other sessions.
    pub async fn run(self) -> SessionOutcome {
        let Session {
            id,
            peer,
            mut reader,
            mut writer,
            relay,
        } = self;

        let name = match negotiate_name(&mut reader, &mut writer).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                debug!(id, ?peer, "connection closed before handshake");
                close_writer(writer, id).await;
                return SessionOutcome::Abandoned;
            }
            Err(error) => {
                warn!(id, ?peer, ?error, "handshake failed");
                close_writer(writer, id).await;
                return SessionOutcome::Abandoned;
            }
        };

        if let Err(error) = write_value(&mut writer, &WireValue::text(NAME_ACCEPTED)).await {
            warn!(id, ?peer, %name, ?error, "failed to confirm name");
            close_writer(writer, id).await;
            return SessionOutcome::Abandoned;
        }

        info!(id, ?peer, %name, "client joined");
        relay.broadcast(&Message::Join(name.clone())).await;
        if let Err(writer) = relay.registry().add(id, writer).await {
            warn!(id, %name, "peer id already registered");
            close_writer(writer, id).await;
            return SessionOutcome::Abandoned;
        }

        match relay_messages(&mut reader, &relay, &name).await {
            Ok(()) => info!(id, ?peer, %name, "client disconnected"),
            Err(error) => info!(id, ?peer, %name, ?error, "client connection closed with error"),
        }

        // Still registered here, so the departing peer is attempted too.
        relay.broadcast(&Message::Leave(name.clone())).await;
        if let Some(writer) = relay.registry().remove(id).await {
            close_writer(writer, id).await;
        }

        SessionOutcome::Departed { name }
    }
}

/// Prompts until the client submits a name that is non-empty once trimmed.
/// `Ok(None)` means the client went away first; a binary value ends the
/// handshake with an error.
async fn negotiate_name<R, W>(reader: &mut R, writer: &mut W) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        write_value(writer, &WireValue::text(SUBMIT_NAME))
            .await
            .context("failed to request name")?;

        match read_value(reader).await.context("failed to read name")? {
            Some(WireValue::Text(candidate)) => {
                let name = candidate.trim();
                if !name.is_empty() {
                    return Ok(Some(name.to_string()));
                }
                debug!("invalid name, requesting again");
            }
            Some(WireValue::Binary(_)) => bail!("expected a name, got a binary payload"),
            None => return Ok(None),
        }
    }
}

/// Forwards everything the client sends until end of stream or a decode error.
async fn relay_messages<R, W>(reader: &mut R, relay: &Relay<W>, name: &str) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    while let Some(value) = read_value(reader).await.context("failed to read message")? {
        let message = match value {
            WireValue::Text(body) => Message::Text {
                sender: name.to_string(),
                body,
            },
            WireValue::Binary(bytes) => Message::Image {
                sender: name.to_string(),
                bytes,
            },
        };
        relay.broadcast(&message).await;
    }
    Ok(())
}

async fn close_writer<W>(mut writer: W, id: PeerId)
where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = writer.shutdown().await {
        warn!(id, ?error, "failed to close client connection");
    }
}
