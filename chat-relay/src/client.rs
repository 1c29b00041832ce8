//! Client side of the protocol, for whatever renders the chat.
//!
//! [`ChatClient`] is the outbound half (name, text, images, close) and the
//! receiver returned by [`ChatClient::connect`] is the inbound event stream.
//! [`run`] is a terminal front end built on both.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result, bail};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    wire::{ServerEvent, WireValue, read_event, write_value},
};

const EVENT_BUFFER: usize = 64;

/// Something the presentation layer should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    NameRequested,
    NameAccepted { name: String },
    Line(ChatLine),
    Image { sender: String, bytes: Vec<u8> },
    Notice(String),
    /// Always the last event. Carries the error that ended the stream, if any.
    Disconnected { reason: Option<String> },
}

/// A relayed text line, split by whether this client sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    Own { body: String },
    Other { text: String },
}

impl ChatLine {
    /// A line is ours when it reads `<own name>: <body>`. The server always
    /// embeds the full sender name, so a prefix match is enough.
    pub fn classify(text: &str, own_name: Option<&str>) -> Self {
        let own_body = own_name
            .and_then(|name| text.strip_prefix(name))
            .and_then(|rest| rest.strip_prefix(": "));

        match own_body {
            Some(body) => ChatLine::Own {
                body: body.to_string(),
            },
            None => ChatLine::Other {
                text: text.to_string(),
            },
        }
    }

    pub fn render(&self) -> String {
        match self {
            ChatLine::Own { body } => format!("You: {body}"),
            ChatLine::Other { text } => text.clone(),
        }
    }
}

pub struct ChatClient {
    writer: Option<OwnedWriteHalf>,
    name: watch::Sender<Option<String>>,
}

impl ChatClient {
    /// Connects and starts decoding server values into events.
    pub async fn connect(addr: SocketAddr) -> Result<(Self, mpsc::Receiver<ClientEvent>)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to {addr}"))?;
        info!("connected to {}", addr);

        let (reader, writer) = stream.into_split();
        let (name_tx, name_rx) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(pump_events(BufReader::new(reader), name_rx, events_tx));

        let client = Self {
            writer: Some(writer),
            name: name_tx,
        };
        Ok((client, events_rx))
    }

    pub fn name(&self) -> Option<String> {
        self.name.borrow().clone()
    }

    /// Sends a display name. Empty names are refused locally.
    pub async fn submit_name(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            bail!("name cannot be empty");
        }
        self.name.send_replace(Some(name.to_string()));
        self.send(WireValue::text(name)).await
    }

    /// Sends a chat message. Blank input is ignored.
    pub async fn send_text(&mut self, body: &str) -> Result<()> {
        let body = body.trim();
        if body.is_empty() {
            return Ok(());
        }
        self.send(WireValue::text(body)).await
    }

    pub async fn send_image(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.send(WireValue::Binary(bytes)).await
    }

    /// Releases the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(error) = writer.shutdown().await {
                warn!(?error, "failed to shutdown client writer cleanly");
            }
        }
    }

    async fn send(&mut self, value: WireValue) -> Result<()> {
        let writer = self.writer.as_mut().context("connection already closed")?;
        write_value(writer, &value)
            .await
            .context("failed to send to server")
    }
}

async fn pump_events(
    mut reader: BufReader<OwnedReadHalf>,
    name: watch::Receiver<Option<String>>,
    events: mpsc::Sender<ClientEvent>,
) {
    let reason = loop {
        let event = match read_event(&mut reader).await {
            Ok(Some(event)) => event,
            Ok(None) => break None,
            Err(error) => break Some(error.to_string()),
        };

        let event = to_client_event(event, &name);
        if events.send(event).await.is_err() {
            debug!("event receiver dropped; stopping reader");
            return;
        }
    };

    let _ = events.send(ClientEvent::Disconnected { reason }).await;
}

fn to_client_event(event: ServerEvent, name: &watch::Receiver<Option<String>>) -> ClientEvent {
    match event {
        ServerEvent::NameRequested => ClientEvent::NameRequested,
        ServerEvent::NameAccepted => ClientEvent::NameAccepted {
            name: name.borrow().clone().unwrap_or_default(),
        },
        ServerEvent::Text(text) => {
            ClientEvent::Line(ChatLine::classify(&text, name.borrow().as_deref()))
        }
        ServerEvent::Image { sender, bytes } => ClientEvent::Image { sender, bytes },
        ServerEvent::Notice(text) => ClientEvent::Notice(text),
    }
}

/// Terminal chat client: stdin lines go out, server events are printed.
pub async fn run(args: ClientArgs) -> Result<()> {
    let name = args.name.trim().to_string();
    if name.is_empty() {
        bail!("name cannot be empty");
    }

    let (mut client, mut events) = ChatClient::connect(args.server).await?;
    let mut terminal = Terminal::new(name, args.save_images, tokio::io::stdout(), tokio::io::stderr());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let outcome = loop {
        // `next_line` and `recv` are both cancel safe, so no input is lost
        // when the other branch wins.
        let keep_going = select! {
            event = events.recv() => match event {
                Some(event) => terminal.show(event, &mut client).await,
                None => Ok(false),
            },
            line = stdin.next_line() => match line {
                Ok(Some(line)) => terminal.submit(Input::parse(&line), &mut client).await,
                Ok(None) => Ok(false),
                Err(error) => Err(error.into()),
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                Ok(false)
            }
        };

        match keep_going {
            Ok(true) => continue,
            other => break other.map(|_| ()),
        }
    };

    client.close().await;
    outcome
}

/// One line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Blank,
    Quit,
    Image(PathBuf),
    Text(String),
}

impl Input {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            Input::Blank
        } else if line.eq_ignore_ascii_case("/quit") {
            Input::Quit
        } else if let Some(path) = line.strip_prefix("/image ") {
            Input::Image(PathBuf::from(path.trim()))
        } else {
            Input::Text(line.to_string())
        }
    }
}

/// Renders events for a human and turns typed input into client calls.
struct Terminal<O, E> {
    name: String,
    save_images: Option<PathBuf>,
    images_saved: usize,
    out: O,
    err: E,
}

impl<O, E> Terminal<O, E>
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    fn new(name: String, save_images: Option<PathBuf>, out: O, err: E) -> Self {
        Self {
            name,
            save_images,
            images_saved: 0,
            out,
            err,
        }
    }

    /// Returns `false` once the session is over.
    async fn show(&mut self, event: ClientEvent, client: &mut ChatClient) -> Result<bool> {
        match event {
            ClientEvent::NameRequested => client.submit_name(&self.name).await?,
            ClientEvent::NameAccepted { name } => {
                self.say(&format!("*** connected as {name}")).await?
            }
            ClientEvent::Line(line) => self.say(&line.render()).await?,
            ClientEvent::Image { sender, bytes } => {
                self.say(&format!("*** {sender} sent an image ({} bytes)", bytes.len()))
                    .await?;
                self.save_image(&bytes).await;
            }
            ClientEvent::Notice(text) => self.complain(&text).await?,
            ClientEvent::Disconnected { reason } => {
                if let Some(reason) = reason {
                    self.complain(&reason).await?;
                }
                self.say("*** disconnected").await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns `false` when the user asked to leave.
    async fn submit(&mut self, input: Input, client: &mut ChatClient) -> Result<bool> {
        match input {
            Input::Blank => {}
            Input::Quit => {
                self.say("*** leaving chat").await?;
                return Ok(false);
            }
            Input::Image(path) => match tokio::fs::read(&path).await {
                Ok(bytes) => client.send_image(bytes).await?,
                Err(error) => {
                    self.complain(&format!("failed to read {}: {error}", path.display()))
                        .await?
                }
            },
            Input::Text(text) => client.send_text(&text).await?,
        }
        Ok(true)
    }

    async fn save_image(&mut self, bytes: &[u8]) {
        let Some(dir) = &self.save_images else {
            return;
        };

        self.images_saved += 1;
        let path = dir.join(format!("image-{}.bin", self.images_saved));
        if let Err(error) = tokio::fs::write(&path, bytes).await {
            warn!(path = %path.display(), ?error, "failed to save image");
        }
    }

    async fn say(&mut self, line: &str) -> io::Result<()> {
        print_line(&mut self.out, line).await
    }

    async fn complain(&mut self, line: &str) -> io::Result<()> {
        print_line(&mut self.err, &format!("!!! {line}")).await
    }
}

async fn print_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    let mut buffered = Vec::with_capacity(line.len() + 1);
    buffered.extend_from_slice(line.as_bytes());
    buffered.push(b'\n');
    writer.write_all(&buffered).await?;
    writer.flush().await
}
