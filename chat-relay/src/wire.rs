use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Prompt sent by the server until the client submits a usable name.
pub const SUBMIT_NAME: &str = "SUBMITNAME";
/// Sent once to the connection whose name was accepted.
pub const NAME_ACCEPTED: &str = "NAMEACCEPTED";
pub const TEXT_PREFIX: &str = "TEXT ";
pub const IMAGE_PREFIX: &str = "IMAGE ";

/// One value on the wire: either a string or an opaque binary blob.
///
/// Every value travels as a single JSON line, e.g.
/// `{"type":"text","data":"TEXT alice: hi"}` or
/// `{"type":"binary","data":"aGVsbG8="}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WireValue {
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl WireValue {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Binary(bytes.into())
    }
}

/// Reads the next value, skipping blank lines. `Ok(None)` means end of stream.
pub async fn read_value<R>(reader: &mut R) -> io::Result<Option<WireValue>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let parsed = serde_json::from_str(trimmed).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_value<W>(writer: &mut W, value: &WireValue) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = encode_values(std::slice::from_ref(value))?;
    write_encoded(writer, &encoded).await
}

/// Encodes a run of values into one newline-delimited buffer.
///
/// Multi-part messages are encoded together so they can be delivered with a
/// single write and never interleave with another message on the same stream.
pub fn encode_values(values: &[WireValue]) -> io::Result<Vec<u8>> {
    let mut encoded = Vec::new();
    for value in values {
        serde_json::to_writer(&mut encoded, value).map_err(to_io_error)?;
        encoded.push(b'\n');
    }
    Ok(encoded)
}

pub async fn write_encoded<W>(writer: &mut W, encoded: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(encoded).await?;
    writer.flush().await
}

/// What a client observes from the server, after pairing image headers with
/// their payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    NameRequested,
    NameAccepted,
    /// Body of a `TEXT` value with the keyword stripped.
    Text(String),
    Image { sender: String, bytes: Vec<u8> },
    /// A string the protocol does not define. Surfaced instead of failing.
    Notice(String),
}

/// Reads the next server event. An `IMAGE` header consumes the following
/// binary value as part of the same event.
pub async fn read_event<R>(reader: &mut R) -> io::Result<Option<ServerEvent>>
where
    R: AsyncBufRead + Unpin,
{
    let text = match read_value(reader).await? {
        Some(WireValue::Text(text)) => text,
        Some(WireValue::Binary(_)) => {
            return Err(invalid_data("binary payload without an IMAGE header"));
        }
        None => return Ok(None),
    };

    if text.starts_with(SUBMIT_NAME) {
        return Ok(Some(ServerEvent::NameRequested));
    }
    if text.starts_with(NAME_ACCEPTED) {
        return Ok(Some(ServerEvent::NameAccepted));
    }
    if let Some(rest) = text.strip_prefix(TEXT_PREFIX) {
        return Ok(Some(ServerEvent::Text(rest.to_string())));
    }
    if let Some(sender) = text.strip_prefix(IMAGE_PREFIX) {
        return match read_value(reader).await? {
            Some(WireValue::Binary(bytes)) => Ok(Some(ServerEvent::Image {
                sender: sender.to_string(),
                bytes,
            })),
            Some(WireValue::Text(_)) => Err(invalid_data("IMAGE header not followed by payload")),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream closed between IMAGE header and payload",
            )),
        };
    }

    Ok(Some(ServerEvent::Notice(text)))
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn binary_payload_survives_the_wire() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let payload: Vec<u8> = (0u8..10).collect();

        write_value(&mut writer, &WireValue::binary(payload.clone()))
            .await
            .expect("write value");
        let parsed = read_value(&mut reader)
            .await
            .expect("read value")
            .expect("expected value");

        assert_eq!(parsed, WireValue::Binary(payload));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped_and_eof_is_none() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);

        writer
            .write_all(b"\n\r\n{\"type\":\"text\",\"data\":\"hi\"}\n")
            .await
            .expect("write raw");
        drop(writer);

        let first = read_value(&mut reader).await.expect("read value");
        assert_eq!(first, Some(WireValue::text("hi")));
        let second = read_value(&mut reader).await.expect("read eof");
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);

        writer.write_all(b"not json\n").await.expect("write raw");

        let err = read_value(&mut reader).await.expect_err("decode failure");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn image_header_and_payload_form_one_event() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let encoded = encode_values(&[
            WireValue::text("IMAGE alice"),
            WireValue::binary(vec![1, 2, 3]),
            WireValue::text("TEXT alice: hi"),
        ])
        .expect("encode");
        write_encoded(&mut writer, &encoded).await.expect("write");

        let image = read_event(&mut reader).await.expect("read").expect("event");
        assert_eq!(
            image,
            ServerEvent::Image {
                sender: "alice".into(),
                bytes: vec![1, 2, 3]
            }
        );
        let text = read_event(&mut reader).await.expect("read").expect("event");
        assert_eq!(text, ServerEvent::Text("alice: hi".into()));
    }

    #[tokio::test]
    async fn stray_binary_is_rejected() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        write_value(&mut writer, &WireValue::binary(vec![9]))
            .await
            .expect("write");

        let err = read_event(&mut reader).await.expect_err("stray binary");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn protocol_keywords_decode() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let encoded = encode_values(&[
            WireValue::text(SUBMIT_NAME),
            WireValue::text(NAME_ACCEPTED),
            WireValue::text("HELLO"),
        ])
        .expect("encode");
        write_encoded(&mut writer, &encoded).await.expect("write");

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(read_event(&mut reader).await.expect("read").expect("event"));
        }
        assert_eq!(
            events,
            vec![
                ServerEvent::NameRequested,
                ServerEvent::NameAccepted,
                ServerEvent::Notice("HELLO".into()),
            ]
        );
    }
}
