use std::io;

use crate::wire::{IMAGE_PREFIX, TEXT_PREFIX, WireValue, encode_values};

/// An event a session hands to the relay for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Join(String),
    Leave(String),
    Text { sender: String, body: String },
    Image { sender: String, bytes: Vec<u8> },
}

impl Message {
    /// Wire values in the order peers must receive them.
    pub fn to_wire(&self) -> Vec<WireValue> {
        match self {
            Message::Join(name) => vec![WireValue::text(format!(
                "{TEXT_PREFIX}{name} joined the chat"
            ))],
            Message::Leave(name) => vec![WireValue::text(format!(
                "{TEXT_PREFIX}{name} left the chat"
            ))],
            Message::Text { sender, body } => {
                vec![WireValue::text(format!("{TEXT_PREFIX}{sender}: {body}"))]
            }
            Message::Image { sender, bytes } => vec![
                WireValue::text(format!("{IMAGE_PREFIX}{sender}")),
                WireValue::binary(bytes.clone()),
            ],
        }
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        encode_values(&self.to_wire())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Join(_) => "join",
            Message::Leave(_) => "leave",
            Message::Text { .. } => "text",
            Message::Image { .. } => "image",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcements_use_the_text_keyword() {
        assert_eq!(
            Message::Join("alice".into()).to_wire(),
            vec![WireValue::text("TEXT alice joined the chat")]
        );
        assert_eq!(
            Message::Leave("alice".into()).to_wire(),
            vec![WireValue::text("TEXT alice left the chat")]
        );
    }

    #[test]
    fn text_keeps_the_full_sender_name() {
        let message = Message::Text {
            sender: "alice the great".into(),
            body: "hi: there".into(),
        };
        assert_eq!(
            message.to_wire(),
            vec![WireValue::text("TEXT alice the great: hi: there")]
        );
    }

    #[test]
    fn image_is_header_then_payload() {
        let message = Message::Image {
            sender: "bob".into(),
            bytes: vec![0xff, 0x00],
        };
        assert_eq!(
            message.to_wire(),
            vec![
                WireValue::text("IMAGE bob"),
                WireValue::binary(vec![0xff, 0x00])
            ]
        );
    }
}
