//! Server-to-client line formats and client line decoding.
//!
//! Every line the relay writes is produced by rendering a [`ServerLine`]; the
//! trailing newline is added by [`ServerLine::encode`]. Lines read from
//! clients go through [`decode_client_line`].

use std::fmt;

/// Prompt sent as the first line of every connection.
pub const NICKNAME_PROMPT: &str = "Enter your nickname (leave blank for a random one): ";

/// A line sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// Asks the client for a nickname during the handshake.
    NicknamePrompt,
    /// Confirms the handshake and tells the client its assigned name.
    Welcome {
        /// The display name the relay registered for this client.
        name: String,
    },
    /// Another client joined.
    Joined {
        /// Display name of the client that joined.
        name: String,
    },
    /// A chat line from another client.
    Chat {
        /// Display name of the sender.
        name: String,
        /// The text the sender typed.
        text: String,
    },
    /// Another client left.
    Left {
        /// Display name of the client that left.
        name: String,
    },
}

impl ServerLine {
    /// Builds a chat line for `name` carrying `text`.
    #[must_use]
    pub fn chat(name: &str, text: &str) -> Self {
        Self::Chat {
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    /// Renders the line with its trailing newline, ready to be written.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut line = self.to_string();
        line.push('\n');
        line
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NicknamePrompt => f.write_str(NICKNAME_PROMPT),
            Self::Welcome { name } => write!(
                f,
                "Connected as {name}. Type your message and press Enter to send. Press CTRL+D to exit."
            ),
            Self::Joined { name } => write!(f, "{name} joined the chat."),
            Self::Chat { name, text } => write!(f, "{name}: {text}"),
            Self::Left { name } => write!(f, "{name} has left the chat."),
        }
    }
}

/// Decodes one raw line read from a client.
///
/// Strips a single trailing `\n` and then a single trailing `\r`. Bytes that
/// are not valid UTF-8 are replaced with U+FFFD rather than rejected.
#[must_use]
pub fn decode_client_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
