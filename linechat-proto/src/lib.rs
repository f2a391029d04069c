//! Shared protocol definitions for the linechat wire format.
//!
//! The wire format is plain newline-delimited UTF-8 text. This crate owns the
//! exact text of every server-to-client line and the rules for turning a
//! requested nickname into a display name.

pub mod line;
pub mod nickname;

/// Errors produced while interpreting client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtoError {
    /// The requested nickname is empty once control characters and
    /// surrounding whitespace are removed.
    #[error("nickname is empty after sanitization")]
    EmptyNickname,
}
