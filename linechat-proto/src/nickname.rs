//! Nickname sanitization and collision-avoiding candidate generation.
//!
//! A requested nickname is cleaned up by [`sanitize_nickname`]. A blank
//! request falls back to [`default_nickname`]. When the resulting name is
//! already taken, [`name_candidates`] yields the sequence of alternatives the
//! relay tries in order.

use std::net::IpAddr;

use crate::ProtoError;

/// Maximum length of a requested nickname, in characters.
pub const MAX_NICKNAME_LEN: usize = 32;

/// Prefix of the name assigned to clients that leave the nickname blank.
pub const DEFAULT_NICKNAME_PREFIX: &str = "User-";

/// Sanitizes a requested nickname.
///
/// 1. Strip control characters (including stray `\r` and tabs).
/// 2. Trim surrounding whitespace.
/// 3. Truncate to [`MAX_NICKNAME_LEN`] characters, then trim again.
///
/// # Errors
///
/// Returns [`ProtoError::EmptyNickname`] if nothing is left.
pub fn sanitize_nickname(raw: &str) -> Result<String, ProtoError> {
    let stripped: String = raw.chars().filter(|c| !c.is_control()).collect();
    let truncated: String = stripped.trim().chars().take(MAX_NICKNAME_LEN).collect();
    let name = truncated.trim_end();
    if name.is_empty() {
        return Err(ProtoError::EmptyNickname);
    }
    Ok(name.to_string())
}

/// Name given to a client that does not pick one: `User-<remote ip>`.
#[must_use]
pub fn default_nickname(addr: IpAddr) -> String {
    format!("{DEFAULT_NICKNAME_PREFIX}{}", addr.to_canonical())
}

/// Turns the raw handshake line into the preferred display name.
///
/// Falls back to [`default_nickname`] when the request sanitizes to nothing.
#[must_use]
pub fn requested_or_default(raw: &str, addr: IpAddr) -> String {
    sanitize_nickname(raw).unwrap_or_else(|_| default_nickname(addr))
}

/// Yields `base`, then `base-2`, `base-3`, ... without end.
///
/// Callers bound the sequence with [`Iterator::take`].
pub fn name_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string())
        .chain((2u64..).map(move |suffix| format!("{base}-{suffix}")))
}
