//! Logic for building and representing Postgres frontend messages.

use bytes::{BufMut, BytesMut};

/// The untagged SSLRequest message: length 8, then the magic code 80877103.
///
/// Sent before any framed traffic; the server answers with a single raw
/// byte rather than a framed message.
pub const SSL_REQUEST: &[u8] = &[
    0x00, 0x00, 0x00, 0x08, // length: 8
    0x04, 0xD2, 0x16, 0x2F, // code: 80877103
];

/// Postgres frontend messages are framed by a 1 byte message code,
/// followed by a u32 integer delineating the length of the rest of
/// the message. The two pre-authentication messages (SSLRequest and
/// the startup message) carry no code byte.
///
/// For more information, see the official Postgres docs:
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html>
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(u8);

impl MessageCode {
    pub const BIND: Self = Self(b'B');
    pub const CLOSE: Self = Self(b'C');
    pub const DESCRIBE: Self = Self(b'D');
    pub const EXECUTE: Self = Self(b'E');
    pub const FLUSH: Self = Self(b'H');
    pub const PARSE: Self = Self(b'P');
    pub const PASSWORD_MESSAGE: Self = Self(b'p');
    pub const SYNC: Self = Self(b'S');
    pub const TERMINATE: Self = Self(b'X');

    #[inline]
    pub fn frame(self, buf: &mut BytesMut, payload_fn: impl FnOnce(&mut BytesMut)) {
        buf.put_u8(self.0);
        frame(buf, payload_fn);
    }
}

impl From<u8> for MessageCode {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<MessageCode> for u8 {
    fn from(value: MessageCode) -> Self {
        value.0
    }
}

impl PartialEq<u8> for MessageCode {
    fn eq(&self, other: &u8) -> bool {
        self.0 == *other
    }
}

impl PartialEq<MessageCode> for u8 {
    fn eq(&self, other: &MessageCode) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match *self {
            MessageCode::BIND => "Bind",
            MessageCode::CLOSE => "Close",
            MessageCode::DESCRIBE => "Describe",
            MessageCode::EXECUTE => "Execute",
            MessageCode::FLUSH => "Flush",
            MessageCode::PARSE => "Parse",
            MessageCode::PASSWORD_MESSAGE => "PasswordMessage",
            MessageCode::SYNC => "Sync",
            MessageCode::TERMINATE => "Terminate",
            _ => "Unknown",
        };
        write!(f, "{name}({})", self.0 as char)
    }
}

impl std::fmt::Debug for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageCode({})", self.0 as char)
    }
}

/// Reserves the 4-byte length slot, runs the payload closure, then
/// back-patches the length. The length counts itself but not the code byte.
#[inline]
pub fn frame(buf: &mut BytesMut, payload_fn: impl FnOnce(&mut BytesMut)) {
    let base = buf.len();
    buf.put_u32(0);

    payload_fn(buf);

    let len = (buf.len() - base) as u32;
    buf[base..base + size_of::<u32>()].copy_from_slice(&len.to_be_bytes());
}

/// Writes a null-terminated string field. The input must not contain
/// embedded null bytes; the wire format cannot represent them.
/// Caller-supplied text (query strings, startup parameters) is rejected
/// before it reaches this builder; the assert backs the internal call
/// sites that only ever pass generated or constant values.
#[inline]
pub fn put_cstring(b: &mut impl BufMut, src: &[u8]) {
    debug_assert!(!src.contains(&0), "embedded null byte in c-string field");
    b.put_slice(src);
    b.put_u8(0);
}
