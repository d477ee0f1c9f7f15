//! Logic for reading and representing Postgres backend messages.

use std::io::Read;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};

// Postgres won't allocate memory greater than 1GiB, so no well-behaved
// server ever writes a frame anywhere near this size. Treat anything
// larger as a corrupted length word rather than trying to allocate it.
// <https://github.com/postgres/postgres/blob/879c492480d0e9ad8155c4269f95c5e8add41901/src/include/utils/memutils.h#L40>
const MAX_FRAME_SIZE_BYTES: usize = 1 << 30; // 1GiB

/// Postgres backend messages are framed by a 1 byte message code,
/// followed by a u32 integer delineating the length of the rest of
/// the message.
///
/// The message code identifies the type of message and format of its
/// payload.
///
/// For more information, see the official Postgres docs:
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html>
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageCode(u8);

impl MessageCode {
    pub const AUTHENTICATION: Self = Self(b'R');
    pub const BACKEND_KEY_DATA: Self = Self(b'K');
    pub const BIND_COMPLETE: Self = Self(b'2');
    pub const COMMAND_COMPLETE: Self = Self(b'C');
    pub const DATA_ROW: Self = Self(b'D');
    pub const EMPTY_QUERY_RESPONSE: Self = Self(b'I');
    pub const ERROR_RESPONSE: Self = Self(b'E');
    pub const NO_DATA: Self = Self(b'n');
    pub const NOTICE_RESPONSE: Self = Self(b'N');
    pub const PARAMETER_DESCRIPTION: Self = Self(b't');
    pub const PARAMETER_STATUS: Self = Self(b'S');
    pub const PARSE_COMPLETE: Self = Self(b'1');
    pub const READY_FOR_QUERY: Self = Self(b'Z');
    pub const ROW_DESCRIPTION: Self = Self(b'T');
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
            MessageCode::AUTHENTICATION => "Authentication",
            MessageCode::BACKEND_KEY_DATA => "BackendKeyData",
            MessageCode::BIND_COMPLETE => "BindComplete",
            MessageCode::COMMAND_COMPLETE => "CommandComplete",
            MessageCode::DATA_ROW => "DataRow",
            MessageCode::EMPTY_QUERY_RESPONSE => "EmptyQueryResponse",
            MessageCode::ERROR_RESPONSE => "ErrorResponse",
            MessageCode::NO_DATA => "NoData",
            MessageCode::NOTICE_RESPONSE => "NoticeResponse",
            MessageCode::PARAMETER_DESCRIPTION => "ParameterDescription",
            MessageCode::PARAMETER_STATUS => "ParameterStatus",
            MessageCode::PARSE_COMPLETE => "ParseComplete",
            MessageCode::READY_FOR_QUERY => "ReadyForQuery",
            MessageCode::ROW_DESCRIPTION => "RowDescription",
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

/// One complete backend message: its code and the payload that followed
/// the length word. A frame is only handed out once every declared byte
/// has been read off the stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub code: MessageCode,
    pub body: Bytes,
}

impl Frame {
    pub fn new(code: impl Into<MessageCode>, body: impl Into<Bytes>) -> Self {
        Self {
            code: code.into(),
            body: body.into(),
        }
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.code, self.body)
    }
}

/// Reads one complete backend message from the stream, blocking until
/// all of its declared bytes have arrived.
///
/// The declared length counts itself but not the code byte, so the body
/// is `length - 4` bytes. A length below 4 or above the 1GiB ceiling, or
/// end-of-stream mid-frame, is a framing error.
pub fn read_frame(mut stream: impl Read) -> Result<Frame> {
    let mut buf = [0; 1];
    stream.read_exact(&mut buf).map_err(framing_eof)?;
    let code: MessageCode = u8::from_be_bytes(buf).into();

    let mut buf = [0; 4];
    stream.read_exact(&mut buf).map_err(framing_eof)?;
    let declared = u32::from_be_bytes(buf) as usize;
    if declared < size_of::<u32>() {
        return Err(Error::Framing(format!(
            "declared length {declared} is below the 4-byte minimum"
        )));
    }
    let len = declared - size_of::<u32>();
    if len > MAX_FRAME_SIZE_BYTES {
        return Err(Error::Framing(format!(
            "declared length {declared} exceeds {MAX_FRAME_SIZE_BYTES}B"
        )));
    }

    let mut body = BytesMut::zeroed(len);
    stream.read_exact(&mut body).map_err(framing_eof)?;

    Ok(Frame::new(code, body))
}

// A stream that ends mid-frame is a protocol violation, not a plain
// transport failure; other I/O errors pass through as transport errors.
fn framing_eof(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Framing("unexpected end of stream mid-frame".into())
    } else {
        Error::Io(err)
    }
}

fn short_field(what: &str) -> Error {
    Error::Framing(format!("message body too short for {what}"))
}

/// Splits a null-terminated string off the front of the body.
pub fn read_cstring(bytes: &mut Bytes) -> Result<String> {
    let Some(end) = bytes.iter().position(|&b| b == 0) else {
        return Err(Error::Framing("null terminator missing".into()));
    };

    let bytes = bytes.split_to(end + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| Error::Framing(format!("invalid utf-8 in string field: {e}")))
}

pub fn read_u8(bytes: &mut Bytes) -> Result<u8> {
    if bytes.remaining() < 1 {
        return Err(short_field("u8"));
    }
    Ok(bytes.get_u8())
}

pub fn read_i16(bytes: &mut Bytes) -> Result<i16> {
    if bytes.remaining() < 2 {
        return Err(short_field("i16"));
    }
    Ok(bytes.get_i16())
}

pub fn read_i32(bytes: &mut Bytes) -> Result<i32> {
    if bytes.remaining() < 4 {
        return Err(short_field("i32"));
    }
    Ok(bytes.get_i32())
}

pub fn read_u32(bytes: &mut Bytes) -> Result<u32> {
    if bytes.remaining() < 4 {
        return Err(short_field("u32"));
    }
    Ok(bytes.get_u32())
}

/// Splits exactly `n` raw bytes off the front of the body.
pub fn read_bytes(bytes: &mut Bytes, n: usize) -> Result<Bytes> {
    if bytes.remaining() < n {
        return Err(short_field("byte field"));
    }
    Ok(bytes.split_to(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_read_frame() {
        let stream: &[u8] = &[b'Z', 0, 0, 0, 5, b'I'];
        let frame = read_frame(stream).unwrap();

        assert_eq!(frame.code, MessageCode::READY_FOR_QUERY);
        assert_eq!(frame.body.as_ref(), &[b'I']);
    }

    #[test]
    fn test_read_frame_truncated_body() {
        // Declares 6 body bytes but only delivers 2.
        let stream: &[u8] = &[b'D', 0, 0, 0, 10, 1, 2];
        let err = read_frame(stream).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }

    #[test]
    fn test_read_frame_implausible_length() {
        let stream: &[u8] = &[b'D', 0, 0, 0, 2];
        let err = read_frame(stream).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");

        let stream: &[u8] = &[b'D', 0xFF, 0xFF, 0xFF, 0xFF];
        let err = read_frame(stream).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }

    #[test]
    fn test_read_frame_eof() {
        let stream: &[u8] = &[];
        let err = read_frame(stream).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }

    #[test]
    fn test_read_cstring() {
        let mut body = Bytes::from_static(b"server_version\016.2\0");
        assert_eq!("server_version", read_cstring(&mut body).unwrap());
        assert_eq!("16.2", read_cstring(&mut body).unwrap());
        assert!(body.is_empty());
    }

    #[test]
    fn test_read_cstring_missing_terminator() {
        let mut body = Bytes::from_static(b"no terminator");
        let err = read_cstring(&mut body).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }

    #[test]
    fn test_checked_reads_past_end() {
        let mut body = Bytes::from_static(&[0, 1]);
        assert_eq!(1, read_i16(&mut body).unwrap());
        assert!(matches!(read_i32(&mut body), Err(Error::Framing(_))));
        assert!(matches!(read_u8(&mut body), Err(Error::Framing(_))));
        assert!(matches!(read_bytes(&mut body, 1), Err(Error::Framing(_))));
    }
}
