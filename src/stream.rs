use std::io::{Read, Write};

use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::messages::{
    backend::{self, Frame},
    frontend::{self, put_cstring, MessageCode},
};

/// A framed view over one duplex byte stream.
///
/// Writes accumulate into a buffer so that a whole pipeline of messages
/// (Parse + Sync, or Describe + Bind + Execute + Sync) goes out in one
/// write; reads always return complete backend frames. The buffer
/// belongs to exactly one exchange and is cleared on flush.
pub struct FrameStream<S> {
    stream: S,
    buf: BytesMut,
}

impl<S> FrameStream<S> {
    pub fn new(stream: S) -> Self {
        FrameStream {
            stream,
            buf: BytesMut::new(),
        }
    }

    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.stream, self.buf.to_vec())
    }

    /// The untagged startup message: protocol version, then name/value
    /// pairs terminated by an empty name.
    pub fn put_startup<'a>(
        &mut self,
        protocol: u32,
        params: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> &mut Self {
        frontend::frame(&mut self.buf, |b| {
            b.put_u32(protocol);
            for (key, val) in params {
                put_cstring(b, key.as_bytes());
                put_cstring(b, val.as_bytes());
            }
            b.put_u8(0);
        });
        self
    }

    pub fn put_password(&mut self, password: &str) -> &mut Self {
        MessageCode::PASSWORD_MESSAGE.frame(&mut self.buf, |b| {
            put_cstring(b, password.as_bytes());
        });
        self
    }

    pub fn put_parse(&mut self, name: &str, stmt: &str, param_types: &[u32]) -> &mut Self {
        MessageCode::PARSE.frame(&mut self.buf, |b| {
            put_cstring(b, name.as_bytes());
            put_cstring(b, stmt.as_bytes());

            b.put_u16(param_types.len() as u16);
            for param_type in param_types {
                b.put_u32(*param_type);
            }
        });
        self
    }

    /// `describe_kind` is `b'S'` for a statement or `b'P'` for a portal.
    pub fn put_describe(&mut self, describe_kind: u8, name: &str) -> &mut Self {
        MessageCode::DESCRIBE.frame(&mut self.buf, |b| {
            b.put_u8(describe_kind);
            put_cstring(b, name.as_bytes());
        });
        self
    }

    /// Binds parameters to a prepared statement. Every parameter is sent
    /// in text format (a zero-length format-code list), `None` as the
    /// `-1` null marker with no payload, and result columns use the
    /// default text format.
    pub fn put_bind(
        &mut self,
        portal_name: &str,
        stmt_name: &str,
        params: &[Option<Vec<u8>>],
    ) -> &mut Self {
        MessageCode::BIND.frame(&mut self.buf, |b| {
            put_cstring(b, portal_name.as_bytes());
            put_cstring(b, stmt_name.as_bytes());

            // Zero format codes: all parameters default to text.
            b.put_u16(0);

            b.put_u16(params.len() as u16);
            for param in params {
                match param {
                    Some(param) => {
                        b.put_u32(param.len() as u32);
                        b.put_slice(param);
                    }
                    None => {
                        b.put_i32(-1);
                    }
                }
            }

            // Zero result-format codes: all columns default to text.
            b.put_u16(0);
        });
        self
    }

    pub fn put_execute(&mut self, name: &str, max_rows: u32) -> &mut Self {
        MessageCode::EXECUTE.frame(&mut self.buf, |b| {
            put_cstring(b, name.as_bytes());
            b.put_u32(max_rows);
        });
        self
    }

    pub fn put_sync(&mut self) -> &mut Self {
        MessageCode::SYNC.frame(&mut self.buf, |_| {});
        self
    }

    pub fn put_terminate(&mut self) -> &mut Self {
        MessageCode::TERMINATE.frame(&mut self.buf, |_| {});
        self
    }
}

impl<S: Read> FrameStream<S> {
    /// Reads one complete backend frame, blocking as needed.
    pub fn read_frame(&mut self) -> Result<Frame> {
        backend::read_frame(&mut self.stream)
    }
}

impl<S: Write> FrameStream<S> {
    /// Writes out everything buffered and clears the buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.stream.write_all(&self.buf)?;
        self.buf.clear();
        self.stream.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;

    use super::FrameStream;
    use crate::messages::backend;

    /// Helper macro for asserting a slice or string from the buffer.
    /// Usage: `assert_buf_eq!(stream, b"STMT\0");`
    macro_rules! assert_buf_eq {
        ($stream:expr, $expected:expr) => {{
            let len = $expected.len();
            let got = $stream.buf.copy_to_bytes(len);
            assert_eq!(&$expected[..], &got[..]);
        }};
    }

    #[test]
    fn test_put_startup() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_startup(196608, [("user", "u"), ("database", "db")]);

        // 4 + 4 + 7 ("user\0u\0") + 12 ("database\0db\0") + 1
        assert_eq!(28, stream.buf.get_u32());
        assert_eq!(196608, stream.buf.get_u32());
        assert_buf_eq!(stream, b"user\0u\0");
        assert_buf_eq!(stream, b"database\0db\0");
        assert_eq!(0, stream.buf.get_u8());
        assert!(stream.buf.is_empty());
    }

    #[test]
    fn test_put_password() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_password("md5abc");

        assert_eq!(b'p', stream.buf.get_u8());
        assert_eq!(11, stream.buf.get_u32());
        assert_buf_eq!(stream, b"md5abc\0");
    }

    #[test]
    fn test_put_parse() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_parse("", "SELECT 1", &[]);

        assert_eq!(b'P', stream.buf.get_u8());
        assert_eq!(16, stream.buf.get_u32());
        assert_buf_eq!(stream, b"\0");
        assert_buf_eq!(stream, b"SELECT 1\0");
        assert_eq!(0, stream.buf.get_u16());
    }

    #[test]
    fn test_put_describe_stmt() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_describe(b'S', "STMT");

        assert_eq!(b'D', stream.buf.get_u8());
        assert_eq!(10, stream.buf.get_u32());
        assert_eq!(b'S', stream.buf.get_u8());
        assert_buf_eq!(stream, b"STMT\0");
    }

    #[test]
    fn test_put_bind_null_then_value() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_bind("", "", &[None, Some(b"42".to_vec())]);

        assert_eq!(b'B', stream.buf.get_u8());
        assert_eq!(22, stream.buf.get_u32());

        assert_buf_eq!(stream, b"\0");
        assert_buf_eq!(stream, b"\0");

        // All-text parameters: no per-parameter format codes.
        assert_eq!(0, stream.buf.get_u16());

        assert_eq!(2, stream.buf.get_u16());
        // Null slot: length -1 and no payload bytes.
        assert_eq!(-1, stream.buf.get_i32());
        assert_eq!(2, stream.buf.get_u32());
        assert_buf_eq!(stream, b"42");

        // Default text result format.
        assert_eq!(0, stream.buf.get_u16());
        assert!(stream.buf.is_empty());
    }

    #[test]
    fn test_put_execute() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_execute("", 0);

        assert_eq!(b'E', stream.buf.get_u8());
        assert_eq!(9, stream.buf.get_u32());
        assert_buf_eq!(stream, b"\0");
        assert_eq!(0, stream.buf.get_u32());
    }

    #[test]
    fn test_put_sync() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_sync();

        assert_eq!(b'S', stream.buf.get_u8());
        assert_eq!(4, stream.buf.get_u32());
    }

    #[test]
    fn test_put_terminate() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_terminate();

        assert_eq!(b'X', stream.buf.get_u8());
        assert_eq!(4, stream.buf.get_u32());
    }

    #[test]
    fn test_flush_writes_and_clears() {
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_sync();
        stream.flush().unwrap();
        assert!(stream.buf.is_empty());

        let (written, _) = stream.into_parts();
        assert_eq!(b'S', written[0]);
        assert_eq!(4, u32::from_be_bytes(written[1..5].try_into().unwrap()));
    }

    #[test]
    fn test_write_read_round_trip() {
        // Frames written by this side decode back to the same code and
        // payload, and the declared length is 4 + payload length.
        let mut stream = FrameStream::new(Vec::<u8>::new());
        stream.put_execute("portal", 7);
        stream.flush().unwrap();

        let (written, _) = stream.into_parts();
        let declared = u32::from_be_bytes(written[1..5].try_into().unwrap()) as usize;
        assert_eq!(declared, 4 + (written.len() - 5));

        let frame = backend::read_frame(&written[..]).unwrap();
        assert_eq!(frame.code, b'E');
        assert_eq!(frame.body.as_ref(), &written[5..]);
    }
}
