use std::collections::HashMap;

use bytes::Bytes;

use crate::messages::backend;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for Postgres protocol and associated I/O operations.
///
/// `Framing` and `Protocol` mean the stream position can no longer be
/// trusted; the connection must be closed. `Server` is a decoded
/// ErrorResponse and leaves the connection usable once the stream has
/// been drained back to ReadyForQuery.
#[derive(Debug)]
pub enum Error {
    /// Underlying transport failure.
    Io(std::io::Error),
    /// Malformed or truncated message; fatal to the connection.
    Framing(String),
    /// Unexpected message type or status byte; fatal to the connection.
    Protocol(String),
    /// The server asked for an authentication method this client does
    /// not speak (only OK and MD5 are supported).
    UnsupportedAuth(u32),
    /// The server declined the SSL upgrade under a mode that requires it.
    SslRefused,
    /// TLS handshake or configuration failure.
    Tls(rustls::Error),
    /// A decoded ErrorResponse from the backend.
    Server(ServerError),
    /// Invalid configuration or caller-supplied value (sslmode, port,
    /// nul bytes in a text field the wire cannot represent, ...).
    Config(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "encountered I/O error: {e}"),
            Error::Framing(e) => write!(f, "framing error: {e}"),
            Error::Protocol(e) => write!(f, "protocol violation: {e}"),
            Error::UnsupportedAuth(code) => {
                write!(f, "unsupported authentication method (code {code})")
            }
            Error::SslRefused => write!(f, "server refused secure transport"),
            Error::Tls(e) => write!(f, "TLS failure: {e}"),
            Error::Server(e) => write!(f, "server error: {e}"),
            Error::Config(e) => write!(f, "invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<rustls::Error> for Error {
    fn from(value: rustls::Error) -> Self {
        Error::Tls(value)
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Protocol(value)
    }
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Protocol(value.to_string())
    }
}

/// A decoded Postgres ErrorResponse: a mapping from one-byte field code
/// to its string value.
///
/// The field codes themselves are opaque here; accessors exist for the
/// few a caller nearly always wants. Duplicate codes keep the last
/// occurrence.
#[derive(Debug, Clone)]
pub struct ServerError {
    fields: HashMap<u8, String>,
}

impl ServerError {
    /// Decodes an ErrorResponse body: (field-code byte, c-string) pairs
    /// terminated by a zero byte.
    pub fn decode(mut body: Bytes) -> Result<Self> {
        let mut fields = HashMap::new();
        loop {
            let code = backend::read_u8(&mut body)?;
            if code == 0 {
                break;
            }
            let value = backend::read_cstring(&mut body)?;
            fields.insert(code, value);
        }
        Ok(ServerError { fields })
    }

    /// Looks up a raw field by its protocol code byte.
    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields.get(&code).map(String::as_str)
    }

    pub fn severity(&self) -> Option<&str> {
        self.field(b'S')
    }

    /// The SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.field(b'C')
    }

    pub fn message(&self) -> Option<&str> {
        self.field(b'M')
    }

    pub fn detail(&self) -> Option<&str> {
        self.field(b'D')
    }

    pub fn hint(&self) -> Option<&str> {
        self.field(b'H')
    }

    pub fn position(&self) -> Option<&str> {
        self.field(b'P')
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sev = self.severity().unwrap_or("UNKNOWN");
        let code = self.code().unwrap_or("?????");
        let msg = self.message().unwrap_or("<no message>");
        write!(f, "[{sev}] {code}: {msg}")
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{Error, ServerError};

    #[test]
    fn test_decode_error_response() {
        let body = Bytes::from_static(b"SERROR\0C42601\0Msyntax error\0\0");
        let err = ServerError::decode(body).unwrap();

        assert_eq!(3, err.len());
        assert_eq!(Some("ERROR"), err.severity());
        assert_eq!(Some("42601"), err.code());
        assert_eq!(Some("syntax error"), err.message());
        assert_eq!(None, err.detail());
        assert_eq!("[ERROR] 42601: syntax error", err.to_string());
    }

    #[test]
    fn test_decode_duplicate_code_keeps_last() {
        let body = Bytes::from_static(b"Mfirst\0Msecond\0\0");
        let err = ServerError::decode(body).unwrap();

        assert_eq!(1, err.len());
        assert_eq!(Some("second"), err.message());
    }

    #[test]
    fn test_decode_missing_terminator() {
        let body = Bytes::from_static(b"Mdangling\0");
        let err = ServerError::decode(body).unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }
}
