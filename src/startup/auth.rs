use crate::error::{Error, Result, ServerError};
use crate::messages::backend::{self, Frame};

/// Authentication requests this client can answer. Everything else the
/// protocol defines (Kerberos, GSS, SASL, ...) maps to
/// `Error::UnsupportedAuth`.
#[derive(Debug)]
pub(crate) enum AuthRequest {
    Ok,
    Md5Password([u8; 4]),
}

/// Interprets a backend frame that must be an authentication request.
///
/// An ErrorResponse here fails authentication outright; any other
/// message type is a protocol violation.
pub(crate) fn parse_auth_request(frame: Frame) -> Result<AuthRequest> {
    match frame.code {
        backend::MessageCode::ERROR_RESPONSE => {
            Err(Error::Server(ServerError::decode(frame.body)?))
        }
        backend::MessageCode::AUTHENTICATION => {
            let mut body = frame.body;
            let sub_code = backend::read_u32(&mut body)?;
            match sub_code {
                0 => Ok(AuthRequest::Ok),
                5 => {
                    let salt = backend::read_bytes(&mut body, 4)?;
                    Ok(AuthRequest::Md5Password([
                        salt[0], salt[1], salt[2], salt[3],
                    ]))
                }
                other => Err(Error::UnsupportedAuth(other)),
            }
        }
        code => Err(format!("unexpected message {code} during authentication"))?,
    }
}

/// The MD5 challenge response:
/// `"md5" + hex(md5(hex(md5(password + user)) + salt))`, with each
/// digest rendered as lowercase ASCII hex before the next round.
pub(crate) fn md5_response(user: &str, password: &str, salt: [u8; 4]) -> String {
    let inner = md5_hex(format!("{password}{user}").as_bytes());
    let mut outer = inner.into_bytes();
    outer.extend_from_slice(&salt);
    format!("md5{}", md5_hex(&outer))
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
