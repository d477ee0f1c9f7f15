//! The startup handshake: protocol version, session parameters, and the
//! authentication challenge/response loop, ending at ReadyForQuery.

use std::collections::HashMap;
use std::io::{Read, Write};

use log::{debug, trace};

use crate::config::Config;
use crate::connection::{Connection, TransactionStatus};
use crate::error::{Error, Result, ServerError};
use crate::messages::backend;
use crate::startup::auth::{md5_response, parse_auth_request, AuthRequest};
use crate::stream::FrameStream;

mod auth;

const CURRENT_VERSION: ProtocolVersion = ProtocolVersion::new(3, 0);

/// Postgres protocol version number.
///
/// The version is encoded as a 32-bit integer where the upper 16 bits
/// represent the major version and the lower 16 bits represent the
/// minor version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | (minor as u32))
    }

    fn major(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    fn minor(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<ProtocolVersion> for u32 {
    fn from(value: ProtocolVersion) -> Self {
        value.0
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

/// Drives the stream from freshly connected to ready-for-query.
///
/// Sends the startup message, answers authentication challenges, and
/// collects ParameterStatus and BackendKeyData until the server reports
/// ReadyForQuery. Any ErrorResponse fails the handshake; the stream is
/// then unusable and must be dropped.
pub(crate) fn handshake<S: Read + Write>(
    mut stream: FrameStream<S>,
    config: &Config,
) -> Result<Connection<S>> {
    // Startup parameters travel as null-terminated strings; an embedded
    // nul would truncate them on the wire.
    if config.user().contains('\0') || config.database().contains('\0') {
        return Err(Error::Config(
            "startup parameter contains a nul byte".into(),
        ));
    }

    // Fixed parameter order keeps the startup message deterministic.
    stream.put_startup(
        CURRENT_VERSION.into(),
        [("user", config.user()), ("database", config.database())],
    );
    stream.flush()?;

    let mut parameters = HashMap::new();
    let mut process_id = 0;
    let mut secret_key = 0;

    let status = loop {
        let mut frame = stream.read_frame()?;
        trace!("startup frame {}", frame.code);
        match frame.code {
            backend::MessageCode::AUTHENTICATION => {
                match parse_auth_request(frame)? {
                    AuthRequest::Ok => {}
                    AuthRequest::Md5Password(salt) => {
                        answer_md5_challenge(&mut stream, config, salt)?;
                    }
                }
            }
            backend::MessageCode::PARAMETER_STATUS => {
                let key = backend::read_cstring(&mut frame.body)?;
                let val = backend::read_cstring(&mut frame.body)?;
                parameters.insert(key, val);
            }
            backend::MessageCode::BACKEND_KEY_DATA => {
                process_id = backend::read_u32(&mut frame.body)?;
                secret_key = backend::read_u32(&mut frame.body)?;
            }
            backend::MessageCode::READY_FOR_QUERY => {
                break TransactionStatus::try_from(backend::read_u8(&mut frame.body)?)?;
            }
            backend::MessageCode::ERROR_RESPONSE => {
                return Err(Error::Server(ServerError::decode(frame.body)?));
            }
            backend::MessageCode::NOTICE_RESPONSE => {
                debug!("notice during startup: {frame}");
            }
            code => Err(format!("unexpected message {code} during startup"))?,
        }
    };

    debug!("handshake complete: backend pid {process_id}, status {status:?}");
    Ok(Connection::new(
        stream, parameters, process_id, secret_key, status,
    ))
}

/// Sends the computed MD5 response and requires the next message, after
/// any notices, to be Authentication-OK.
fn answer_md5_challenge<S: Read + Write>(
    stream: &mut FrameStream<S>,
    config: &Config,
    salt: [u8; 4],
) -> Result<()> {
    let response = md5_response(config.user(), config.password(), salt);
    stream.put_password(&response);
    stream.flush()?;

    loop {
        let frame = stream.read_frame()?;
        if frame.code == backend::MessageCode::NOTICE_RESPONSE {
            debug!("notice during startup: {frame}");
            continue;
        }
        return match parse_auth_request(frame)? {
            AuthRequest::Ok => Ok(()),
            AuthRequest::Md5Password(_) => {
                Err("expected authentication ok after password message".into())
            }
        };
    }
}
