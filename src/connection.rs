use std::collections::HashMap;
use std::io::{Read, Write};

use log::{debug, trace};

use crate::config::Config;
use crate::connect::MaybeTlsStream;
use crate::error::{Error, Result, ServerError};
use crate::messages::backend::{self, Frame};
use crate::query::Statement;
use crate::startup;
use crate::stream::FrameStream;

/// The backend's transaction status, reported with every ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle,
    /// Inside a transaction block.
    InTransaction,
    /// Inside a failed transaction block; statements are rejected until
    /// the block ends.
    Failed,
}

impl TryFrom<u8> for TransactionStatus {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            b'I' => Ok(TransactionStatus::Idle),
            b'T' => Ok(TransactionStatus::InTransaction),
            b'E' => Ok(TransactionStatus::Failed),
            other => Err(format!(
                "unknown transaction status byte '{}'",
                other as char
            ))?,
        }
    }
}

/// An authenticated Postgres session over one blocking byte stream.
///
/// All operations take `&mut self`, so the borrow system enforces the
/// protocol's one-outstanding-operation rule at compile time. A
/// `Framing` or `Protocol` error means the stream position can no
/// longer be trusted; drop the connection and dial a new one.
pub struct Connection<S: Read + Write = MaybeTlsStream> {
    pub(crate) stream: FrameStream<S>,
    parameters: HashMap<String, String>,
    process_id: u32,
    secret_key: u32,
    pub(crate) status: TransactionStatus,
}

impl<S: Read + Write> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("parameters", &self.parameters)
            .field("process_id", &self.process_id)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> Connection<S> {
    pub(crate) fn new(
        stream: FrameStream<S>,
        parameters: HashMap<String, String>,
        process_id: u32,
        secret_key: u32,
        status: TransactionStatus,
    ) -> Self {
        Connection {
            stream,
            parameters,
            process_id,
            secret_key,
            status,
        }
    }

    /// Performs the startup handshake over an already-dialed (and
    /// already-upgraded, if encrypted) stream.
    ///
    /// [`connect`](crate::connect) is the usual entry point; this one
    /// exists for callers that manage their own transport.
    pub fn establish(stream: S, config: &Config) -> Result<Self> {
        startup::handshake(FrameStream::new(stream), config)
    }

    /// A session parameter reported by the server during startup
    /// (e.g. `server_version`, `client_encoding`).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// The backend process ID for this session.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// The backend's secret token, required by a future cancel-request
    /// side channel. Unused by this crate.
    pub fn secret_key(&self) -> u32 {
        self.secret_key
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    /// Prepares `query` into the unnamed statement slot.
    ///
    /// Preparing again replaces the slot, so a new `Statement`
    /// invalidates any prior one; the mutable borrow makes that
    /// explicit. A server-reported error leaves the connection usable.
    pub fn prepare(&mut self, query: &str) -> Result<Statement<'_, S>> {
        // The wire encodes the query as a null-terminated string, so an
        // embedded nul would truncate it. Rejected before any bytes are
        // written; the connection is untouched.
        if query.contains('\0') {
            return Err(Error::Config("query text contains a nul byte".into()));
        }

        debug!("preparing {query:?}");
        self.stream.put_parse("", query, &[]).put_sync();
        self.stream.flush()?;

        let frame = self.read_frame_checked()?;
        if frame.code != backend::MessageCode::PARSE_COMPLETE {
            Err(format!("unexpected message {} in response to parse", frame.code))?;
        }

        let mut frame = self.read_frame_checked()?;
        if frame.code != backend::MessageCode::READY_FOR_QUERY {
            Err(format!("unexpected message {} in response to sync", frame.code))?;
        }
        self.status = TransactionStatus::try_from(backend::read_u8(&mut frame.body)?)?;

        Ok(Statement::new(self, query))
    }

    /// Opens a transaction block. No dedicated wire primitive exists;
    /// this is the literal `BEGIN` statement.
    pub fn begin(&mut self) -> Result<()> {
        self.run("BEGIN")
    }

    pub fn commit(&mut self) -> Result<()> {
        self.run("COMMIT")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.run("ROLLBACK")
    }

    fn run(&mut self, query: &str) -> Result<()> {
        self.prepare(query)?.execute(&[])?.finish()
    }

    /// Sends Terminate and tears the session down.
    pub fn close(mut self) -> Result<()> {
        self.stream.put_terminate();
        self.stream.flush()?;
        Ok(())
    }

    /// Reads the next backend frame, consuming NoticeResponse frames
    /// along the way (notices are logged, never surfaced).
    pub(crate) fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let frame = self.stream.read_frame()?;
            if frame.code == backend::MessageCode::NOTICE_RESPONSE {
                debug!("notice: {frame}");
                continue;
            }
            trace!("read frame {}", frame.code);
            return Ok(frame);
        }
    }

    /// Like [`read_frame`](Self::read_frame), but an ErrorResponse is
    /// decoded, the stream drained back to ReadyForQuery, and the
    /// result returned as `Error::Server` with the connection still
    /// usable.
    pub(crate) fn read_frame_checked(&mut self) -> Result<Frame> {
        let frame = self.read_frame()?;
        if frame.code == backend::MessageCode::ERROR_RESPONSE {
            let err = ServerError::decode(frame.body)?;
            self.drain_to_ready()?;
            return Err(Error::Server(err));
        }
        Ok(frame)
    }

    /// Reads and discards frames until ReadyForQuery, restoring the
    /// stream to a known position and recording the transaction status.
    pub(crate) fn drain_to_ready(&mut self) -> Result<()> {
        loop {
            let mut frame = self.read_frame()?;
            if frame.code == backend::MessageCode::READY_FOR_QUERY {
                self.status = TransactionStatus::try_from(backend::read_u8(&mut frame.body)?)?;
                return Ok(());
            }
        }
    }
}
