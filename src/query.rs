//! The extended query protocol: binding parameters to a prepared
//! statement, executing it, and streaming the result rows back lazily.

use std::io::{Read, Write};

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};
use log::{debug, trace};

use crate::connect::MaybeTlsStream;
use crate::connection::{Connection, TransactionStatus};
use crate::error::{Error, Result, ServerError};
use crate::messages::backend::{self, Frame};

/// `chrono` format for `timestamptz` text values, microsecond precision.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

/// A query parsed into the connection's unnamed statement slot.
///
/// Holds the connection's mutable borrow, so the statement is consumed
/// by [`execute`](Statement::execute) and cannot outlive a later
/// `prepare` on the same connection.
pub struct Statement<'c, S: Read + Write = MaybeTlsStream> {
    conn: &'c mut Connection<S>,
    query: String,
}

impl<'c, S: Read + Write> std::fmt::Debug for Statement<'c, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl<'c, S: Read + Write> Statement<'c, S> {
    pub(crate) fn new(conn: &'c mut Connection<S>, query: &str) -> Self {
        Statement {
            conn,
            query: query.to_string(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Binds `params`, executes without a row limit, and hands back the
    /// row stream once the server has described the result shape.
    ///
    /// Describe, Bind, Execute, and Sync go out in a single write. The
    /// responses are then required in order: ParameterDescription, then
    /// RowDescription (or NoData for statements that return nothing),
    /// then BindComplete. Rows stay on the wire until pulled.
    pub fn execute(self, params: &[Param]) -> Result<Rows<'c, S>> {
        debug!("executing {:?} with {} parameters", self.query, params.len());
        let conn = self.conn;

        let encoded: Vec<Option<Vec<u8>>> = params.iter().map(Param::encode_text).collect();
        conn.stream
            .put_describe(b'S', "")
            .put_bind("", "", &encoded)
            .put_execute("", 0)
            .put_sync();
        conn.stream.flush()?;

        let frame = conn.read_frame_checked()?;
        if frame.code != backend::MessageCode::PARAMETER_DESCRIPTION {
            Err(format!(
                "unexpected message {} in response to describe",
                frame.code
            ))?;
        }

        let mut frame = conn.read_frame_checked()?;
        let columns = match frame.code {
            backend::MessageCode::ROW_DESCRIPTION => parse_row_description(&mut frame)?,
            backend::MessageCode::NO_DATA => Vec::new(),
            code => Err(format!("unexpected message {code} in response to describe"))?,
        };

        let frame = conn.read_frame_checked()?;
        if frame.code != backend::MessageCode::BIND_COMPLETE {
            Err(format!(
                "unexpected message {} in response to bind",
                frame.code
            ))?;
        }

        Ok(Rows {
            conn,
            columns,
            done: false,
        })
    }
}

/// Column names only; the per-column type metadata (table OID, type
/// OID, sizes, format) is skipped.
fn parse_row_description(frame: &mut Frame) -> Result<Vec<String>> {
    let count = backend::read_i16(&mut frame.body)?;
    let mut columns = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        columns.push(backend::read_cstring(&mut frame.body)?);
        backend::read_bytes(&mut frame.body, 18)?;
    }
    if !frame.body.is_empty() {
        return Err(Error::Framing(
            "trailing bytes after row description".into(),
        ));
    }
    Ok(columns)
}

/// A lazy stream of result rows.
///
/// Each call to `next` reads exactly one frame exchange off the wire.
/// The stream ends when the server reports CommandComplete followed by
/// ReadyForQuery; a mid-stream ErrorResponse is drained and surfaced
/// once, after which the connection is ready for the next statement.
pub struct Rows<'c, S: Read + Write = MaybeTlsStream> {
    conn: &'c mut Connection<S>,
    columns: Vec<String>,
    done: bool,
}

impl<S: Read + Write> Rows<'_, S> {
    /// Result column names, in wire order. Empty for statements that
    /// return no rows.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Pulls and discards any remaining rows so the connection is ready
    /// for the next statement, surfacing the first error encountered.
    pub fn finish(mut self) -> Result<()> {
        for row in &mut self {
            row?;
        }
        Ok(())
    }

    fn read_row(&mut self) -> Result<Option<Row>> {
        let mut frame = self.conn.read_frame()?;
        match frame.code {
            backend::MessageCode::DATA_ROW => Ok(Some(parse_data_row(&mut frame)?)),
            backend::MessageCode::COMMAND_COMPLETE => {
                trace!("command complete: {frame}");
                let mut frame = self.conn.read_frame()?;
                if frame.code != backend::MessageCode::READY_FOR_QUERY {
                    Err(format!(
                        "unexpected message {} after command complete",
                        frame.code
                    ))?;
                }
                self.conn.status =
                    TransactionStatus::try_from(backend::read_u8(&mut frame.body)?)?;
                Ok(None)
            }
            backend::MessageCode::ERROR_RESPONSE => {
                let err = ServerError::decode(frame.body)?;
                self.conn.drain_to_ready()?;
                Err(Error::Server(err))
            }
            code => Err(format!("unexpected message {code} in row stream"))?,
        }
    }
}

impl<S: Read + Write> Iterator for Rows<'_, S> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        match self.read_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<S: Read + Write> Drop for Rows<'_, S> {
    fn drop(&mut self) {
        if !self.done {
            // Leave the stream at ReadyForQuery so the connection stays
            // usable after an early drop. Failures here mean the stream
            // is broken anyway, and there is no caller to tell.
            let _ = self.conn.drain_to_ready();
        }
    }
}

fn parse_data_row(frame: &mut Frame) -> Result<Row> {
    let count = backend::read_i16(&mut frame.body)?;
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let len = backend::read_i32(&mut frame.body)?;
        if len < 0 {
            values.push(None);
        } else {
            values.push(Some(backend::read_bytes(&mut frame.body, len as usize)?));
        }
    }
    if !frame.body.is_empty() {
        return Err(Error::Framing("trailing bytes after data row".into()));
    }
    Ok(Row { values })
}

/// One result row. Values are the server's text-format bytes, `None`
/// for SQL null; zero-copy slices of the frame they arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<Bytes>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at `idx`, or `None` when it is SQL null or out of
    /// range.
    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.values.get(idx)?.as_deref()
    }

    pub fn values(&self) -> &[Option<Bytes>] {
        &self.values
    }
}

/// A statement parameter, encoded to the server's text format.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<FixedOffset>),
}

impl Param {
    /// Text-format wire encoding; `None` stands for SQL null, sent as
    /// the `-1` length marker with no payload.
    pub(crate) fn encode_text(&self) -> Option<Vec<u8>> {
        match self {
            Param::Null => None,
            Param::Bool(v) => Some(if *v { b"true".to_vec() } else { b"false".to_vec() }),
            Param::Int(v) => Some(v.to_string().into_bytes()),
            Param::Float(v) => Some(v.to_string().into_bytes()),
            Param::Text(v) => Some(v.clone().into_bytes()),
            Param::Bytes(v) => Some(v.clone()),
            Param::Timestamp(v) => Some(v.format(TIMESTAMP_FORMAT).to_string().into_bytes()),
        }
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<i16> for Param {
    fn from(value: i16) -> Self {
        Param::Int(value.into())
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<f32> for Param {
    fn from(value: f32) -> Self {
        Param::Float(value.into())
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Text(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Text(value)
    }
}

impl From<Vec<u8>> for Param {
    fn from(value: Vec<u8>) -> Self {
        Param::Bytes(value)
    }
}

impl From<&[u8]> for Param {
    fn from(value: &[u8]) -> Self {
        Param::Bytes(value.to_vec())
    }
}

impl From<DateTime<FixedOffset>> for Param {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Param::Timestamp(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Param::Null,
        }
    }
}
