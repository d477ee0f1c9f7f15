//! A blocking client for the Postgres wire protocol.
//!
//! `pg_conn` speaks protocol 3.0 directly over a `TcpStream`, a local
//! domain socket, or TLS: framing, the SSL upgrade dance, MD5
//! authentication, and the extended query protocol (Parse, Bind,
//! Describe, Execute, Sync). Result rows stream lazily off the wire as
//! the server's text-format bytes; interpreting them is left to the
//! caller.
//!
//! ```no_run
//! use pg_conn::{connect, Config, Param};
//!
//! fn main() -> pg_conn::Result<()> {
//!     let mut config = Config::new("postgres");
//!     config.set("password", "postgres");
//!
//!     let mut conn = connect(&config)?;
//!     let stmt = conn.prepare("SELECT generate_series(1, $1)")?;
//!     for row in stmt.execute(&[Param::from(3i64)])? {
//!         println!("{:?}", row?.get(0));
//!     }
//!     conn.close()
//! }
//! ```

mod config;
mod connect;
mod connection;
mod error;
pub mod messages;
mod query;
mod startup;
mod stream;

pub use config::{Config, SslMode};
pub use connect::{connect, MaybeTlsStream};
pub use connection::{Connection, TransactionStatus};
pub use error::{Error, Result, ServerError};
pub use query::{Param, Row, Rows, Statement};
pub use stream::FrameStream;
