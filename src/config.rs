use std::collections::HashMap;

use crate::error::{Error, Result};

pub(crate) const DEFAULT_HOST: &str = "localhost";
pub(crate) const DEFAULT_PORT: u16 = 5432;

/// Parsed connection options, as produced by an external
/// connection-string or URL parser.
///
/// Recognized keys: `user`, `password`, `host`, `port`, `database`,
/// `sslmode`. Unknown keys are carried but ignored.
#[derive(Debug, Clone, Default)]
pub struct Config(HashMap<String, String>);

impl Config {
    pub fn new(user: impl Into<String>) -> Self {
        let mut config = Config(HashMap::new());
        config.set("user", user.into());
        config
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, val: impl Into<String>) -> &mut Self {
        self.0.insert(key.into(), val.into());
        self
    }

    pub fn user(&self) -> &str {
        self.get("user").unwrap_or_default()
    }

    pub fn password(&self) -> &str {
        self.get("password").unwrap_or_default()
    }

    /// The database to connect to, defaulting to the user name.
    pub fn database(&self) -> &str {
        match self.get("database") {
            Some(db) if !db.is_empty() => db,
            _ => self.user(),
        }
    }

    pub fn host(&self) -> &str {
        match self.get("host") {
            Some(host) if !host.is_empty() => host,
            _ => DEFAULT_HOST,
        }
    }

    pub fn port(&self) -> Result<u16> {
        match self.get("port") {
            Some(port) if !port.is_empty() => port
                .parse()
                .map_err(|_| Error::Config(format!("invalid port {port:?}"))),
            _ => Ok(DEFAULT_PORT),
        }
    }

    pub fn ssl_mode(&self) -> Result<SslMode> {
        match self.get("sslmode") {
            None | Some("") | Some("require") => Ok(SslMode::Require),
            Some("disable") => Ok(SslMode::Disable),
            Some("verify-full") => Ok(SslMode::VerifyFull),
            Some(other) => Err(Error::Config(format!(
                "unsupported sslmode {other:?}; only \"require\" (default), \
                 \"verify-full\", and \"disable\" supported"
            ))),
        }
    }
}

impl From<HashMap<String, String>> for Config {
    fn from(values: HashMap<String, String>) -> Self {
        Config(values)
    }
}

impl FromIterator<(String, String)> for Config {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Config(iter.into_iter().collect())
    }
}

/// Whether and how strictly to negotiate transport encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    /// Never send the SSLRequest; traffic stays in the clear.
    Disable,
    /// Upgrade to TLS but skip certificate verification.
    Require,
    /// Upgrade to TLS with full certificate and host-name verification.
    VerifyFull,
}
