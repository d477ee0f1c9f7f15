use std::io::{Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use log::debug;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::WebPkiSupportedAlgorithms;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    StreamOwned,
};

use crate::config::{Config, SslMode};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::messages::frontend::SSL_REQUEST;
use crate::startup;
use crate::stream::FrameStream;

/// Establishes, negotiates, and authenticates a connection from parsed
/// configuration: dial, optional TLS upgrade, then the startup
/// handshake. This is the only constructor a calling layer needs.
pub fn connect(config: &Config) -> Result<Connection> {
    let mode = config.ssl_mode()?;
    let mut stream = dial(config)?;

    if negotiate_ssl(&mut stream, mode)? {
        stream = upgrade_tls(stream, config.host(), mode)?;
    }

    startup::handshake(FrameStream::new(stream), config)
}

/// The stream a `Connection` speaks over: plain TCP, a local domain
/// socket, or TLS over TCP after a successful upgrade.
pub enum MaybeTlsStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for MaybeTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            MaybeTlsStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => s.read(buf),
            MaybeTlsStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MaybeTlsStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            MaybeTlsStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => s.write(buf),
            MaybeTlsStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            MaybeTlsStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            MaybeTlsStream::Unix(s) => s.flush(),
            MaybeTlsStream::Tls(s) => s.flush(),
        }
    }
}

/// A host beginning with `/` names a local domain socket path; anything
/// else dials TCP to host:port.
fn dial(config: &Config) -> Result<MaybeTlsStream> {
    let host = config.host();
    if host.starts_with('/') {
        #[cfg(unix)]
        {
            debug!("dialing domain socket {host}");
            return Ok(MaybeTlsStream::Unix(UnixStream::connect(host)?));
        }
        #[cfg(not(unix))]
        {
            return Err(Error::Config(format!(
                "domain socket host {host:?} is not supported on this platform"
            )));
        }
    }

    let port = config.port()?;
    debug!("dialing {host}:{port}");
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    Ok(MaybeTlsStream::Tcp(stream))
}

/// Sends the SSLRequest and reads the server's single raw response byte.
///
/// This happens before the server has committed to framed replies, so
/// the byte is read directly off the stream. Returns whether the caller
/// should upgrade; under `disable` nothing is sent at all, and any
/// response other than `'S'` means the server declined.
pub(crate) fn negotiate_ssl<S: Read + Write>(stream: &mut S, mode: SslMode) -> Result<bool> {
    if mode == SslMode::Disable {
        return Ok(false);
    }

    stream.write_all(SSL_REQUEST)?;
    stream.flush()?;

    let mut buf = [0; 1];
    stream.read_exact(&mut buf)?;

    if buf[0] == b'S' {
        debug!("server accepted SSL upgrade");
        Ok(true)
    } else {
        Err(Error::SslRefused)
    }
}

fn upgrade_tls(stream: MaybeTlsStream, host: &str, mode: SslMode) -> Result<MaybeTlsStream> {
    let MaybeTlsStream::Tcp(tcp) = stream else {
        return Err(Error::Config(
            "TLS upgrade is only supported over TCP".into(),
        ));
    };

    let tls_config = match mode {
        SslMode::VerifyFull => verifying_config(),
        _ => trusting_config(),
    };

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Config(format!("host {host:?} is not a valid TLS server name")))?;

    let conn = ClientConnection::new(Arc::new(tls_config), server_name)?;
    Ok(MaybeTlsStream::Tls(Box::new(StreamOwned::new(conn, tcp))))
}

/// Full certificate and host-name verification against the webpki roots.
fn verifying_config() -> ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Encrypts the channel but accepts whatever certificate the server
/// presents, matching `sslmode=require` semantics.
fn trusting_config() -> ClientConfig {
    let algorithms =
        rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms;
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(algorithms)))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AcceptAnyCert(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}
