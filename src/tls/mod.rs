//! TLS-adapted async sockets (`feature = "tls"`).
//!
//! Grounded on sockpuppet's `SocketTlsPriv` (`original_source/src/socket_tls_priv.h`):
//! a plain socket with a session object layered on top that exposes
//! "wants read"/"wants write" and makes incremental progress on each call.
//! This crate is a `rustls`-driven generalization of the same idea rather
//! than a direct port — OpenSSL's `SSL_read`/`SSL_write` and rustls's
//! `read_tls`/`process_new_packets`/`reader()` pump different amounts of
//! state per call, but both boil down to "feed ciphertext in, drain
//! plaintext out, flush whatever ciphertext the session produced" driven
//! by the same readable/writable events the plain path already uses
//! (`DESIGN.md`'s Open Question decision on the TLS library choice).

use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};

use crate::error::{Error, Result};
use crate::socket::SyncSocket;

/// Root-store-backed TLS configuration shared by every client connection
/// that uses it. Cheap to clone (an `Arc` underneath).
#[derive(Clone)]
pub struct ClientTlsConfig(Arc<rustls::ClientConfig>);

impl ClientTlsConfig {
    /// A client config trusting the Mozilla root set shipped by
    /// `webpki-roots`, with no client certificate.
    pub fn new() -> Result<ClientTlsConfig> {
        install_default_provider();
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(ClientTlsConfig(Arc::new(config)))
    }

    /// A client config trusting only the certificate at `ca_cert_path`,
    /// rather than the public web PKI — for talking to a server whose
    /// certificate isn't signed by a public root, e.g. an `rcgen`-generated
    /// self-signed certificate in a test, the same role a custom root store
    /// plays in `rustls`'s own test suite.
    pub fn trusting_ca(ca_cert_path: &Path) -> Result<ClientTlsConfig> {
        install_default_provider();
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certs(ca_cert_path)? {
            roots.add(cert).map_err(|e| Error::Tls(e.to_string()))?;
        }
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(ClientTlsConfig(Arc::new(config)))
    }
}

/// Certificate/key-backed TLS configuration shared by every accepted
/// connection that uses it.
#[derive(Clone)]
pub struct ServerTlsConfig(Arc<rustls::ServerConfig>);

impl ServerTlsConfig {
    /// Build a server config from a PEM certificate chain and PEM private
    /// key on disk — the usual way to hand a TLS-enabled TCP server its
    /// identity.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<ServerTlsConfig> {
        install_default_provider();
        let certs = load_certs(cert_path)?;
        let key = load_key(key_path)?;
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(ServerTlsConfig(Arc::new(config)))
    }
}

fn install_default_provider() {
    // Idempotent: a prior socket or config in this process may already
    // have installed it.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::Io)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", path.display())))
}

/// Adapts a non-blocking [`SyncSocket`] to `std::io::Read`/`Write` for
/// rustls's `read_tls`/`write_tls`, translating "would have blocked" into
/// the `io::ErrorKind::WouldBlock` rustls already knows how to stop on.
struct RawIo<'a>(&'a SyncSocket);

impl io::Read for RawIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.try_read(buf) {
            Ok(Some(n)) => Ok(n),
            Ok(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Err(Error::Io(e)) => Err(e),
            Err(Error::ConnectionClosed) => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }
}

impl io::Write for RawIo<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.try_write(buf) {
            Ok(Some(n)) => Ok(n),
            Ok(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            Err(Error::Io(e)) => Err(e),
            Err(Error::ConnectionClosed) => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
            Err(e) => Err(io::Error::other(e.to_string())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The ciphertext pump for one TLS-wrapped async socket. Owns the rustls
/// session; the underlying fd is supplied per call because the socket
/// itself is owned by the async wrapper, not by this type.
pub(crate) struct TlsTransport {
    conn: Box<dyn rustls::Connection + Send>,
}

impl TlsTransport {
    pub(crate) fn client(config: &ClientTlsConfig, server_name: &str) -> Result<TlsTransport> {
        let name = ServerName::try_from(server_name.to_string()).map_err(|e| Error::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(config.0.clone(), name).map_err(|e| Error::Tls(e.to_string()))?;
        Ok(TlsTransport { conn: Box::new(conn) })
    }

    pub(crate) fn server(config: &ServerTlsConfig) -> Result<TlsTransport> {
        let conn = rustls::ServerConnection::new(config.0.clone()).map_err(|e| Error::Tls(e.to_string()))?;
        Ok(TlsTransport { conn: Box::new(conn) })
    }

    /// Pull as much ciphertext off the wire as is available without
    /// blocking, decrypt it, and copy whatever plaintext resulted into
    /// `out`. `Ok(Some(0))` means the readable event was consumed making
    /// handshake progress with no payload to deliver — the caller must
    /// swallow it rather than treat it as an empty receive.
    pub(crate) fn on_readable(&mut self, sock: &SyncSocket, out: &mut [u8]) -> Result<Option<usize>> {
        self.pump_read(sock)?;
        self.pump_write(sock)?;

        use std::io::Read;
        match self.conn.reader().read(out) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Some(0)),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Encrypt `chunk` into the session's outgoing buffer and opportunistically
    /// flush it to the socket. Returns the number of plaintext bytes
    /// accepted, mirroring `SyncSocket::send_some`'s contract.
    pub(crate) fn send_some(&mut self, sock: &SyncSocket, chunk: &[u8]) -> Result<usize> {
        use std::io::Write;
        let n = self.conn.writer().write(chunk).map_err(Error::Io)?;
        self.pump_write(sock)?;
        Ok(n)
    }

    /// Flush any ciphertext the session has queued (handshake flights,
    /// pending application data) without encrypting anything new.
    pub(crate) fn flush_writes(&mut self, sock: &SyncSocket) -> Result<()> {
        self.pump_write(sock)
    }

    fn pump_read(&mut self, sock: &SyncSocket) -> Result<()> {
        let mut io = RawIo(sock);
        loop {
            match self.conn.read_tls(&mut io) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => return Err(Error::ConnectionClosed),
                Err(e) => return Err(Error::Io(e)),
            }
            if !self.conn.wants_read() {
                break;
            }
        }
        self.conn
            .process_new_packets()
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(())
    }

    fn pump_write(&mut self, sock: &SyncSocket) -> Result<()> {
        let mut io = RawIo(sock);
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut io) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}
