//! Opening authenticated SMTP connections

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_native_tls::{TlsConnector, TlsStream};
use async_trait::async_trait;
use log::{debug, info};
use pin_project::pin_project;
use tokio::io::{AsyncRead as Read, AsyncWrite as Write, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::authentication::DEFAULT_ENCRYPTED_MECHANISMS;
use crate::dispatch::RelayCredentials;
use crate::error::Error;
use crate::extension::ClientId;
use crate::smtp_client::{SmtpClient, SmtpTransport};
use crate::Transport;

/// Default submission port
pub const SUBMISSION_PORT: u16 = 587;
/// Default submission over TLS port
pub const SUBMISSIONS_PORT: u16 = 465;

/// How to apply TLS to a client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSecurity {
    /// Insecure connection only (for testing purposes)
    None,
    /// Start with insecure connection and require `STARTTLS`
    Required,
    /// Use TLS wrapped connection
    Wrapper,
}

impl ClientSecurity {
    /// `Wrapper` for the submissions port, `Required` otherwise.
    pub fn for_port(port: u16) -> ClientSecurity {
        if port == SUBMISSIONS_PORT {
            ClientSecurity::Wrapper
        } else {
            ClientSecurity::Required
        }
    }
}

/// Represents the different types of underlying network streams
#[pin_project(project = NetworkStreamProj)]
pub enum NetworkStream {
    /// Plain TCP stream
    Tcp(#[pin] TcpStream),
    /// Encrypted TCP stream
    Tls(#[pin] TlsStream<TcpStream>),
}

impl fmt::Debug for NetworkStream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            NetworkStream::Tcp(_) => "NetworkStream::Tcp",
            NetworkStream::Tls(_) => "NetworkStream::Tls",
        })
    }
}

impl NetworkStream {
    /// Is the NetworkStream encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, NetworkStream::Tls(_))
    }
}

impl Read for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_read(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_read(cx, buf),
        }
    }
}

impl Write for NetworkStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_write(cx, buf),
            NetworkStreamProj::Tls(s) => s.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_flush(cx),
            NetworkStreamProj::Tls(s) => s.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<io::Result<()>> {
        match self.project() {
            NetworkStreamProj::Tcp(s) => s.poll_shutdown(cx),
            NetworkStreamProj::Tls(s) => s.poll_shutdown(cx),
        }
    }
}

/// A trait for the concept of opening an authenticated transport
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connected transport
    type Transport: Transport;

    /// Connects to the relay named in `credentials`, secures the channel and
    /// logs in.
    async fn connect(&self, credentials: &RelayCredentials) -> Result<Self::Transport, Error>;
}

#[async_trait]
impl<'c, C: Connector> Connector for &'c C {
    type Transport = C::Transport;

    async fn connect(&self, credentials: &RelayCredentials) -> Result<Self::Transport, Error> {
        (**self).connect(credentials).await
    }
}

/// Connector for a real relay over TCP.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    client: SmtpClient,
    security: Option<ClientSecurity>,
    timeout: Duration,
    accept_invalid_certs: bool,
}

impl Default for SmtpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpConnector {
    /// Defaults are:
    ///
    /// * TLS chosen by port (`Wrapper` on 465, `STARTTLS` elsewhere)
    /// * A 60 seconds timeout for connecting and for each delivery
    /// * Certificate validation on
    pub fn new() -> Self {
        let timeout = Duration::from_secs(60);
        SmtpConnector {
            client: SmtpClient::new().timeout(Some(timeout)),
            security: None,
            timeout,
            accept_invalid_certs: false,
        }
    }

    /// Force a TLS mode instead of deriving it from the port
    pub fn security(self, security: ClientSecurity) -> Self {
        Self {
            security: Some(security),
            ..self
        }
    }

    /// Set the name used during EHLO
    pub fn hello_name(self, name: ClientId) -> Self {
        Self {
            client: self.client.hello_name(name),
            ..self
        }
    }

    /// Set the network timeout
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            client: self.client.timeout(Some(timeout)),
            timeout,
            ..self
        }
    }

    /// Skip certificate validation (self-signed test relays)
    pub fn accept_invalid_certs(self, accept: bool) -> Self {
        Self {
            accept_invalid_certs: accept,
            ..self
        }
    }

    fn tls(&self) -> TlsConnector {
        TlsConnector::new()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.accept_invalid_certs)
    }

    async fn handshake(
        &self,
        credentials: &RelayCredentials,
    ) -> Result<SmtpTransport<NetworkStream>, Error> {
        let security = self
            .security
            .unwrap_or_else(|| ClientSecurity::for_port(credentials.port()));

        let tcp_stream = timeout(
            self.timeout,
            TcpStream::connect((credentials.host(), credentials.port())),
        )
        .await??;
        debug!(
            "connection established to {}:{}",
            credentials.host(),
            credentials.port()
        );

        match security {
            ClientSecurity::None => {
                SmtpTransport::new(self.client.clone(), NetworkStream::Tcp(tcp_stream)).await
            }
            ClientSecurity::Wrapper => {
                let tls_stream = timeout(
                    self.timeout,
                    self.tls().connect(credentials.host(), tcp_stream),
                )
                .await??;
                SmtpTransport::new(self.client.clone(), NetworkStream::Tls(tls_stream)).await
            }
            ClientSecurity::Required => {
                let transport = SmtpTransport::new(self.client.clone(), tcp_stream).await?;
                let tcp_stream = transport.starttls().await?;
                let tls_stream = timeout(
                    self.timeout,
                    self.tls().connect(credentials.host(), tcp_stream),
                )
                .await??;
                debug!("connection encrypted");

                // The server does not greet again; EHLO is repeated.
                SmtpTransport::new(
                    self.client.clone().without_greeting(),
                    NetworkStream::Tls(tls_stream),
                )
                .await
            }
        }
    }
}

#[async_trait]
impl Connector for SmtpConnector {
    type Transport = SmtpTransport<NetworkStream>;

    async fn connect(&self, credentials: &RelayCredentials) -> Result<Self::Transport, Error> {
        let mut transport = timeout(self.timeout, self.handshake(credentials)).await??;

        timeout(
            self.timeout,
            transport.try_login(&credentials.to_credentials(), DEFAULT_ENCRYPTED_MECHANISMS),
        )
        .await??;

        info!(
            "session ready on {}:{} ({})",
            credentials.host(),
            credentials.port(),
            transport.server_info()
        );
        Ok(transport)
    }
}
