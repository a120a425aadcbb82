//! A single SMTP session over TCP, optionally upgraded to TLS.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::auth::{select_method, AuthMethod, Authenticator};
use super::protocol::{codes, is_continuation, EsmtpCapabilities, SmtpCommand, SmtpResponse};
use super::SmtpResult;
use crate::config::{SmtpConfig, TlsMode};
use crate::errors::{SmtpError, SmtpErrorKind};
use crate::mime::dot_stuff;

/// Underlying byte stream.
pub(crate) enum SmtpStream {
    Plain(TcpStream),
    #[cfg(feature = "rustls-tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Placeholder while the TCP stream is handed to the TLS handshake.
    Detached,
}

fn detached() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "SMTP stream is detached")
}

impl AsyncRead for SmtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "rustls-tls")]
            SmtpStream::Tls(stream) => Pin::new(&mut **stream).poll_read(cx, buf),
            SmtpStream::Detached => Poll::Ready(Err(detached())),
        }
    }
}

impl AsyncWrite for SmtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "rustls-tls")]
            SmtpStream::Tls(stream) => Pin::new(&mut **stream).poll_write(cx, buf),
            SmtpStream::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "rustls-tls")]
            SmtpStream::Tls(stream) => Pin::new(&mut **stream).poll_flush(cx),
            SmtpStream::Detached => Poll::Ready(Err(detached())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            SmtpStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "rustls-tls")]
            SmtpStream::Tls(stream) => Pin::new(&mut **stream).poll_shutdown(cx),
            SmtpStream::Detached => Poll::Ready(Ok(())),
        }
    }
}

/// Outcome of one mail transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Delivery {
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
    /// Final reply to the message data, e.g. `250 2.0.0 queued as 1234`.
    pub response: String,
}

/// An established, greeted and (if configured) authenticated session.
pub(crate) struct SmtpConnection {
    stream: BufReader<SmtpStream>,
    capabilities: EsmtpCapabilities,
    tls_active: bool,
    command_timeout: Duration,
    peer: String,
}

impl fmt::Debug for SmtpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConnection")
            .field("peer", &self.peer)
            .field("tls_active", &self.tls_active)
            .finish_non_exhaustive()
    }
}

impl SmtpConnection {
    /// Connects, reads the greeting, negotiates TLS and authenticates.
    pub(crate) async fn connect(config: &SmtpConfig) -> SmtpResult<Self> {
        let address = config.address();
        let tcp = timeout(config.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                SmtpError::new(
                    SmtpErrorKind::Timeout,
                    format!("Connecting to {} timed out", address),
                )
            })?
            .map_err(|e| map_io_error(e, &address))?;
        let _ = tcp.set_nodelay(true);
        debug!(peer = %address, "smtp connected");

        let mut conn = Self {
            stream: BufReader::new(SmtpStream::Plain(tcp)),
            capabilities: EsmtpCapabilities::default(),
            tls_active: false,
            command_timeout: config.command_timeout,
            peer: address,
        };

        if config.tls == TlsMode::Implicit {
            conn.upgrade_tls(config).await?;
        }

        conn.read_response().await?.expect_code(codes::SERVICE_READY)?;
        conn.greet(config).await?;

        let starttls = match config.tls {
            TlsMode::StartTls => conn.capabilities.starttls && cfg!(feature = "rustls-tls"),
            TlsMode::StartTlsRequired if !conn.capabilities.starttls => {
                return Err(SmtpError::new(
                    SmtpErrorKind::StarttlsNotSupported,
                    format!("{} does not offer STARTTLS", conn.peer),
                ));
            }
            TlsMode::StartTlsRequired => true,
            TlsMode::None | TlsMode::Implicit => false,
        };
        if starttls {
            conn.command(&SmtpCommand::StartTls)
                .await?
                .expect_code(codes::SERVICE_READY)?;
            conn.upgrade_tls(config).await?;
            conn.greet(config).await?;
        }

        if config.has_auth() {
            conn.authenticate(config).await?;
        }

        Ok(conn)
    }

    /// Server capabilities from the latest EHLO.
    pub(crate) fn capabilities(&self) -> &EsmtpCapabilities {
        &self.capabilities
    }

    /// Returns true once TLS is negotiated.
    pub(crate) fn is_tls(&self) -> bool {
        self.tls_active
    }

    async fn greet(&mut self, config: &SmtpConfig) -> SmtpResult<()> {
        let client_id = config.client_id().to_string();
        let response = self.command(&SmtpCommand::Ehlo(client_id.clone())).await?;
        if response.is_success() {
            self.capabilities = EsmtpCapabilities::from_ehlo_response(&response);
            return Ok(());
        }

        debug!(peer = %self.peer, "EHLO refused, falling back to HELO");
        self.command(&SmtpCommand::Helo(client_id))
            .await?
            .expect_code(codes::OK)?;
        self.capabilities = EsmtpCapabilities::default();
        Ok(())
    }

    async fn authenticate(&mut self, config: &SmtpConfig) -> SmtpResult<()> {
        let (username, password) = match (&config.username, &config.password) {
            (Some(username), Some(password)) => (username.as_str(), password),
            _ => return Ok(()),
        };

        let plaintext_allowed = self.tls_active || config.tls == TlsMode::None;
        let method = select_method(
            &self.capabilities.auth_mechanisms,
            config.auth_method,
            plaintext_allowed,
        )?;
        debug!(peer = %self.peer, mechanism = %method, "smtp authenticating");

        let response = match method {
            AuthMethod::Plain => {
                self.command(&SmtpCommand::Auth {
                    mechanism: method.mechanism_name(),
                    initial_response: Some(Authenticator::plain_initial_response(
                        username, password,
                    )),
                })
                .await?
            }
            AuthMethod::Login => {
                self.command(&SmtpCommand::Auth {
                    mechanism: method.mechanism_name(),
                    initial_response: None,
                })
                .await?
                .expect_code(codes::AUTH_CONTINUE)?;
                self.command(&SmtpCommand::AuthResponse(Authenticator::login_username(
                    username,
                )))
                .await?
                .expect_code(codes::AUTH_CONTINUE)?;
                self.command(&SmtpCommand::AuthResponse(Authenticator::login_password(
                    password,
                )))
                .await?
            }
            AuthMethod::CramMd5 => {
                let challenge = self
                    .command(&SmtpCommand::Auth {
                        mechanism: method.mechanism_name(),
                        initial_response: None,
                    })
                    .await?
                    .expect_code(codes::AUTH_CONTINUE)?;
                let reply =
                    Authenticator::cram_md5_response(challenge.first_line(), username, password)?;
                self.command(&SmtpCommand::AuthResponse(reply)).await?
            }
            AuthMethod::XOAuth2 => {
                let response = self
                    .command(&SmtpCommand::Auth {
                        mechanism: method.mechanism_name(),
                        initial_response: Some(Authenticator::xoauth2_initial_response(
                            username, password,
                        )),
                    })
                    .await?;
                if response.code == codes::AUTH_CONTINUE {
                    // The server sent an error document; an empty line ends the exchange.
                    self.command(&SmtpCommand::AuthResponse(String::new())).await?
                } else {
                    response
                }
            }
        };

        if response.code != codes::AUTH_SUCCESS {
            return Err(response
                .to_error()
                .with_kind(SmtpErrorKind::CredentialsInvalid));
        }
        Ok(())
    }

    /// Runs MAIL FROM, RCPT TO for each recipient, and DATA.
    ///
    /// Individual recipient rejections are reported in the result; the
    /// transaction fails only when every recipient is refused.
    pub(crate) async fn send_mail(
        &mut self,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> SmtpResult<Delivery> {
        let smtputf8 = self.capabilities.smtputf8
            && (!from.is_ascii() || recipients.iter().any(|r| !r.is_ascii()));

        let reply = self
            .command(&SmtpCommand::MailFrom {
                address: from.to_string(),
                smtputf8,
            })
            .await?;
        if !reply.is_success() {
            let _ = self.reset().await;
            return Err(reply.to_error().with_kind(SmtpErrorKind::SenderRejected));
        }

        let mut accepted = Vec::with_capacity(recipients.len());
        let mut rejected = Vec::new();
        for recipient in recipients {
            let reply = self.command(&SmtpCommand::RcptTo(recipient.clone())).await?;
            if reply.is_success() {
                accepted.push(recipient.clone());
            } else {
                warn!(peer = %self.peer, recipient = %recipient, code = reply.code, "recipient rejected");
                rejected.push(recipient.clone());
            }
        }

        if accepted.is_empty() {
            let _ = self.reset().await;
            return Err(SmtpError::new(
                SmtpErrorKind::RecipientsRejected,
                format!("All {} recipients were rejected", rejected.len()),
            ));
        }

        self.command(&SmtpCommand::Data)
            .await?
            .expect_code(codes::START_MAIL_INPUT)?;
        self.write_all(&dot_stuff(data)).await?;
        let reply = self.read_response().await?.expect_code(codes::OK)?;

        Ok(Delivery {
            accepted,
            rejected,
            response: reply.to_string(),
        })
    }

    /// Aborts the current transaction.
    pub(crate) async fn reset(&mut self) -> SmtpResult<()> {
        self.command(&SmtpCommand::Rset)
            .await?
            .expect_code(codes::OK)
            .map(|_| ())
    }

    /// Liveness probe.
    pub(crate) async fn noop(&mut self) -> SmtpResult<()> {
        self.command(&SmtpCommand::Noop)
            .await?
            .expect_code(codes::OK)
            .map(|_| ())
    }

    /// Sends QUIT and shuts the stream down. Errors are ignored.
    pub(crate) async fn quit(mut self) {
        let _ = self.command(&SmtpCommand::Quit).await;
        let _ = self.stream.get_mut().shutdown().await;
    }

    async fn command(&mut self, command: &SmtpCommand) -> SmtpResult<SmtpResponse> {
        debug!(peer = %self.peer, command = %command.log_string(), "smtp command");
        let line = format!("{}\r\n", command.to_smtp_string());
        self.write_all(line.as_bytes()).await?;
        self.read_response().await
    }

    async fn write_all(&mut self, data: &[u8]) -> SmtpResult<()> {
        let stream = self.stream.get_mut();
        timeout(self.command_timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| SmtpError::new(SmtpErrorKind::Timeout, "Write timed out"))?
        .map_err(|e| map_io_error(e, &self.peer))
    }

    async fn read_response(&mut self) -> SmtpResult<SmtpResponse> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = timeout(self.command_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| SmtpError::new(SmtpErrorKind::Timeout, "Read timed out"))?
                .map_err(|e| map_io_error(e, &self.peer))?;
            if read == 0 {
                return Err(SmtpError::new(
                    SmtpErrorKind::ConnectionReset,
                    "Server closed connection",
                ));
            }

            let line = line.trim_end().to_string();
            let more = is_continuation(&line);
            lines.push(line);
            if !more {
                break;
            }
        }

        let response = SmtpResponse::parse(&lines)?;
        debug!(peer = %self.peer, code = response.code, message = %response.first_line(), "smtp reply");
        Ok(response)
    }

    #[cfg(feature = "rustls-tls")]
    async fn upgrade_tls(&mut self, config: &SmtpConfig) -> SmtpResult<()> {
        use rustls::pki_types::ServerName;
        use std::mem;

        if self.tls_active {
            return Ok(());
        }

        let server_name = ServerName::try_from(config.host.clone()).map_err(|e| {
            SmtpError::new(
                SmtpErrorKind::TlsHandshakeFailed,
                format!("Invalid server name: {}", config.host),
            )
            .with_cause(e)
        })?;
        let connector = tls::connector(config.accept_invalid_certs);

        let reader = mem::replace(&mut self.stream, BufReader::new(SmtpStream::Detached));
        let tcp = match reader.into_inner() {
            SmtpStream::Plain(tcp) => tcp,
            other => {
                self.stream = BufReader::new(other);
                return Err(SmtpError::new(
                    SmtpErrorKind::TlsHandshakeFailed,
                    "Stream is not a plain TCP connection",
                ));
            }
        };

        let tls_stream = timeout(config.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| SmtpError::new(SmtpErrorKind::Timeout, "TLS handshake timed out"))?
            .map_err(|e| {
                SmtpError::new(SmtpErrorKind::TlsHandshakeFailed, "TLS handshake failed")
                    .with_cause(e)
            })?;

        self.stream = BufReader::new(SmtpStream::Tls(Box::new(tls_stream)));
        self.tls_active = true;
        debug!(peer = %self.peer, "smtp tls established");
        Ok(())
    }

    #[cfg(not(feature = "rustls-tls"))]
    async fn upgrade_tls(&mut self, _config: &SmtpConfig) -> SmtpResult<()> {
        Err(SmtpError::new(
            SmtpErrorKind::TlsHandshakeFailed,
            "TLS support is not compiled in; enable the rustls-tls feature",
        ))
    }
}

fn map_io_error(error: io::Error, address: &str) -> SmtpError {
    let kind = match error.kind() {
        io::ErrorKind::ConnectionRefused => SmtpErrorKind::ConnectionRefused,
        io::ErrorKind::TimedOut => SmtpErrorKind::Timeout,
        _ => SmtpErrorKind::ConnectionReset,
    };
    SmtpError::new(kind, format!("I/O error talking to {}", address)).with_cause(error)
}

#[cfg(feature = "rustls-tls")]
mod tls {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
    use std::sync::Arc;
    use tokio_rustls::TlsConnector;

    pub(super) fn connector(accept_invalid_certs: bool) -> TlsConnector {
        let config = if accept_invalid_certs {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        TlsConnector::from(Arc::new(config))
    }

    /// Skips certificate validation. Test relays only.
    #[derive(Debug)]
    struct AcceptAnyCert;

    impl ServerCertVerifier for AcceptAnyCert {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::ED25519,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
            ]
        }
    }
}
