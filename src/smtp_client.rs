use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncRead as Read, AsyncWrite as Write};

use crate::authentication::{Credentials, Mechanism};
use crate::commands::*;
use crate::error::{Error, SmtpResult};
use crate::extension::{ClientId, Extension, MailBodyParameter, MailParameter, ServerInfo};
use crate::stream::SmtpStream;
use crate::{SendableEmail, Transport};

/// Contains client configuration
#[derive(Debug, Clone)]
pub struct SmtpClient {
    /// Name sent during EHLO
    hello_name: ClientId,
    /// Whether to expect greeting.
    /// Normally the server sends a greeting after connection,
    /// but not after STARTTLS.
    expect_greeting: bool,
    /// Use pipelining if the server supports it
    pipelining: bool,
    /// Upper bound for one whole mail transaction
    timeout: Option<Duration>,
}

impl Default for SmtpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the SMTP `SmtpTransport`
impl SmtpClient {
    /// Creates a new SMTP client.
    ///
    /// It does not connect to the server, but only creates the `SmtpTransport`.
    ///
    /// Defaults are:
    ///
    /// * Greeting expected
    /// * Pipelining used when offered
    /// * No transaction timeout
    pub fn new() -> Self {
        SmtpClient {
            hello_name: Default::default(),
            expect_greeting: true,
            pipelining: true,
            timeout: None,
        }
    }

    /// Enable PIPELINING if the server supports it
    pub fn pipelining(self, enabled: bool) -> SmtpClient {
        Self {
            pipelining: enabled,
            ..self
        }
    }

    /// Set the name used during EHLO
    pub fn hello_name(self, name: ClientId) -> SmtpClient {
        Self {
            hello_name: name,
            ..self
        }
    }

    /// Set the timeout for one mail transaction
    pub fn timeout(self, timeout: Option<Duration>) -> SmtpClient {
        Self { timeout, ..self }
    }

    /// Do not expect greeting.
    ///
    /// Used after STARTTLS, where the server does not greet again.
    pub fn without_greeting(self) -> SmtpClient {
        Self {
            expect_greeting: false,
            ..self
        }
    }
}

/// Structure that implements the high level SMTP client
#[derive(Debug)]
pub struct SmtpTransport<S: Read + Write + Unpin> {
    /// Information about the server
    server_info: ServerInfo,
    /// Information about the client
    client_info: SmtpClient,
    /// Low level client
    stream: SmtpStream<S>,
}

impl<S: Read + Write + Unpin> SmtpTransport<S> {
    /// Creates a new SMTP transport and greets the server.
    pub async fn new(builder: SmtpClient, stream: S) -> Result<Self, Error> {
        let mut stream = SmtpStream::new(stream);
        if builder.expect_greeting {
            let _greeting = stream.read_response().await?;
        }
        let ehlo_response = stream.ehlo(builder.hello_name.clone()).await?;
        let server_info = ServerInfo::from_response(&ehlo_response)?;

        debug!("server {}", server_info);

        let transport = SmtpTransport {
            server_info,
            client_info: builder,
            stream,
        };
        Ok(transport)
    }

    /// Information gathered from the last EHLO.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Try to login with the given accepted mechanisms.
    ///
    /// Fails if the server supports none of them.
    pub async fn try_login(
        &mut self,
        credentials: &Credentials,
        accepted_mechanisms: &[Mechanism],
    ) -> Result<(), Error> {
        match accepted_mechanisms
            .iter()
            .find(|mechanism| self.server_info.supports_auth_mechanism(**mechanism))
        {
            Some(mechanism) => {
                self.auth(*mechanism, credentials).await?;
                info!("authenticated as {} using {}", credentials.username(), mechanism);
                Ok(())
            }
            None => Err(Error::Client(
                "No supported authentication mechanisms available",
            )),
        }
    }

    /// Sends STARTTLS command if the server supports it.
    ///
    /// Returns inner stream which should be upgraded to TLS.
    pub async fn starttls(mut self) -> Result<S, Error> {
        if !self.supports_feature(Extension::StartTls) {
            return Err(From::from("server does not support STARTTLS"));
        }

        self.stream.command(StarttlsCommand).await?;

        // Return the stream, so the caller can upgrade it to TLS.
        Ok(self.stream.into_inner())
    }

    fn supports_feature(&self, keyword: Extension) -> bool {
        self.server_info.supports_feature(keyword)
    }

    /// Closes the SMTP transaction if possible.
    pub async fn quit(&mut self) -> Result<(), Error> {
        self.stream.command(QuitCommand).await?;

        Ok(())
    }

    /// Aborts the current mail transaction, keeping the connection.
    pub async fn reset(&mut self) -> Result<(), Error> {
        self.stream.command(RsetCommand).await?;

        Ok(())
    }

    /// Sends an AUTH command with the given mechanism, and handles challenge if needed
    pub async fn auth(&mut self, mechanism: Mechanism, credentials: &Credentials) -> SmtpResult {
        let mut challenges = 10;
        let mut response = self
            .stream
            .auth_command(&AuthCommand::new(mechanism, credentials.clone(), None)?)
            .await?;

        while challenges > 0 && response.has_code(334) {
            challenges -= 1;
            response = self
                .stream
                .auth_command(&AuthCommand::new_from_response(
                    mechanism,
                    credentials.clone(),
                    &response,
                )?)
                .await?;
        }

        if challenges == 0 {
            Err(Error::ResponseParsing("Unexpected number of challenges"))
        } else {
            Ok(response)
        }
    }

    /// Sends an email.
    pub async fn send(&mut self, email: &SendableEmail) -> SmtpResult {
        let mut mail_options = vec![];

        if self.supports_feature(Extension::EightBitMime) {
            mail_options.push(MailParameter::Body(MailBodyParameter::EightBitMime));
        }

        let pipelining =
            self.supports_feature(Extension::Pipelining) && self.client_info.pipelining;

        if pipelining {
            self.stream
                .send_command(MailCommand::new(
                    email.envelope().from().cloned(),
                    mail_options,
                ))
                .await?;
            let mut sent_commands = 1;

            for to_address in email.envelope().to() {
                self.stream
                    .send_command(RcptCommand::new(to_address.clone()))
                    .await?;
                sent_commands += 1;
            }

            self.stream.send_command(DataCommand).await?;
            sent_commands += 1;

            // Every pipelined reply has to be consumed, even after a rejection,
            // or the next transaction reads stale replies.
            let mut first_error = None;
            for _ in 0..sent_commands {
                match self.stream.read_response().await {
                    Ok(_) => {}
                    Err(err) if err.is_connection_lost() => return Err(err),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        } else {
            self.stream
                .command(MailCommand::new(
                    email.envelope().from().cloned(),
                    mail_options,
                ))
                .await?;

            for to_address in email.envelope().to() {
                self.stream
                    .command(RcptCommand::new(to_address.clone()))
                    .await?;
                debug!("to=<{}>", to_address);
            }

            self.stream.command(DataCommand).await?;
        }

        let res = self.stream.message(email.message()).await;

        if let Ok(result) = &res {
            debug!(
                "status=sent ({})",
                result.first_line().unwrap_or("no response")
            );
        }

        res
    }
}

#[async_trait]
impl<S: Read + Write + Unpin + Send> Transport for SmtpTransport<S> {
    async fn deliver(&mut self, email: &SendableEmail) -> Result<(), Error> {
        let timeout = self.client_info.timeout;

        match within(timeout, self.send(email)).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_connection_lost() => Err(err),
            Err(err) => {
                // Leave the connection ready for the next transaction.
                if let Err(reset_err) = within(timeout, self.reset()).await {
                    warn!("RSET after failed transaction failed: {}", reset_err);
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::NotConnected,
                        format!("{} (reset failed: {})", err, reset_err),
                    )));
                }
                Err(err)
            }
        }
    }

    async fn close(&mut self) -> Result<(), Error> {
        within(self.client_info.timeout, self.quit()).await
    }
}

/// Bounds `step` by `timeout`, when there is one.
async fn within<T, F>(timeout: Option<Duration>, step: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, step)
            .await
            .unwrap_or_else(|elapsed| Err(elapsed.into())),
        None => step.await,
    }
}
