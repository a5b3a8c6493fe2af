use std::fmt::Display;
use std::string::String;

use log::debug;
use tokio::io::{
    AsyncBufReadExt, AsyncRead as Read, AsyncWrite as Write, AsyncWriteExt, BufReader,
};

use crate::codec;
use crate::commands::*;
use crate::error::{Error, SmtpResult};
use crate::extension::ClientId;
use crate::response::parse_response;

/// SMTP stream.
#[derive(Debug)]
pub struct SmtpStream<S: Read + Write + Unpin> {
    /// Inner stream.
    inner: BufReader<S>,
}

impl<S: Read + Write + Unpin> SmtpStream<S> {
    /// Creates new SMTP stream.
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    /// Returns inner stream.
    ///
    /// Should only be used when there are no unread responses,
    /// because the buffer of `BufReader` may be lost.
    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Sends EHLO command and returns server response.
    pub async fn ehlo(&mut self, client_id: ClientId) -> SmtpResult {
        self.command(EhloCommand::new(client_id)).await
    }

    /// Send the given SMTP command to the server.
    pub async fn command(&mut self, command: impl Display) -> SmtpResult {
        self.send_command(command).await?;
        self.read_response().await
    }

    /// Sends the given SMTP command to the server without waiting for response.
    pub async fn send_command(&mut self, command: impl Display) -> Result<(), Error> {
        self.write(command.to_string().as_bytes()).await
    }

    /// Sends an AUTH command or challenge reply and waits for the response.
    ///
    /// Only its redacted form is logged.
    pub async fn auth_command(&mut self, command: &AuthCommand) -> SmtpResult {
        self.write_unlogged(command.to_string().as_bytes()).await?;
        debug!(">> {}", command.redacted());
        self.read_response().await
    }

    /// Writes the given data to the server.
    async fn write(&mut self, string: &[u8]) -> Result<(), Error> {
        self.write_unlogged(string).await?;

        debug!(
            ">> {}",
            escape_crlf(String::from_utf8_lossy(string).as_ref())
        );
        Ok(())
    }

    async fn write_unlogged(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.inner.get_mut().write_all(bytes).await?;
        self.inner.get_mut().flush().await?;
        Ok(())
    }

    /// Read an SMTP response from the wire.
    pub async fn read_response(&mut self) -> SmtpResult {
        let reader = &mut self.inner;
        let mut buffer = String::with_capacity(100);

        loop {
            let read = reader.read_line(&mut buffer).await?;
            if read == 0 {
                break;
            }
            debug!("<< {}", escape_crlf(&buffer));
            match parse_response(&buffer) {
                Ok((_remaining, response)) => {
                    if response.is_positive() {
                        return Ok(response);
                    }

                    return Err(response.into());
                }
                Err(nom::Err::Failure(e)) => {
                    return Err(Error::Parsing(e.code));
                }
                Err(nom::Err::Incomplete(_)) => { /* read more */ }
                Err(nom::Err::Error(e)) => {
                    return Err(Error::Parsing(e.code));
                }
            }
        }

        Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "incomplete").into())
    }

    /// Sends the message content and the terminating dot.
    pub(crate) async fn message(&mut self, message: &[u8]) -> SmtpResult {
        self.write_unlogged(&codec::encode_data(message)).await?;

        debug!(">> <{} bytes of message data>", message.len());

        self.read_response().await
    }
}

/// Returns the string replacing all the CRLF with "\<CRLF\>"
/// Used for debug displays
fn escape_crlf(string: &str) -> String {
    string.replace("\r\n", "<CRLF>")
}
