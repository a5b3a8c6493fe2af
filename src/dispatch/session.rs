use std::fmt;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::authentication::Credentials;
use crate::dispatch::error::{ConfigurationError, ConnectionError, DeliveryError};
use crate::dispatch::pool::panic_message;
use crate::message;
use crate::net::Connector;
use crate::Transport;

/// Where and as whom to log in.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    host: String,
    port: u16,
    username: String,
    secret: String,
}

impl RelayCredentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let credentials = RelayCredentials {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
        };

        if credentials.host.trim().is_empty() {
            return Err(ConfigurationError::MissingField("host"));
        }
        if credentials.port == 0 {
            return Err(ConfigurationError::InvalidField {
                field: "port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if credentials.username.is_empty() {
            return Err(ConfigurationError::MissingField("username"));
        }
        if credentials.secret.is_empty() {
            return Err(ConfigurationError::MissingField("secret"));
        }

        Ok(credentials)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// SASL credentials for the login step
    pub fn to_credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.secret.clone())
    }
}

impl fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RelayCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"********")
            .finish()
    }
}

/// Lifecycle stage of a [`TransportSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Ready,
    /// The connection dropped while in use.
    Broken,
    Closed,
}

enum State<T> {
    Unauthenticated,
    Ready(T),
    Broken,
    Closed,
}

impl<T> State<T> {
    fn tag(&self) -> SessionState {
        match self {
            State::Unauthenticated => SessionState::Unauthenticated,
            State::Ready(_) => SessionState::Ready,
            State::Broken => SessionState::Broken,
            State::Closed => SessionState::Closed,
        }
    }
}

/// One authenticated connection, shared by every worker of a run.
///
/// All access to the connection goes through an async mutex, so concurrent
/// [`deliver`](TransportSession::deliver) calls queue up and each message is
/// written to the wire in one piece.
pub struct TransportSession<C: Connector> {
    connector: C,
    state: Mutex<State<C::Transport>>,
}

impl<C: Connector> fmt::Debug for TransportSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.state.try_lock() {
            Ok(state) => format!("{:?}", state.tag()),
            Err(_) => "<in use>".to_string(),
        };
        f.debug_struct("TransportSession")
            .field("state", &state)
            .finish()
    }
}

impl<C: Connector> TransportSession<C> {
    /// A session that has not connected yet.
    pub fn new(connector: C) -> Self {
        TransportSession {
            connector,
            state: Mutex::new(State::Unauthenticated),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub async fn state(&self) -> SessionState {
        self.state.lock().await.tag()
    }

    pub async fn is_ready(&self) -> bool {
        self.state().await == SessionState::Ready
    }

    /// Connects, secures and logs in.
    ///
    /// A failed attempt leaves the session unauthenticated, so it can be
    /// retried. A broken session reconnects; a closed one refuses.
    pub async fn connect(&self, credentials: &RelayCredentials) -> Result<(), ConnectionError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Ready(_) => return Ok(()),
            State::Closed => return Err(ConnectionError::Closed),
            State::Broken => info!("reconnecting broken session"),
            State::Unauthenticated => {}
        }

        info!(
            "connecting to {}:{} as {}",
            credentials.host(),
            credentials.port(),
            credentials.username()
        );
        match self.connector.connect(credentials).await {
            Ok(transport) => {
                *state = State::Ready(transport);
                Ok(())
            }
            Err(source) => {
                *state = State::Unauthenticated;
                Err(ConnectionError::Connect {
                    host: credentials.host().to_string(),
                    port: credentials.port(),
                    source,
                })
            }
        }
    }

    /// Sends one message to `recipient_address`.
    ///
    /// A rejection only fails this call. When the connection itself is lost,
    /// or the transport panics mid-transaction, the error is session-fatal and
    /// the session becomes [`SessionState::Broken`].
    pub async fn deliver(
        &self,
        sender_address: &str,
        sender_display_name: &str,
        recipient_address: &str,
        subject: &str,
        body_html: &str,
    ) -> Result<(), DeliveryError> {
        let email = message::compose(
            sender_address,
            sender_display_name,
            recipient_address,
            subject,
            body_html,
        )
        .map_err(|err| DeliveryError::new(recipient_address, err.to_string()))?;

        let mut state = self.state.lock().await;
        let sent = match &mut *state {
            State::Ready(transport) => AssertUnwindSafe(transport.deliver(&email))
                .catch_unwind()
                .await,
            State::Broken => {
                return Err(DeliveryError::fatal(
                    recipient_address,
                    "session unavailable",
                ))
            }
            State::Unauthenticated | State::Closed => {
                return Err(DeliveryError::new(recipient_address, "not connected"))
            }
        };

        match sent {
            Ok(Ok(())) => {
                debug!("delivered to {}", recipient_address);
                Ok(())
            }
            Ok(Err(err)) => {
                let err = DeliveryError::from_smtp(recipient_address, &err);
                if err.is_session_fatal() {
                    warn!(
                        "connection lost while sending to {}: {}",
                        recipient_address,
                        err.reason()
                    );
                    *state = State::Broken;
                }
                Err(err)
            }
            // The transaction may be half written; the connection is unusable.
            Err(panic) => {
                *state = State::Broken;
                Err(DeliveryError::fatal(
                    recipient_address,
                    format!("transport panicked: {}", panic_message(panic.as_ref())),
                ))
            }
        }
    }

    /// Says goodbye to the relay and drops the connection. Calling it again
    /// does nothing.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let State::Ready(mut transport) = std::mem::replace(&mut *state, State::Closed) {
            if let Err(err) = transport.close().await {
                warn!("QUIT failed: {}", err);
            }
            info!("session closed");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_credentials_validation() {
        assert!(RelayCredentials::new("smtp.example.org", 587, "user", "secret").is_ok());
        assert_eq!(
            RelayCredentials::new("", 587, "user", "secret"),
            Err(ConfigurationError::MissingField("host"))
        );
        assert!(matches!(
            RelayCredentials::new("smtp.example.org", 0, "user", "secret"),
            Err(ConfigurationError::InvalidField { field: "port", .. })
        ));
        assert_eq!(
            RelayCredentials::new("smtp.example.org", 587, "", "secret"),
            Err(ConfigurationError::MissingField("username"))
        );
        assert_eq!(
            RelayCredentials::new("smtp.example.org", 587, "user", ""),
            Err(ConfigurationError::MissingField("secret"))
        );
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials =
            RelayCredentials::new("smtp.example.org", 587, "user", "hunter2").unwrap();
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }
}
