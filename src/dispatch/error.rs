//! Error types of a dispatch run

use crate::error::Error as SmtpError;

/// Invalid run parameters. Raised before any connection is attempted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("worker count must be at least 1, got {0}")]
    WorkerCount(usize),
    #[error("missing or empty field `{0}`")]
    MissingField(&'static str),
    #[error("invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("recipient #{0} is empty")]
    EmptyRecipient(usize),
    #[error("could not read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("malformed configuration: {0}")]
    Malformed(String),
}

/// The session could not be established.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: SmtpError,
    },
    #[error("session closed")]
    Closed,
}

/// One recipient could not be delivered to.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery to {recipient} failed: {reason}")]
pub struct DeliveryError {
    recipient: String,
    reason: String,
    session_fatal: bool,
}

impl DeliveryError {
    pub(crate) fn new(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        DeliveryError {
            recipient: recipient.into(),
            reason: reason.into(),
            session_fatal: false,
        }
    }

    pub(crate) fn fatal(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        DeliveryError {
            session_fatal: true,
            ..DeliveryError::new(recipient, reason)
        }
    }

    pub(crate) fn from_smtp(recipient: &str, err: &SmtpError) -> Self {
        if err.is_connection_lost() {
            DeliveryError::fatal(recipient, err.to_string())
        } else {
            DeliveryError::new(recipient, err.to_string())
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// The shared connection is gone; nothing else can be sent on it.
    pub fn is_session_fatal(&self) -> bool {
        self.session_fatal
    }

    pub fn into_reason(self) -> String {
        self.reason
    }
}

/// Fatal outcome of a run. No partial results accompany it.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
}
