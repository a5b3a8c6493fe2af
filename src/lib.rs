//! Frost sender delivers one message template to many recipients over a single
//! authenticated SMTP session.
//!
//! The pieces, bottom up:
//!
//! * an SMTP client ([`SmtpClient`], [`SmtpTransport`]) and a [`net::Connector`]
//!   that opens, secures and authenticates a connection,
//! * a [`dispatch::TransportSession`] that owns that one connection and
//!   serializes every send on it,
//! * a [`dispatch::DispatchPool`] that fans a recipient list out to the
//!   session with a bounded number of workers and reports one
//!   [`dispatch::DeliveryResult`] per recipient.
//!
//! ```rust,no_run
//! use frost_sender::dispatch::{self, RelayCredentials};
//! use frost_sender::message::MessageTemplate;
//! use frost_sender::net::SmtpConnector;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = RelayCredentials::new("smtp.example.org", 587, "user", "secret")?;
//! let template = MessageTemplate::new(
//!     "news@example.org",
//!     "Example News",
//!     "Hello",
//!     "<p>Hi {{recipient}}</p>",
//! );
//! let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
//!
//! let report = dispatch::dispatch(
//!     &SmtpConnector::new(),
//!     &credentials,
//!     &template,
//!     &recipients,
//!     4,
//! )
//! .await?;
//! println!("{} sent, {} failed", report.succeeded_count(), report.failed_count());
//! # Ok(())
//! # }
//! ```

#![deny(
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    missing_debug_implementations,
    clippy::unwrap_used
)]

pub mod authentication;
mod codec;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extension;
pub mod message;
pub mod net;
pub mod response;
mod smtp_client;
mod stream;
pub mod stub;
mod types;

pub use crate::smtp_client::{SmtpClient, SmtpTransport};
pub use crate::stream::SmtpStream;
pub use types::*;

use async_trait::async_trait;

/// Transport method for emails
///
/// One value is one connection; callers that share it across tasks must
/// serialize access themselves (see [`dispatch::TransportSession`]).
#[async_trait]
pub trait Transport: Send {
    /// Sends one email over the connection.
    ///
    /// A rejected transaction leaves the connection usable for the next one.
    /// Errors for which [`error::Error::is_connection_lost`] holds mean the
    /// connection is gone.
    async fn deliver(&mut self, email: &SendableEmail) -> Result<(), error::Error>;

    /// Ends the session politely.
    async fn close(&mut self) -> Result<(), error::Error>;
}
