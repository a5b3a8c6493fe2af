//! The delivery engine: one shared session, many workers, one result per
//! recipient.

pub mod error;
pub mod pool;
pub mod report;
pub mod session;

pub use self::error::{ConfigurationError, ConnectionError, DeliveryError, DispatchError};
pub use self::pool::DispatchPool;
pub use self::report::{DeliveryResult, Outcome, Report};
pub use self::session::{RelayCredentials, SessionState, TransportSession};

use log::info;

use crate::message::MessageTemplate;
use crate::net::Connector;
use crate::types::EmailAddress;

/// Runs a complete dispatch: validate, connect, deliver, close.
///
/// Either fails with no results at all, or returns one result per entry of
/// `recipients`. The session is closed on every path once connected.
pub async fn dispatch<C: Connector>(
    connector: C,
    credentials: &RelayCredentials,
    template: &MessageTemplate,
    recipients: &[String],
    worker_count: usize,
) -> Result<Report, DispatchError> {
    let pool = DispatchPool::new(worker_count)?;
    pool::validate_recipients(recipients)?;
    validate_sender(template)?;

    let session = TransportSession::new(connector);
    session.connect(credentials).await?;

    let report = pool.run(&session, template, recipients).await;
    session.close().await;

    if let Ok(report) = &report {
        info!(
            "run finished: {} sent, {} failed",
            report.succeeded_count(),
            report.failed_count()
        );
    }
    report
}

fn validate_sender(template: &MessageTemplate) -> Result<(), ConfigurationError> {
    template
        .sender_address()
        .parse::<EmailAddress>()
        .map(|_| ())
        .map_err(|err| ConfigurationError::InvalidField {
            field: "sender_email",
            reason: err.to_string(),
        })
}
