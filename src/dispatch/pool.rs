use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::channel::mpsc::{self, UnboundedSender};
use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};

use crate::dispatch::error::{ConfigurationError, DispatchError};
use crate::dispatch::report::{DeliveryResult, Report};
use crate::dispatch::session::TransportSession;
use crate::message::MessageTemplate;
use crate::net::Connector;

/// Reason recorded for recipients skipped after the connection was lost
pub const SESSION_UNAVAILABLE: &str = "session unavailable";

/// A bounded set of workers feeding one [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPool {
    workers: usize,
}

/// State every worker of one run shares.
struct Run<'a, C: Connector> {
    session: &'a TransportSession<C>,
    template: &'a MessageTemplate,
    recipients: &'a [String],
    /// Index of the next unclaimed recipient
    cursor: AtomicUsize,
    /// Set once the session is known to be unusable
    halted: AtomicBool,
    sink: UnboundedSender<DeliveryResult>,
}

impl DispatchPool {
    /// Fails unless `workers >= 1`.
    pub fn new(workers: usize) -> Result<Self, ConfigurationError> {
        if workers < 1 {
            return Err(ConfigurationError::WorkerCount(workers));
        }
        Ok(DispatchPool { workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Delivers to every recipient and returns once each has a result.
    ///
    /// Only argument validation can fail; delivery problems end up in the
    /// report.
    pub async fn run<C: Connector>(
        &self,
        session: &TransportSession<C>,
        template: &MessageTemplate,
        recipients: &[String],
    ) -> Result<Report, DispatchError> {
        let (sink, results) = mpsc::unbounded();
        self.run_with_sink(session, template, recipients, sink)
            .await?;

        // Every sender is gone by now, so the stream ends.
        let results: Vec<DeliveryResult> = results.collect().await;
        Ok(Report::new(results))
    }

    /// Like [`run`](DispatchPool::run), but hands each result to `sink` as
    /// soon as it is known.
    pub async fn run_with_sink<C: Connector>(
        &self,
        session: &TransportSession<C>,
        template: &MessageTemplate,
        recipients: &[String],
        sink: UnboundedSender<DeliveryResult>,
    ) -> Result<(), ConfigurationError> {
        validate_recipients(recipients)?;
        if recipients.is_empty() {
            return Ok(());
        }

        let run = Run {
            session,
            template,
            recipients,
            cursor: AtomicUsize::new(0),
            halted: AtomicBool::new(false),
            sink,
        };
        let workers = self.workers.min(recipients.len());
        info!(
            "dispatching to {} recipients with {} workers",
            recipients.len(),
            workers
        );

        join_all((0..workers).map(|id| run.work(id))).await;

        debug!("all workers finished");
        Ok(())
    }
}

/// [`DispatchPool::run`] in one call.
pub async fn run<C: Connector>(
    session: &TransportSession<C>,
    template: &MessageTemplate,
    recipients: &[String],
    worker_count: usize,
) -> Result<Report, DispatchError> {
    DispatchPool::new(worker_count)?
        .run(session, template, recipients)
        .await
}

pub(crate) fn validate_recipients(recipients: &[String]) -> Result<(), ConfigurationError> {
    match recipients.iter().position(|recipient| recipient.is_empty()) {
        Some(index) => Err(ConfigurationError::EmptyRecipient(index)),
        None => Ok(()),
    }
}

impl<'a, C: Connector> Run<'a, C> {
    /// Claims recipients until none are left.
    async fn work(&self, id: usize) {
        loop {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let recipient = match self.recipients.get(index) {
                Some(recipient) => recipient,
                None => break,
            };

            let result = if self.halted.load(Ordering::SeqCst) {
                DeliveryResult::failure(recipient.as_str(), SESSION_UNAVAILABLE)
            } else {
                self.attempt(recipient).await
            };

            if self.sink.unbounded_send(result).is_err() {
                debug!("worker {}: result receiver dropped", id);
            }
        }
        debug!("worker {} done", id);
    }

    async fn attempt(&self, recipient: &str) -> DeliveryResult {
        let template = self.template;
        let (subject, body) = template.personalize(recipient);

        let delivery = AssertUnwindSafe(self.session.deliver(
            template.sender_address(),
            template.sender_display_name(),
            recipient,
            &subject,
            &body,
        ))
        .catch_unwind()
        .await;

        match delivery {
            Ok(Ok(())) => DeliveryResult::success(recipient),
            Ok(Err(err)) => {
                if err.is_session_fatal() {
                    self.halted.store(true, Ordering::SeqCst);
                }
                warn!("{}", err);
                DeliveryResult::failure(recipient, err.into_reason())
            }
            Err(panic) => {
                let reason = format!("worker panicked: {}", panic_message(panic.as_ref()));
                warn!("delivery to {} failed: {}", recipient, reason);
                DeliveryResult::failure(recipient, reason)
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
