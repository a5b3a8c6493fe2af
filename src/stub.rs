//! The stub transport keeps messages in memory instead of sending them. It can
//! be told to reject some recipients or to lose the connection, which makes it
//! useful for testing and dry runs.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use crate::dispatch::RelayCredentials;
use crate::error::Error;
use crate::net::Connector;
use crate::response::{Category, Code, Detail, Response, Severity};
use crate::{SendableEmail, Transport};

/// A message the stub accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub from: Option<String>,
    pub recipient: String,
    pub message: Vec<u8>,
}

#[derive(Debug, Default)]
struct Behavior {
    refuse_connect: bool,
    rejected: HashSet<String>,
    drop_at: HashSet<String>,
    panic_at: HashSet<String>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Log {
    sent: Mutex<Vec<SentMessage>>,
    attempts: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicBool,
    interleaved: AtomicBool,
}

/// Hands out [`StubTransport`]s that share one behavior and one log.
#[derive(Debug, Clone, Default)]
pub struct StubConnector {
    behavior: Arc<Behavior>,
    log: Arc<Log>,
}

impl StubConnector {
    /// Creates a connector whose transports accept everything
    pub fn new() -> StubConnector {
        StubConnector::default()
    }

    fn with_behavior(self, update: impl FnOnce(&mut Behavior)) -> StubConnector {
        let mut behavior = Behavior {
            refuse_connect: self.behavior.refuse_connect,
            rejected: self.behavior.rejected.clone(),
            drop_at: self.behavior.drop_at.clone(),
            panic_at: self.behavior.panic_at.clone(),
            latency: self.behavior.latency,
        };
        update(&mut behavior);
        StubConnector {
            behavior: Arc::new(behavior),
            log: self.log,
        }
    }

    /// Every connection attempt fails as if authentication was rejected
    pub fn refusing_connections(self) -> StubConnector {
        self.with_behavior(|behavior| behavior.refuse_connect = true)
    }

    /// Recipients answered with a permanent `550`
    pub fn rejecting<I, S>(self, recipients: I) -> StubConnector
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_behavior(|behavior| {
            behavior
                .rejected
                .extend(recipients.into_iter().map(Into::into))
        })
    }

    /// The connection breaks while sending to this recipient
    pub fn dropping_at(self, recipient: impl Into<String>) -> StubConnector {
        self.with_behavior(|behavior| {
            behavior.drop_at.insert(recipient.into());
        })
    }

    /// The transport panics while sending to this recipient
    pub fn panicking_at(self, recipient: impl Into<String>) -> StubConnector {
        self.with_behavior(|behavior| {
            behavior.panic_at.insert(recipient.into());
        })
    }

    /// Time each send spends "on the wire"
    pub fn with_latency(self, latency: Duration) -> StubConnector {
        self.with_behavior(|behavior| behavior.latency = Some(latency))
    }

    /// Messages accepted so far, in send order
    pub fn sent(&self) -> Vec<SentMessage> {
        self.log
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sends attempted, accepted or not
    pub fn attempts(&self) -> usize {
        self.log.attempts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.log.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.log.closes.load(Ordering::SeqCst)
    }

    /// Whether two sends were ever on the wire at the same time
    pub fn saw_interleaving(&self) -> bool {
        self.log.interleaved.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    type Transport = StubTransport;

    async fn connect(&self, credentials: &RelayCredentials) -> Result<StubTransport, Error> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        if self.behavior.refuse_connect {
            return Err(Error::Permanent(response(
                Severity::PermanentNegativeCompletion,
                Category::Unspecified3,
                5,
                "5.7.8 authentication credentials invalid",
            )));
        }

        info!(
            "stub session for {} on {}:{}",
            credentials.username(),
            credentials.host(),
            credentials.port()
        );
        Ok(StubTransport {
            behavior: self.behavior.clone(),
            log: self.log.clone(),
            connected: true,
        })
    }
}

/// One stub connection
#[derive(Debug)]
pub struct StubTransport {
    behavior: Arc<Behavior>,
    log: Arc<Log>,
    connected: bool,
}

impl StubTransport {
    async fn transmit(&mut self, email: &SendableEmail) -> Result<(), Error> {
        if !self.connected {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        }

        let recipient = email
            .envelope()
            .to()
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();

        // Give other tasks a chance to run while this send is "in progress".
        match self.behavior.latency {
            Some(latency) => tokio::time::sleep(latency).await,
            None => tokio::task::yield_now().await,
        }

        if self.behavior.panic_at.contains(&recipient) {
            self.log.in_flight.store(false, Ordering::SeqCst);
            panic!("stub transport failed mid-transaction for {}", recipient);
        }

        if self.behavior.drop_at.contains(&recipient) {
            self.connected = false;
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }

        if self.behavior.rejected.contains(&recipient) {
            return Err(Error::Permanent(response(
                Severity::PermanentNegativeCompletion,
                Category::MailSystem,
                0,
                "5.1.1 mailbox unavailable",
            )));
        }

        info!(
            "from=<{}> to=<{}>",
            email
                .envelope()
                .from()
                .map(ToString::to_string)
                .unwrap_or_default(),
            recipient
        );
        self.log
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentMessage {
                from: email.envelope().from().map(ToString::to_string),
                recipient,
                message: email.message().to_vec(),
            });
        Ok(())
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn deliver(&mut self, email: &SendableEmail) -> Result<(), Error> {
        self.log.attempts.fetch_add(1, Ordering::SeqCst);
        if self.log.in_flight.swap(true, Ordering::SeqCst) {
            self.log.interleaved.store(true, Ordering::SeqCst);
        }

        let result = self.transmit(email).await;

        self.log.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        Ok(())
    }
}

fn response(severity: Severity, category: Category, detail: u8, text: &str) -> Response {
    Response::new(
        Code::new(severity, category, Detail(detail)),
        vec![text.to_string()],
    )
}
