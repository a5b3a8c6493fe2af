mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;

use frost_sender::authentication::DEFAULT_ENCRYPTED_MECHANISMS;
use frost_sender::dispatch::{
    self, ConnectionError, DispatchError, RelayCredentials, SessionState, TransportSession,
};
use frost_sender::dispatch::pool::SESSION_UNAVAILABLE;
use frost_sender::error::Error;
use frost_sender::extension::ClientId;
use frost_sender::message::MessageTemplate;
use frost_sender::net::{ClientSecurity, Connector, SmtpConnector};
use frost_sender::{SmtpClient, SmtpTransport};

use support::{RelayLog, RelayScript, SharedLog};

/// Connects every session to an in-process relay over a duplex pipe.
struct ScriptedConnector {
    script: RelayScript,
    log: SharedLog,
    timeout: Option<Duration>,
}

impl ScriptedConnector {
    fn new(script: RelayScript) -> Self {
        ScriptedConnector {
            script,
            log: Arc::new(Mutex::new(RelayLog::default())),
            timeout: None,
        }
    }

    fn with_timeout(self, timeout: Duration) -> Self {
        ScriptedConnector {
            timeout: Some(timeout),
            ..self
        }
    }

    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().commands.clone()
    }

    fn messages(&self) -> Vec<String> {
        self.log.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = SmtpTransport<DuplexStream>;

    async fn connect(&self, credentials: &RelayCredentials) -> Result<Self::Transport, Error> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(support::serve(
            server,
            self.script.clone(),
            self.log.clone(),
        ));

        let client_id = ClientId::new("tester.example.org".to_string());
        let client_info = SmtpClient::new()
            .hello_name(client_id)
            .timeout(self.timeout);
        let mut transport = SmtpTransport::new(client_info, client).await?;
        transport
            .try_login(&credentials.to_credentials(), DEFAULT_ENCRYPTED_MECHANISMS)
            .await?;
        Ok(transport)
    }
}

fn credentials() -> RelayCredentials {
    RelayCredentials::new("relay.example.org", 587, "mailer", "secret").unwrap()
}

fn template() -> MessageTemplate {
    MessageTemplate::new(
        "news@example.org",
        "Example News",
        "Hello {{recipient}}",
        "<p>Hi {{recipient}}</p>",
    )
}

fn recipients(list: &[&str]) -> Vec<String> {
    list.iter().map(|recipient| recipient.to_string()).collect()
}

async fn rejection_keeps_session(script: RelayScript) {
    let connector = ScriptedConnector::new(script.rejecting("b@example.com"));
    let list = recipients(&["a@example.com", "b@example.com", "c@example.com"]);

    let report = dispatch::dispatch(&connector, &credentials(), &template(), &list, 3)
        .await
        .unwrap();

    assert_eq!(report.len(), 3);
    assert!(report.get("a@example.com").unwrap().is_success());
    assert!(report.get("c@example.com").unwrap().is_success());
    let rejected = report.get("b@example.com").unwrap();
    assert!(!rejected.is_success());
    assert!(rejected.reason().unwrap().contains("550"));

    let messages = connector.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|message| message.contains("MIME-Version: 1.0")));

    let commands = connector.commands();
    assert_eq!(
        commands.iter().filter(|command| command.starts_with("EHLO")).count(),
        1
    );
    assert!(commands.contains(&"AUTH PLAIN AG1haWxlcgBzZWNyZXQ=".to_string()));
    assert!(commands.contains(&"RSET".to_string()));
    assert_eq!(commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_rejection_keeps_session() {
    rejection_keeps_session(RelayScript::new("mailer", "secret")).await;
}

#[tokio::test]
async fn test_rejection_keeps_pipelined_session() {
    rejection_keeps_session(RelayScript::new("mailer", "secret").with_pipelining()).await;
}

#[tokio::test]
async fn test_personalized_message_on_the_wire() {
    let connector = ScriptedConnector::new(RelayScript::new("mailer", "secret"));
    let list = recipients(&["ada@example.com"]);

    let report = dispatch::dispatch(&connector, &credentials(), &template(), &list, 1)
        .await
        .unwrap();
    assert_eq!(report.succeeded_count(), 1);

    let messages = connector.messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert!(message.contains("From: Example News <news@example.org>\r\n"));
    assert!(message.contains("To: ada@example.com\r\n"));
    assert!(message.contains("Subject: Hello ada@example.com\r\n"));
    assert!(message.contains(&base64::encode("<p>Hi ada@example.com</p>")));

    let commands = connector.commands();
    assert!(commands.contains(&"MAIL FROM:<news@example.org> BODY=8BITMIME".to_string()));
    assert!(commands.contains(&"RCPT TO:<ada@example.com>".to_string()));
}

#[tokio::test]
async fn test_hang_up_fails_remaining_recipients() {
    let connector = ScriptedConnector::new(
        RelayScript::new("mailer", "secret").hanging_up_at("b@example.com"),
    );
    let list = recipients(&[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
    ]);

    let report = dispatch::dispatch(&connector, &credentials(), &template(), &list, 1)
        .await
        .unwrap();

    assert_eq!(report.len(), 4);
    assert!(report.get("a@example.com").unwrap().is_success());
    assert!(!report.get("b@example.com").unwrap().is_success());
    for recipient in ["c@example.com", "d@example.com"] {
        assert_eq!(
            report.get(recipient).unwrap().reason(),
            Some("session unavailable")
        );
    }
    assert_eq!(connector.messages().len(), 1);
}

#[tokio::test]
async fn test_bad_credentials_fail_before_delivery() {
    let connector = ScriptedConnector::new(RelayScript::new("mailer", "other"));
    let list = recipients(&["a@example.com"]);

    let err = dispatch::dispatch(&connector, &credentials(), &template(), &list, 2)
        .await
        .unwrap_err();

    match err {
        DispatchError::Connection(ConnectionError::Connect { host, port, source }) => {
            assert_eq!(host, "relay.example.org");
            assert_eq!(port, 587);
            assert!(matches!(source, Error::Permanent(_)));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(connector.messages().is_empty());
    assert!(!connector
        .commands()
        .iter()
        .any(|command| command.starts_with("MAIL")));
}

#[tokio::test]
async fn test_session_reconnects_after_break() {
    let connector = ScriptedConnector::new(
        RelayScript::new("mailer", "secret").hanging_up_at("b@example.com"),
    );
    let session = TransportSession::new(connector);
    let tpl = template();

    session.connect(&credentials()).await.unwrap();
    let err = session
        .deliver(
            tpl.sender_address(),
            tpl.sender_display_name(),
            "b@example.com",
            tpl.subject(),
            tpl.body_html(),
        )
        .await
        .unwrap_err();
    assert!(err.is_session_fatal());
    assert_eq!(session.state().await, SessionState::Broken);

    session.connect(&credentials()).await.unwrap();
    assert!(session.is_ready().await);
    session
        .deliver(
            tpl.sender_address(),
            tpl.sender_display_name(),
            "c@example.com",
            tpl.subject(),
            tpl.body_html(),
        )
        .await
        .unwrap();

    session.close().await;
    assert_eq!(session.state().await, SessionState::Closed);
    assert_eq!(session.connector().messages().len(), 1);
}

#[tokio::test]
async fn test_smtp_connector_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: SharedLog = Arc::new(Mutex::new(RelayLog::default()));

    let server_log = log.clone();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        support::serve(stream, RelayScript::new("mailer", "secret"), server_log).await;
    });

    let connector = SmtpConnector::new().security(ClientSecurity::None);
    let credentials = RelayCredentials::new("127.0.0.1", port, "mailer", "secret").unwrap();
    let list = recipients(&["a@example.com", "b@example.com"]);

    let report = dispatch::dispatch(connector, &credentials, &template(), &list, 2)
        .await
        .unwrap();
    server.await.unwrap();

    assert_eq!(report.succeeded_count(), 2);
    let log = log.lock().unwrap();
    assert_eq!(log.messages.len(), 2);
    assert_eq!(log.commands.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn test_starttls_required_but_not_offered() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let log: SharedLog = Arc::new(Mutex::new(RelayLog::default()));

    let server_log = log.clone();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        support::serve(stream, RelayScript::new("mailer", "secret"), server_log).await;
    });

    let connector = SmtpConnector::new().security(ClientSecurity::Required);
    let credentials = RelayCredentials::new("127.0.0.1", port, "mailer", "secret").unwrap();
    let err = dispatch::dispatch(
        connector,
        &credentials,
        &template(),
        &recipients(&["a@example.com"]),
        1,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        DispatchError::Connection(ConnectionError::Connect {
            source: Error::Client(_),
            ..
        })
    ));
    assert!(!log
        .lock()
        .unwrap()
        .commands
        .iter()
        .any(|command| command.starts_with("AUTH")));
}

const TRANSACTION_TIMEOUT: Duration = Duration::from_millis(200);
const GIVE_UP: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_silent_reset_breaks_the_session() {
    let connector = ScriptedConnector::new(
        RelayScript::new("mailer", "secret")
            .rejecting("b@example.com")
            .stalling_on("RSET"),
    )
    .with_timeout(TRANSACTION_TIMEOUT);
    let list = recipients(&["b@example.com", "c@example.com", "d@example.com"]);

    let report = tokio::time::timeout(
        GIVE_UP,
        dispatch::dispatch(&connector, &credentials(), &template(), &list, 1),
    )
    .await
    .expect("dispatch stuck on RSET")
    .unwrap();

    assert_eq!(report.len(), 3);
    let rejected = report.get("b@example.com").unwrap().reason().unwrap();
    assert!(rejected.contains("550"));
    assert!(rejected.contains("reset failed"));
    for recipient in ["c@example.com", "d@example.com"] {
        assert_eq!(
            report.get(recipient).unwrap().reason(),
            Some(SESSION_UNAVAILABLE)
        );
    }
}

#[tokio::test]
async fn test_silent_quit_still_closes() {
    let connector =
        ScriptedConnector::new(RelayScript::new("mailer", "secret").stalling_on("QUIT"))
            .with_timeout(TRANSACTION_TIMEOUT);
    let session = TransportSession::new(&connector);
    let tpl = template();

    session.connect(&credentials()).await.unwrap();
    session
        .deliver(
            tpl.sender_address(),
            tpl.sender_display_name(),
            "a@example.com",
            tpl.subject(),
            tpl.body_html(),
        )
        .await
        .unwrap();

    tokio::time::timeout(GIVE_UP, session.close())
        .await
        .expect("close stuck on QUIT");
    assert_eq!(session.state().await, SessionState::Closed);
    assert_eq!(connector.commands().last().map(String::as_str), Some("QUIT"));

    let report = tokio::time::timeout(
        GIVE_UP,
        dispatch::dispatch(
            &connector,
            &credentials(),
            &template(),
            &recipients(&["a@example.com"]),
            1,
        ),
    )
    .await
    .expect("dispatch stuck on QUIT")
    .unwrap();
    assert_eq!(report.succeeded_count(), 1);
}

#[tokio::test]
async fn test_stalled_data_times_out() {
    let connector =
        ScriptedConnector::new(RelayScript::new("mailer", "secret").stalling_on("DATA"))
            .with_timeout(TRANSACTION_TIMEOUT);
    let list = recipients(&["a@example.com", "b@example.com", "c@example.com"]);

    let report = tokio::time::timeout(
        GIVE_UP,
        dispatch::dispatch(&connector, &credentials(), &template(), &list, 2),
    )
    .await
    .expect("dispatch stuck on DATA")
    .unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.succeeded_count(), 0);
    let timed_out: Vec<_> = report
        .failures()
        .filter(|result| result.reason() != Some(SESSION_UNAVAILABLE))
        .collect();
    assert_eq!(timed_out.len(), 1);
    assert!(timed_out[0].reason().unwrap().contains("timeout"));
    assert_eq!(
        report
            .failures()
            .filter(|result| result.reason() == Some(SESSION_UNAVAILABLE))
            .count(),
        2
    );
    assert!(connector.messages().is_empty());
}

#[tokio::test]
async fn test_shutdown_reply_breaks_the_session() {
    let connector = ScriptedConnector::new(
        RelayScript::new("mailer", "secret").shutting_down_at("b@example.com"),
    );
    let list = recipients(&[
        "a@example.com",
        "b@example.com",
        "c@example.com",
        "d@example.com",
    ]);

    let report = dispatch::dispatch(&connector, &credentials(), &template(), &list, 1)
        .await
        .unwrap();

    assert_eq!(report.len(), 4);
    assert!(report.get("a@example.com").unwrap().is_success());
    let shut_down = report.get("b@example.com").unwrap().reason().unwrap();
    assert!(shut_down.contains("421"));
    for recipient in ["c@example.com", "d@example.com"] {
        assert_eq!(
            report.get(recipient).unwrap().reason(),
            Some(SESSION_UNAVAILABLE)
        );
    }
    assert!(!connector.commands().contains(&"RSET".to_string()));
    assert_eq!(connector.messages().len(), 1);
}
