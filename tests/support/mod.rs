//! A scripted SMTP relay speaking just enough of the protocol for the client.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Default)]
pub struct RelayScript {
    pub pipelining: bool,
    /// Expected `AUTH PLAIN` payload, base64 encoded
    pub auth_plain: String,
    pub rejected: HashSet<String>,
    /// Recipients at which the relay hangs up
    pub hang_up_at: HashSet<String>,
    /// Recipients answered with `421` before hanging up
    pub shutting_down_at: HashSet<String>,
    /// Commands the relay reads but never answers
    pub stall_on: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct RelayLog {
    pub commands: Vec<String>,
    pub messages: Vec<String>,
}

pub type SharedLog = Arc<Mutex<RelayLog>>;

impl RelayScript {
    pub fn new(username: &str, password: &str) -> Self {
        RelayScript {
            auth_plain: base64::encode(format!("\u{0}{}\u{0}{}", username, password)),
            ..RelayScript::default()
        }
    }

    pub fn rejecting(mut self, recipient: &str) -> Self {
        self.rejected.insert(recipient.to_string());
        self
    }

    pub fn hanging_up_at(mut self, recipient: &str) -> Self {
        self.hang_up_at.insert(recipient.to_string());
        self
    }

    pub fn shutting_down_at(mut self, recipient: &str) -> Self {
        self.shutting_down_at.insert(recipient.to_string());
        self
    }

    pub fn stalling_on(mut self, command: &str) -> Self {
        self.stall_on.insert(command.to_string());
        self
    }

    pub fn with_pipelining(mut self) -> Self {
        self.pipelining = true;
        self
    }
}

/// Serves one client connection until QUIT or hang-up.
pub async fn serve<S>(stream: S, script: RelayScript, log: SharedLog)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut valid_recipient = false;

    if reply(&mut stream, "220 fake.relay ESMTP\r\n").await.is_err() {
        return;
    }

    loop {
        let mut line = String::new();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        log.lock().unwrap().commands.push(command.clone());
        let upper = command.to_ascii_uppercase();
        if script.stall_on.contains(&upper) {
            std::future::pending::<()>().await;
        }

        let answer = if upper.starts_with("EHLO") {
            if script.pipelining {
                "250-fake.relay\r\n250-PIPELINING\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n"
                    .to_string()
            } else {
                "250-fake.relay\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n".to_string()
            }
        } else if let Some(payload) = command.strip_prefix("AUTH PLAIN ") {
            if payload == script.auth_plain {
                "235 2.7.0 authenticated\r\n".to_string()
            } else {
                "535 5.7.8 bad credentials\r\n".to_string()
            }
        } else if upper == "AUTH LOGIN" {
            let mut answers = Vec::new();
            for prompt in ["334 VXNlcm5hbWU6\r\n", "334 UGFzc3dvcmQ6\r\n"] {
                if reply(&mut stream, prompt).await.is_err() {
                    return;
                }
                let mut answer = String::new();
                match stream.read_line(&mut answer).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => answers.push(answer.trim_end().to_string()),
                }
            }
            let decoded: Vec<u8> = answers
                .iter()
                .flat_map(|answer| {
                    let mut part = vec![0];
                    part.extend(base64::decode(answer).unwrap_or_default());
                    part
                })
                .collect();
            if base64::encode(decoded) == script.auth_plain {
                "235 2.7.0 authenticated\r\n".to_string()
            } else {
                "535 5.7.8 bad credentials\r\n".to_string()
            }
        } else if upper.starts_with("MAIL FROM:") {
            valid_recipient = false;
            "250 2.1.0 ok\r\n".to_string()
        } else if upper.starts_with("RCPT TO:") {
            let address = command
                .trim_start_matches("RCPT TO:<")
                .trim_end_matches('>')
                .to_string();
            if script.hang_up_at.contains(&address) {
                return;
            }
            if script.shutting_down_at.contains(&address) {
                let _ = reply(&mut stream, "421 4.3.2 shutting down\r\n").await;
                return;
            }
            if script.rejected.contains(&address) {
                "550 5.1.1 no such user\r\n".to_string()
            } else {
                valid_recipient = true;
                "250 2.1.5 ok\r\n".to_string()
            }
        } else if upper == "DATA" {
            if !valid_recipient {
                "554 5.5.1 no valid recipients\r\n".to_string()
            } else {
                if reply(&mut stream, "354 end with .\r\n").await.is_err() {
                    return;
                }
                let mut message = String::new();
                loop {
                    let mut data = String::new();
                    match stream.read_line(&mut data).await {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    if data == ".\r\n" {
                        break;
                    }
                    message.push_str(&data);
                }
                log.lock().unwrap().messages.push(message);
                valid_recipient = false;
                "250 2.0.0 queued\r\n".to_string()
            }
        } else if upper == "RSET" {
            valid_recipient = false;
            "250 2.0.0 reset\r\n".to_string()
        } else if upper == "QUIT" {
            let _ = reply(&mut stream, "221 2.0.0 bye\r\n").await;
            return;
        } else {
            "502 5.5.2 not implemented\r\n".to_string()
        };

        if reply(&mut stream, &answer).await.is_err() {
            return;
        }
    }
}

async fn reply<S>(stream: &mut BufReader<S>, text: &str) -> std::io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.get_mut().write_all(text.as_bytes()).await?;
    stream.get_mut().flush().await
}
