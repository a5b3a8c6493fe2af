//! Run configuration, message body and recipient list loading

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dispatch::{ConfigurationError, RelayCredentials};
use crate::message::MessageTemplate;

/// Contents of `config.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "SMTP")]
    pub smtp: SmtpSection,
    #[serde(rename = "EMAIL")]
    pub email: EmailSection,
}

/// `[SMTP]` table: the relay and how to log in
#[derive(Clone, Deserialize)]
pub struct SmtpSection {
    pub host: String,
    pub port: i64,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for SmtpSection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SmtpSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

/// `[EMAIL]` table: what to send and to whom
#[derive(Debug, Clone, Deserialize)]
pub struct EmailSection {
    pub sender_email: String,
    pub sender_name: String,
    pub subject: String,
    pub body_file: PathBuf,
    pub emails_file: PathBuf,
    /// Worker count, overridable on the command line
    #[serde(default)]
    pub workers: Option<usize>,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Config, ConfigurationError> {
        let config: Config =
            toml::from_str(text).map_err(|err| ConfigurationError::Malformed(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| read_error(path, err))?;
        Config::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.credentials()?;
        if self.email.sender_email.trim().is_empty() {
            return Err(ConfigurationError::MissingField("sender_email"));
        }
        if let Some(0) = self.email.workers {
            return Err(ConfigurationError::WorkerCount(0));
        }
        Ok(())
    }

    /// Relay login taken from the `[SMTP]` table
    pub fn credentials(&self) -> Result<RelayCredentials, ConfigurationError> {
        let port = u16::try_from(self.smtp.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| ConfigurationError::InvalidField {
                field: "port",
                reason: format!("{} is not between 1 and 65535", self.smtp.port),
            })?;

        RelayCredentials::new(
            self.smtp.host.as_str(),
            port,
            self.smtp.user.as_str(),
            self.smtp.password.as_str(),
        )
        .map_err(|err| match err {
            ConfigurationError::MissingField("username") => ConfigurationError::MissingField("user"),
            ConfigurationError::MissingField("secret") => {
                ConfigurationError::MissingField("password")
            }
            other => other,
        })
    }

    /// The template for `body`
    pub fn template(&self, body_html: String) -> MessageTemplate {
        MessageTemplate::new(
            self.email.sender_email.as_str(),
            self.email.sender_name.as_str(),
            self.email.subject.as_str(),
            body_html,
        )
    }
}

fn read_error(path: &Path, err: impl fmt::Display) -> ConfigurationError {
    ConfigurationError::Read {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Reads the HTML body, which must be UTF-8.
pub async fn load_body(path: impl AsRef<Path>) -> Result<String, ConfigurationError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|err| read_error(path, err))?;
    String::from_utf8(bytes).map_err(|err| read_error(path, err))
}

/// One address per line, surrounding whitespace trimmed, blank lines skipped.
pub fn parse_recipients(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn load_recipients(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigurationError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| read_error(path, err))?;
    Ok(parse_recipients(&text))
}
