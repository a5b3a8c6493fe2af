use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Error type for envelope content
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Missing to in envelope
    #[error("missing destination address")]
    MissingTo,
    /// Invalid email
    #[error("invalid email address: {0:?}")]
    InvalidEmailAddress(String),
}

/// Address result type
pub type AddressResult<T> = Result<T, AddressError>;

/// Email address
#[derive(PartialEq, Eq, Clone, Debug, Hash)]
pub struct EmailAddress(String);

impl EmailAddress {
    pub fn new(address: String) -> AddressResult<EmailAddress> {
        // Only reject what would corrupt the SMTP dialogue. Real validation is
        // the relay's job.
        if address.is_empty()
            || address.chars().any(|c| {
                !c.is_ascii()
                    || c.is_ascii_control()
                    || c.is_ascii_whitespace()
                    || c == '<'
                    || c == '>'
            })
        {
            return Err(AddressError::InvalidEmailAddress(address));
        }

        Ok(EmailAddress(address))
    }
}

impl FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmailAddress::new(s.to_string())
    }
}

impl Display for EmailAddress {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Simple email envelope representation
///
/// We only accept mailboxes, and do not support source routes (as per RFC).
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Envelope {
    /// The envelope recipients' addresses
    ///
    /// This can not be empty.
    forward_path: Vec<EmailAddress>,
    /// The envelope sender address
    reverse_path: Option<EmailAddress>,
}

impl Envelope {
    /// Creates a new envelope, which may fail if `to` is empty.
    pub fn new(from: Option<EmailAddress>, to: Vec<EmailAddress>) -> AddressResult<Envelope> {
        if to.is_empty() {
            return Err(AddressError::MissingTo);
        }
        Ok(Envelope {
            forward_path: to,
            reverse_path: from,
        })
    }

    /// Destination addresses of the envelope
    pub fn to(&self) -> &[EmailAddress] {
        self.forward_path.as_slice()
    }

    /// Source address of the envelope
    pub fn from(&self) -> Option<&EmailAddress> {
        self.reverse_path.as_ref()
    }
}

/// Sendable email structure
#[derive(Clone, Debug)]
pub struct SendableEmail {
    envelope: Envelope,
    message: Vec<u8>,
}

impl SendableEmail {
    pub fn new<T: Into<Vec<u8>>>(envelope: Envelope, message: T) -> SendableEmail {
        SendableEmail {
            envelope,
            message: message.into(),
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn message(&self) -> &[u8] {
        &self.message
    }

    pub fn into_message(self) -> Vec<u8> {
        self.message
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_email_address() {
        assert!(EmailAddress::new("foobar@example.org".to_string()).is_ok());
        assert!(EmailAddress::new("foobar@localhost".to_string()).is_ok());
        assert!(EmailAddress::new("foo\rbar@localhost".to_string()).is_err());
        assert!(EmailAddress::new(">foobar@example.org".to_string()).is_err());
        assert!(EmailAddress::new("foo bar@example.org".to_string()).is_err());
        assert!(EmailAddress::new("foobar@exa\r\nmple.org".to_string()).is_err());
        assert!(EmailAddress::new("jürgen@example.org".to_string()).is_err());
        assert!(EmailAddress::new(String::new()).is_err());
    }

    #[test]
    fn test_envelope_requires_recipient() {
        let from = "a@example.org".parse().ok();
        assert_eq!(Envelope::new(from, vec![]), Err(AddressError::MissingTo));
    }
}
