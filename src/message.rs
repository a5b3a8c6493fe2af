//! Message template and MIME rendering

use std::borrow::Cow;

use crate::types::{AddressResult, EmailAddress, Envelope, SendableEmail};

/// Replaced by the recipient address in subject and body.
pub const RECIPIENT_PLACEHOLDER: &str = "{{recipient}}";

/// Base64 never produces `=_`, so this can not collide with the encoded body.
const BOUNDARY: &str = "=_frost_sender_part";

/// Raw bytes per encoded-word, keeps each header line under 78 characters
const ENCODED_WORD_CHUNK: usize = 42;

const BODY_LINE_LENGTH: usize = 76;

/// The message every recipient receives.
///
/// Shared read-only between workers; [`MessageTemplate::personalize`] returns
/// a copy and never touches the original.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageTemplate {
    sender_address: String,
    sender_display_name: String,
    subject: String,
    body_html: String,
}

impl MessageTemplate {
    pub fn new(
        sender_address: impl Into<String>,
        sender_display_name: impl Into<String>,
        subject: impl Into<String>,
        body_html: impl Into<String>,
    ) -> MessageTemplate {
        MessageTemplate {
            sender_address: sender_address.into(),
            sender_display_name: sender_display_name.into(),
            subject: subject.into(),
            body_html: body_html.into(),
        }
    }

    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    pub fn sender_display_name(&self) -> &str {
        &self.sender_display_name
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn body_html(&self) -> &str {
        &self.body_html
    }

    /// Subject and body with the placeholder filled in for `recipient`.
    pub fn personalize<'a>(&'a self, recipient: &str) -> (Cow<'a, str>, Cow<'a, str>) {
        (
            substitute(&self.subject, recipient),
            substitute(&self.body_html, recipient),
        )
    }
}

fn substitute<'a>(text: &'a str, recipient: &str) -> Cow<'a, str> {
    if text.contains(RECIPIENT_PLACEHOLDER) {
        Cow::Owned(text.replace(RECIPIENT_PLACEHOLDER, recipient))
    } else {
        Cow::Borrowed(text)
    }
}

/// Builds the envelope and a `multipart/mixed` message with a single
/// base64 `text/html` part.
pub fn compose(
    sender_address: &str,
    sender_display_name: &str,
    recipient: &str,
    subject: &str,
    body_html: &str,
) -> AddressResult<SendableEmail> {
    let from: EmailAddress = sender_address.parse()?;
    let to: EmailAddress = recipient.parse()?;

    let mut message = String::with_capacity(body_html.len() * 4 / 3 + 512);
    message.push_str(&format!(
        "From: {} <{}>\r\n",
        encode_header(sender_display_name),
        from
    ));
    message.push_str(&format!("To: {}\r\n", to));
    message.push_str(&format!("Subject: {}\r\n", encode_header(subject)));
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n",
        BOUNDARY
    ));
    message.push_str("\r\n");
    message.push_str(&format!("--{}\r\n", BOUNDARY));
    message.push_str("Content-Type: text/html; charset=\"utf-8\"\r\n");
    message.push_str("Content-Transfer-Encoding: base64\r\n");
    message.push_str("\r\n");
    let encoded = base64::encode(body_html.as_bytes());
    for line in encoded.as_bytes().chunks(BODY_LINE_LENGTH) {
        // base64 output is ASCII
        message.push_str(&String::from_utf8_lossy(line));
        message.push_str("\r\n");
    }
    message.push_str(&format!("--{}--\r\n", BOUNDARY));

    Ok(SendableEmail::new(Envelope::new(Some(from), vec![to])?, message))
}

/// Header value safe for the wire: line breaks flattened, non-ASCII text as
/// RFC 2047 encoded-words.
fn encode_header(value: &str) -> Cow<'_, str> {
    let value: Cow<'_, str> = if value.contains(['\r', '\n']) {
        Cow::Owned(value.replace("\r\n", " ").replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(value)
    };

    if value.is_ascii() {
        return value;
    }

    let mut words = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in value.char_indices() {
        if idx + ch.len_utf8() - start > ENCODED_WORD_CHUNK && end > start {
            words.push(encoded_word(&value[start..end]));
            start = end;
        }
        end = idx + ch.len_utf8();
    }
    if end > start {
        words.push(encoded_word(&value[start..end]));
    }
    Cow::Owned(words.join("\r\n "))
}

fn encoded_word(text: &str) -> String {
    format!("=?utf-8?b?{}?=", base64::encode(text.as_bytes()))
}
