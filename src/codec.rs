//! DATA transparency, RFC 5321 section 4.5.2

/// Closes the mail data. Always written at the start of a line.
const END_OF_DATA: &[u8] = b".\r\n";

/// Renders one complete message as it goes on the wire after `354`.
///
/// The message starts on a fresh line, so a dot in the very first byte is
/// stuffed like any other line-leading dot. Only CRLF ends a line; a bare LF
/// does not arm stuffing. A message that does not end with CRLF gets one
/// before the terminator.
pub(crate) fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(message.len() + message.len() / 32 + 5);
    let mut at_line_start = true;

    for &byte in message {
        if at_line_start && byte == b'.' {
            wire.push(b'.');
        }
        wire.push(byte);
        at_line_start = wire.ends_with(b"\r\n");
    }

    if !at_line_start {
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(END_OF_DATA);
    wire
}
