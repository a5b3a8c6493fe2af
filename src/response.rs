//! SMTP response, containing a mandatory return code and an optional text
//! message

use std::fmt::{Display, Formatter, Result};

use nom::{
    bytes::streaming::{tag, take_until},
    character::streaming::one_of,
    combinator::{map, opt},
    multi::many0,
    sequence::{preceded, terminated, tuple},
    IResult,
};

/// First digit indicates severity
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Severity {
    /// 2yx
    PositiveCompletion = 2,
    /// 3yz
    PositiveIntermediate = 3,
    /// 4yz
    TransientNegativeCompletion = 4,
    /// 5yz
    PermanentNegativeCompletion = 5,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", *self as u8)
    }
}

/// Second digit
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Category {
    /// x0z
    Syntax = 0,
    /// x1z
    Information = 1,
    /// x2z
    Connections = 2,
    /// x3z
    Unspecified3 = 3,
    /// x4z
    Unspecified4 = 4,
    /// x5z
    MailSystem = 5,
}

impl Display for Category {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", *self as u8)
    }
}

/// The detail digit of a response code (third digit)
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Detail(pub u8);

impl Display for Detail {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a 3 digit SMTP response code
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct Code {
    /// First digit of the response code
    pub severity: Severity,
    /// Second digit of the response code
    pub category: Category,
    /// Third digit
    pub detail: Detail,
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{}{}{}", self.severity, self.category, self.detail)
    }
}

impl Code {
    /// Creates a new `Code` structure
    pub fn new(severity: Severity, category: Category, detail: Detail) -> Code {
        Code {
            severity,
            category,
            detail,
        }
    }

    /// Numeric value of the code, e.g. `250`
    pub fn value(&self) -> u16 {
        u16::from(self.severity as u8) * 100
            + u16::from(self.category as u8) * 10
            + u16::from(self.detail.0)
    }
}

/// Contains an SMTP reply, with separated code and message
///
/// The text message is optional, only the code is mandatory
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Response {
    /// Response code
    pub code: Code,
    /// Server response string (optional)
    /// Handle multiline responses
    pub message: Vec<String>,
}

impl Response {
    /// Creates a new `Response`
    pub fn new(code: Code, message: Vec<String>) -> Response {
        Response { code, message }
    }

    /// Tells if the response is positive
    pub fn is_positive(&self) -> bool {
        matches!(
            self.code.severity,
            Severity::PositiveCompletion | Severity::PositiveIntermediate
        )
    }

    /// Tests code equality
    pub fn has_code(&self, code: u16) -> bool {
        self.code.value() == code
    }

    /// Returns only the first word of the message if possible
    pub fn first_word(&self) -> Option<&str> {
        self.message
            .first()
            .and_then(|line| line.split_whitespace().next())
    }

    /// Returns only the line of the message if possible
    pub fn first_line(&self) -> Option<&str> {
        self.message.first().map(String::as_str)
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter) -> Result {
        match self.first_line() {
            Some(line) => write!(f, "{} {}", self.code, line),
            None => write!(f, "{}", self.code),
        }
    }
}

fn parse_severity(i: &str) -> IResult<&str, Severity> {
    map(one_of("2345"), |c| match c {
        '2' => Severity::PositiveCompletion,
        '3' => Severity::PositiveIntermediate,
        '4' => Severity::TransientNegativeCompletion,
        _ => Severity::PermanentNegativeCompletion,
    })(i)
}

fn parse_category(i: &str) -> IResult<&str, Category> {
    map(one_of("012345"), |c| match c {
        '0' => Category::Syntax,
        '1' => Category::Information,
        '2' => Category::Connections,
        '3' => Category::Unspecified3,
        '4' => Category::Unspecified4,
        _ => Category::MailSystem,
    })(i)
}

fn parse_detail(i: &str) -> IResult<&str, Detail> {
    map(one_of("0123456789"), |c| {
        Detail(c.to_digit(10).unwrap_or_default() as u8)
    })(i)
}

fn parse_code(i: &str) -> IResult<&str, Code> {
    map(
        tuple((parse_severity, parse_category, parse_detail)),
        |(severity, category, detail)| Code::new(severity, category, detail),
    )(i)
}

/// Parses a complete reply, or returns `Incomplete` if more lines are needed.
pub fn parse_response(i: &str) -> IResult<&str, Response> {
    let (i, lines) = many0(tuple((
        parse_code,
        preceded(tag("-"), take_until("\r\n")),
        tag("\r\n"),
    )))(i)?;
    let (i, (last_code, last_line)) = tuple((
        parse_code,
        terminated(opt(preceded(tag(" "), take_until("\r\n"))), tag("\r\n")),
    ))(i)?;

    // Check that all codes are equal.
    if !lines.iter().all(|&(code, _, _)| code == last_code) {
        return Err(nom::Err::Failure(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Verify,
        )));
    }

    let mut message: Vec<String> = lines
        .into_iter()
        .map(|(_, text, _)| text.to_string())
        .collect();
    if let Some(text) = last_line {
        message.push(text.to_string());
    }

    Ok((i, Response::new(last_code, message)))
}
