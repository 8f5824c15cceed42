use core::fmt::{self, Display, Formatter};
use std::borrow::Cow;

use postern_common::status::Status;

/// Longest reply line allowed by RFC 5321 4.5.3.1.5, CRLF included.
pub const MAX_REPLY_LINE: usize = 512;

/// Client text quoted back in a reply is cut to this many characters.
const EXCERPT_LENGTH: usize = 64;

/// A (possibly multi-line) reply sent to the client.
///
/// Replies serialize per RFC 5321 4.2.1: every line but the last is written as
/// `code-text`, the last as `code text`, each terminated by CRLF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    status: Status,
    lines: Vec<String>,
}

impl Reply {
    /// # Panics
    /// Constructing a reply without lines, or with a code outside of
    /// `200..=599`, is a programming error.
    pub fn new<I, S>(status: Status, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();

        assert!(!lines.is_empty(), "a reply needs at least one line");
        assert!(
            (200..=599).contains(&u32::from(status)),
            "reply code {status} is out of range"
        );

        Self { status, lines }
    }

    pub fn single(status: Status, line: impl Into<String>) -> Self {
        Self::new(status, [line])
    }

    pub fn ok() -> Self {
        Self::single(Status::Ok, "OK.")
    }

    pub(crate) fn bad_sequence(reason: &str) -> Self {
        Self::single(
            Status::InvalidCommandSequence,
            format!("Bad sequence of commands: {reason}"),
        )
    }

    pub(crate) fn rejected() -> Self {
        Self::single(
            Status::InvalidCommandSequence,
            "bad sequence of commands: Session rejected.",
        )
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> u32 {
        u32::from(self.status)
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether the action this reply answers was accepted.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.status.is_positive_completion()
    }

    /// The individual wire lines, without their CRLF terminators. Lines
    /// are cut so that each fits [`MAX_REPLY_LINE`] once terminated.
    pub fn wire_lines(&self) -> impl Iterator<Item = String> + '_ {
        let last = self.lines.len() - 1;
        self.lines.iter().enumerate().map(move |(idx, line)| {
            let separator = if idx == last { ' ' } else { '-' };
            let mut line = format!("{}{separator}{line}", self.status);
            let end = clip(&line, MAX_REPLY_LINE - 2).len();
            line.truncate(end);
            line
        })
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        for line in self.wire_lines() {
            write!(fmt, "{line}\r\n")?;
        }

        Ok(())
    }
}

/// The longest prefix of `text` that is at most `max` bytes and ends on a
/// character boundary.
fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    &text[..end]
}

/// Client supplied text, shortened for quoting back in a reply.
pub(crate) fn excerpt(text: &str) -> Cow<'_, str> {
    match text.char_indices().nth(EXCERPT_LENGTH) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &text[..idx])),
        None => Cow::Borrowed(text),
    }
}
