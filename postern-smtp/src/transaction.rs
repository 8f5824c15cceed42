//! The envelope of a mail transaction: the reverse-path with its MAIL
//! parameters and the forward-paths with their RCPT parameters.

use core::{
    fmt::{self, Display},
    str::FromStr,
};

/// `BODY=` value of a MAIL command (RFC 6152, RFC 3030).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyType {
    SevenBit,
    EightBitMime,
    BinaryMime,
}

impl FromStr for BodyType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "7BIT" => Ok(Self::SevenBit),
            "8BITMIME" => Ok(Self::EightBitMime),
            "BINARYMIME" => Ok(Self::BinaryMime),
            _ => Err(()),
        }
    }
}

impl Display for BodyType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::SevenBit => "7BIT",
            Self::EightBitMime => "8BITMIME",
            Self::BinaryMime => "BINARYMIME",
        })
    }
}

/// `RET=` value of a MAIL command (RFC 1891 5.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsnReturn {
    Full,
    Headers,
}

impl FromStr for DsnReturn {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "FULL" => Ok(Self::Full),
            "HDRS" => Ok(Self::Headers),
            _ => Err(()),
        }
    }
}

/// One element of a `NOTIFY=` list (RFC 1891 5.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DsnNotify {
    Never,
    Success,
    Failure,
    Delay,
}

impl FromStr for DsnNotify {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NEVER" => Ok(Self::Never),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "DELAY" => Ok(Self::Delay),
            _ => Err(()),
        }
    }
}

/// An accepted MAIL command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MailFrom {
    /// Empty for the null reverse-path `<>`.
    pub mailbox: String,
    pub size: Option<usize>,
    pub body_type: Option<BodyType>,
    pub dsn_ret: Option<DsnReturn>,
    pub envid: Option<String>,
}

impl MailFrom {
    #[must_use]
    pub fn is_null_sender(&self) -> bool {
        self.mailbox.is_empty()
    }
}

/// An accepted RCPT command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RcptTo {
    pub mailbox: String,
    /// Distinct NOTIFY keywords in the order given.
    pub dsn_notify: Option<Vec<DsnNotify>>,
    pub orcpt: Option<String>,
}

impl RcptTo {
    /// Recipients are unique per transaction, compared case-insensitively.
    #[must_use]
    pub fn key(&self) -> String {
        self.mailbox.to_lowercase()
    }
}
