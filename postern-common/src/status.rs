use core::fmt::{self, Display, Formatter};

/// SMTP reply codes emitted by the server.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSucceeded = 235,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    InsufficientStorage = 452,
    TlsUnavailable = 454,
    SyntaxError = 500,
    ParameterSyntaxError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    AuthFailed = 535,
    ExceededStorage = 552,
    ParameterNotSupported = 555,
    Unknown(u32),
}

impl Status {
    /// Anything in the 3xx range or above means the action was not taken
    /// (or is not finished yet).
    pub fn is_positive_completion(self) -> bool {
        u32::from(self) < 300
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        match value {
            220 => Self::ServiceReady,
            221 => Self::GoodBye,
            235 => Self::AuthSucceeded,
            250 => Self::Ok,
            334 => Self::AuthContinue,
            354 => Self::StartMailInput,
            421 => Self::Unavailable,
            452 => Self::InsufficientStorage,
            454 => Self::TlsUnavailable,
            500 => Self::SyntaxError,
            501 => Self::ParameterSyntaxError,
            502 => Self::NotImplemented,
            503 => Self::InvalidCommandSequence,
            535 => Self::AuthFailed,
            552 => Self::ExceededStorage,
            555 => Self::ParameterNotSupported,
            _ => Self::Unknown(value),
        }
    }
}

impl From<Status> for u32 {
    fn from(value: Status) -> Self {
        match value {
            Status::ServiceReady => 220,
            Status::GoodBye => 221,
            Status::AuthSucceeded => 235,
            Status::Ok => 250,
            Status::AuthContinue => 334,
            Status::StartMailInput => 354,
            Status::Unavailable => 421,
            Status::InsufficientStorage => 452,
            Status::TlsUnavailable => 454,
            Status::SyntaxError => 500,
            Status::ParameterSyntaxError => 501,
            Status::NotImplemented => 502,
            Status::InvalidCommandSequence => 503,
            Status::AuthFailed => 535,
            Status::ExceededStorage => 552,
            Status::ParameterNotSupported => 555,
            Status::Unknown(v) => v,
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", u32::from(*self))
    }
}
