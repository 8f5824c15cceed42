//! The trace header prepended to every received message (RFC 5321 4.4).

use core::fmt::{self, Display};
use std::net::IpAddr;

use chrono::{DateTime, Utc};

/// The `with` clause of a Received header (RFC 3848).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransmissionType {
    Esmtp,
    Esmtpa,
    Esmtps,
    Esmtpsa,
}

impl TransmissionType {
    #[must_use]
    pub const fn of(secure: bool, authenticated: bool) -> Self {
        match (secure, authenticated) {
            (false, false) => Self::Esmtp,
            (false, true) => Self::Esmtpa,
            (true, false) => Self::Esmtps,
            (true, true) => Self::Esmtpsa,
        }
    }
}

impl Display for TransmissionType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            Self::Esmtp => "ESMTP",
            Self::Esmtpa => "ESMTPA",
            Self::Esmtps => "ESMTPS",
            Self::Esmtpsa => "ESMTPSA",
        })
    }
}

/// Everything that goes into one Received line.
#[derive(Clone, Debug)]
pub struct Received<'a> {
    pub from: &'a str,
    pub peer: IpAddr,
    pub by: &'a str,
    pub with: TransmissionType,
    pub at: DateTime<Utc>,
}

impl Display for Received<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            fmt,
            "Received: from {} ({}) by {} with {}; {}\r\n",
            self.from,
            self.peer,
            self.by,
            self.with,
            self.at.to_rfc2822()
        )
    }
}
