use core::fmt::{self, Display};

use serde::Deserialize;

/// Service extensions a listener may enable.
///
/// Which ones are actually advertised in an EHLO reply also depends on the
/// state of the connection (STARTTLS disappears once the channel is secure)
/// and on the listener limits (`SIZE` carries the maximum message size).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    /// RFC 2920 command pipelining.
    Pipelining,

    /// RFC 1870 message size declaration.
    Size,

    /// RFC 3207 STARTTLS. Only offered when a certificate is configured.
    Starttls,

    /// RFC 6152 8bit-MIME transport.
    EightBitMime,

    /// RFC 3030 binary MIME, only meaningful together with CHUNKING.
    BinaryMime,

    /// RFC 3030 BDAT.
    Chunking,

    /// RFC 1891 delivery status notifications.
    Dsn,
}

impl Extension {
    /// Every extension, in the order they are advertised.
    pub const ALL: [Self; 7] = [
        Self::Pipelining,
        Self::Size,
        Self::Starttls,
        Self::EightBitMime,
        Self::BinaryMime,
        Self::Chunking,
        Self::Dsn,
    ];

    /// The extensions enabled when a listener does not list any.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::Pipelining,
            Self::Size,
            Self::Starttls,
            Self::EightBitMime,
            Self::BinaryMime,
            Self::Chunking,
        ]
    }
}

impl Display for Extension {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        fmt.write_str(match self {
            Self::Pipelining => "PIPELINING",
            Self::Size => "SIZE",
            Self::Starttls => "STARTTLS",
            Self::EightBitMime => "8BITMIME",
            Self::BinaryMime => "BINARYMIME",
            Self::Chunking => "CHUNKING",
            Self::Dsn => "DSN",
        })
    }
}
