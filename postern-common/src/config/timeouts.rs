//! Server-side session timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied to every inbound session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeouts {
    /// How long the server waits for the next command line before giving up
    /// on an idle client.
    ///
    /// Default: 300 seconds (5 minutes, per RFC 5321 4.5.3.2.7)
    #[serde(default = "defaults::command_secs")]
    pub command_secs: u64,

    /// Maximum total connection duration.
    ///
    /// Default: 1800 seconds (30 minutes)
    #[serde(default = "defaults::connection_secs")]
    pub connection_secs: u64,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            command_secs: defaults::command_secs(),
            connection_secs: defaults::connection_secs(),
        }
    }
}

impl ServerTimeouts {
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_secs)
    }
}

mod defaults {
    pub const fn command_secs() -> u64 {
        300
    }

    pub const fn connection_secs() -> u64 {
        1800
    }
}
