use std::{fmt, net::SocketAddr};

use ahash::AHashMap;

use crate::{
    sink::MessageSink,
    transaction::{MailFrom, RcptTo},
};

/// Per connection state.
///
/// The envelope (`mail_from`, `recipients`), the open message sink and the
/// BDAT byte count make up the current transaction and are cleared together
/// by [`SessionState::reset`]. Everything else lives as long as the
/// connection.
pub struct SessionState {
    pub(crate) peer: SocketAddr,
    pub(crate) secure: bool,
    pub(crate) rejected: bool,
    pub(crate) ehlo_host: Option<String>,
    pub(crate) authenticated_identity: Option<String>,
    pub(crate) bad_command_count: usize,
    pub(crate) transaction_count: usize,

    pub(crate) mail_from: Option<MailFrom>,
    pub(crate) recipients: AHashMap<String, RcptTo>,
    pub(crate) message_sink: Option<Box<dyn MessageSink>>,
    pub(crate) bdat_bytes_received: usize,
    /// The hooks were already told the open message will not be stored.
    pub(crate) message_canceled: bool,
    pub(crate) awaiting_rset_after_last_bdat: bool,
}

impl SessionState {
    pub(crate) fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            secure: false,
            rejected: false,
            ehlo_host: None,
            authenticated_identity: None,
            bad_command_count: 0,
            transaction_count: 0,
            mail_from: None,
            recipients: AHashMap::new(),
            message_sink: None,
            bdat_bytes_received: 0,
            message_canceled: false,
            awaiting_rset_after_last_bdat: false,
        }
    }

    /// Abandon the current transaction.
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.message_sink = None;
        self.bdat_bytes_received = 0;
        self.message_canceled = false;
        self.awaiting_rset_after_last_bdat = false;
    }

    /// Record an accepted recipient. Adding a mailbox that is already
    /// present (in any letter case) changes nothing.
    pub(crate) fn add_recipient(&mut self, rcpt: RcptTo) {
        self.recipients.entry(rcpt.key()).or_insert(rcpt);
    }

    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        self.rejected
    }

    #[must_use]
    pub fn ehlo_host(&self) -> Option<&str> {
        self.ehlo_host.as_deref()
    }

    #[must_use]
    pub fn authenticated_identity(&self) -> Option<&str> {
        self.authenticated_identity.as_deref()
    }

    #[must_use]
    pub const fn bad_command_count(&self) -> usize {
        self.bad_command_count
    }

    #[must_use]
    pub const fn transaction_count(&self) -> usize {
        self.transaction_count
    }

    #[must_use]
    pub const fn mail_from(&self) -> Option<&MailFrom> {
        self.mail_from.as_ref()
    }

    pub fn recipients(&self) -> impl Iterator<Item = &RcptTo> {
        self.recipients.values()
    }

    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }

    #[must_use]
    pub const fn has_open_sink(&self) -> bool {
        self.message_sink.is_some()
    }

    #[must_use]
    pub const fn bdat_bytes_received(&self) -> usize {
        self.bdat_bytes_received
    }

    #[must_use]
    pub const fn is_awaiting_rset(&self) -> bool {
        self.awaiting_rset_after_last_bdat
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SessionState")
            .field("peer", &self.peer)
            .field("secure", &self.secure)
            .field("rejected", &self.rejected)
            .field("ehlo_host", &self.ehlo_host)
            .field("authenticated_identity", &self.authenticated_identity)
            .field("bad_command_count", &self.bad_command_count)
            .field("transaction_count", &self.transaction_count)
            .field("mail_from", &self.mail_from)
            .field("recipients", &self.recipients)
            .field("message_sink", &self.message_sink.is_some())
            .field("bdat_bytes_received", &self.bdat_bytes_received)
            .field("message_canceled", &self.message_canceled)
            .field(
                "awaiting_rset_after_last_bdat",
                &self.awaiting_rset_after_last_bdat,
            )
            .finish()
    }
}
