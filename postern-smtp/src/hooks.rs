//! Extension points for embedders.
//!
//! Each decision hook receives the session state and the reply the server is
//! about to send, and returns the reply to send instead. Returning a reply
//! with a code of 300 or above refuses the action. Every method defaults to
//! passing the reply through unchanged.

use async_trait::async_trait;

use crate::{
    reply::Reply,
    sink::MessageSink,
    state::SessionState,
    transaction::{MailFrom, RcptTo},
};

#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// The greeting. A code of 300 or above rejects the session: every
    /// command but QUIT is then refused.
    async fn started(&self, _state: &SessionState, reply: Reply) -> Reply {
        reply
    }

    async fn ehlo(&self, _state: &SessionState, _domain: &str, reply: Reply) -> Reply {
        reply
    }

    async fn mail_from(&self, _state: &SessionState, _from: &MailFrom, reply: Reply) -> Reply {
        reply
    }

    async fn rcpt_to(&self, _state: &SessionState, _to: &RcptTo, reply: Reply) -> Reply {
        reply
    }

    /// Where to store the next message. `None` collects it in memory.
    async fn message_sink(&self, _state: &SessionState) -> Option<Box<dyn MessageSink>> {
        None
    }

    /// The message being received was abandoned; whatever was written to its
    /// sink should be discarded.
    async fn message_canceled(&self, _state: &SessionState) {}

    /// The message was received in full. `reply` is the default final reply.
    async fn message_stored(
        &self,
        _state: &SessionState,
        _sink: Box<dyn MessageSink>,
        reply: Reply,
    ) -> Reply {
        reply
    }
}

/// Accepts everything and drops stored messages.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHooks;

impl SessionHooks for DefaultHooks {}
