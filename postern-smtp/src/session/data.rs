//! DATA and BDAT: moving the message body from the wire into a sink.

use std::{io, time::Instant};

use chrono::Utc;
use postern_common::{internal, status::Status};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{Flow, MAX_LINE_LENGTH, Session};
use crate::{
    command,
    connection::Line,
    error::{CommandError, CommandResult, ConnectionError},
    received::{Received, TransmissionType},
    reply::Reply,
    sink::{DiscardSink, MemorySink, MessageSink},
};

/// How a dot terminated body ended.
enum Body {
    Complete,
    LineTooLong,
    TooLarge,
    SinkFailed(io::Error),
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    /// The checks shared by DATA and BDAT, in the order they apply.
    fn transaction_refusal(&self) -> Option<Reply> {
        if self.state.ehlo_host.is_none() {
            Some(Reply::bad_sequence("send EHLO/HELO first."))
        } else if self.state.awaiting_rset_after_last_bdat {
            Some(Reply::bad_sequence(
                "BDAT LAST already received, send RSET.",
            ))
        } else if self.state.mail_from.is_none() {
            Some(Reply::bad_sequence("send 'MAIL FROM:' first."))
        } else if self.state.recipient_count() == 0 {
            Some(Reply::bad_sequence("send 'RCPT TO:' first."))
        } else {
            None
        }
    }

    /// A fresh sink for the current transaction, with the trace header
    /// already written.
    async fn open_sink(&self) -> CommandResult<Box<dyn MessageSink>> {
        let mut sink = match self.config.hooks.message_sink(&self.state).await {
            Some(sink) => sink,
            None => Box::new(MemorySink::with_capacity(MAX_LINE_LENGTH)),
        };

        let received = Received {
            from: self.state.ehlo_host().unwrap_or_default(),
            peer: self.state.peer.ip(),
            by: &self.config.hostname,
            with: TransmissionType::of(
                self.state.secure,
                self.state.authenticated_identity.is_some(),
            ),
            at: Utc::now(),
        };

        sink.write_all(received.to_string().as_bytes())
            .await
            .map_err(|err| CommandError::sink(&err))?;

        Ok(sink)
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub(super) async fn data(&mut self, arguments: &str) -> CommandResult<Flow> {
        if let Some(refusal) = self.transaction_refusal() {
            return self.reply(refusal).await;
        }

        if self.state.has_open_sink() {
            return self
                .reply(Reply::bad_sequence(
                    "DATA and BDAT commands cannot be used in the same transaction.",
                ))
                .await;
        }

        if !arguments.trim().is_empty() {
            return self
                .reply(Reply::single(
                    Status::SyntaxError,
                    "Command line syntax error.",
                ))
                .await;
        }

        let started = Instant::now();
        let mut sink = self.open_sink().await?;

        self.reply(Reply::single(
            Status::StartMailInput,
            "Start mail input; end with <CRLF>.<CRLF>",
        ))
        .await?;

        let body = match self.read_body(sink.as_mut()).await {
            Ok(body) => body,
            Err(err) => {
                self.config.hooks.message_canceled(&self.state).await;
                return Err(err);
            }
        };

        let outcome = match body {
            Body::Complete => {
                let reply = Reply::single(
                    Status::Ok,
                    format!(
                        "DATA completed in {:.2} seconds.",
                        started.elapsed().as_secs_f64()
                    ),
                );
                let reply = self
                    .config
                    .hooks
                    .message_stored(&self.state, sink, reply)
                    .await;
                self.reply(reply).await
            }
            Body::LineTooLong => {
                self.config.hooks.message_canceled(&self.state).await;
                self.reply(Reply::single(Status::SyntaxError, "Line too long."))
                    .await
            }
            Body::TooLarge => {
                self.config.hooks.message_canceled(&self.state).await;
                self.reply(Reply::single(
                    Status::ExceededStorage,
                    "Too much mail data.",
                ))
                .await
            }
            Body::SinkFailed(err) => {
                self.config.hooks.message_canceled(&self.state).await;
                Err(CommandError::sink(&err))
            }
        };

        self.state.reset();
        outcome
    }

    /// Copy a dot terminated body into `sink`, undoing dot stuffing.
    ///
    /// Reading always continues to the terminating `.` line, so a body that
    /// is refused part way through leaves the command stream in sync.
    async fn read_body(&mut self, sink: &mut dyn MessageSink) -> CommandResult<Body> {
        let max_size = self.config.limits.max_message_size;
        let mut size = 0_usize;
        let mut failure = None;

        loop {
            let line = match self.next_line().await? {
                Line::Complete(line) => line,
                Line::TooLong => {
                    if failure.is_none() {
                        failure = Some(Body::LineTooLong);
                    }
                    continue;
                }
            };

            if line == b"." {
                break;
            }

            if failure.is_some() {
                continue;
            }

            let content = line.strip_prefix(b".").unwrap_or(&line[..]);

            size += content.len() + 2;
            if size > max_size {
                failure = Some(Body::TooLarge);
                continue;
            }

            if let Err(err) = write_line(sink, content).await {
                failure = Some(Body::SinkFailed(err));
            }
        }

        if let Some(failure) = failure {
            return Ok(failure);
        }

        Ok(match sink.flush().await {
            Ok(()) => Body::Complete,
            Err(err) => Body::SinkFailed(err),
        })
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub(super) async fn bdat(&mut self, arguments: &str) -> CommandResult<Flow> {
        if let Some(refusal) = self.transaction_refusal() {
            return self.reply(refusal).await;
        }

        let chunk = match command::parse_bdat(arguments) {
            Ok(chunk) => chunk,
            Err(err) => return self.reply(err.into()).await,
        };

        let started = Instant::now();

        if !self.state.has_open_sink() {
            self.state.message_sink = Some(self.open_sink().await?);
        }

        let max_size = self.config.limits.max_message_size;
        let fits = self
            .state
            .bdat_bytes_received
            .checked_add(chunk.size)
            .is_some_and(|total| total <= max_size);

        let mut discard = DiscardSink::default();
        let target: &mut dyn MessageSink = match self.state.message_sink.as_mut() {
            Some(sink) if fits => sink.as_mut(),
            _ => &mut discard,
        };

        let written = tokio::time::timeout(
            self.config.timeouts.command_timeout(),
            self.connection.read_exact_into(chunk.size, target),
        )
        .await
        .map_err(|_| ConnectionError::TimedOut)??;

        if discard.discarded() > 0 {
            internal!(level = DEBUG, "Discarded {} bytes", discard.discarded());
        }

        if let Err(err) = written {
            self.abandon_message().await;
            return Err(CommandError::sink(&err));
        }

        self.state.bdat_bytes_received = self.state.bdat_bytes_received.saturating_add(chunk.size);

        let outcome = if self.state.bdat_bytes_received > max_size {
            self.cancel_message().await;
            self.reply(Reply::single(
                Status::ExceededStorage,
                "Too much mail data.",
            ))
            .await
        } else {
            let reply = Reply::single(
                Status::Ok,
                format!(
                    "{} bytes received in {:.2} seconds.",
                    chunk.size,
                    started.elapsed().as_secs_f64()
                ),
            );

            if chunk.last {
                self.complete_chunked(reply).await
            } else {
                self.reply(reply).await
            }
        };

        if chunk.last {
            self.state.reset();
            self.state.awaiting_rset_after_last_bdat = true;
        }

        outcome
    }

    /// Hand the finished chunked message to the hooks and send their reply.
    async fn complete_chunked(&mut self, reply: Reply) -> CommandResult<Flow> {
        let Some(mut sink) = self.state.message_sink.take() else {
            return self.reply(reply).await;
        };

        if let Err(err) = sink.flush().await {
            self.config.hooks.message_canceled(&self.state).await;
            return Err(CommandError::sink(&err));
        }

        let reply = self
            .config
            .hooks
            .message_stored(&self.state, sink, reply)
            .await;
        self.reply(reply).await
    }
}

async fn write_line(sink: &mut dyn MessageSink, content: &[u8]) -> io::Result<()> {
    sink.write_all(content).await?;
    sink.write_all(b"\r\n").await
}
