//! Everything except the message body commands.

use base64::{Engine, engine::general_purpose::STANDARD};
use postern_common::{incoming, internal, status::Status};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Flow, Session};
use crate::{
    command::{self, EHLO_SYNTAX, HELO_SYNTAX},
    connection::Line,
    error::CommandResult,
    extensions::Extension,
    reply::Reply,
};

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    /// The EHLO reply: our name followed by one keyword per line.
    fn capabilities(&self) -> Vec<String> {
        let mut lines = vec![self.config.hostname.clone()];

        for extension in Extension::ALL {
            if !self.config.is_enabled(extension) {
                continue;
            }

            match extension {
                Extension::Size => {
                    lines.push(format!("{extension} {}", self.config.limits.max_message_size));
                }
                Extension::Starttls
                    if self.state.secure || self.config.tls_context.is_none() => {}
                extension => lines.push(extension.to_string()),
            }
        }

        let mechanisms = self.config.mechanisms.names(self.state.secure);
        if !mechanisms.is_empty() {
            lines.push(format!("AUTH {}", mechanisms.join(" ")));
        }

        lines
    }

    async fn greeted(&mut self, domain: String, reply: Reply) -> CommandResult<Flow> {
        let reply = self.config.hooks.ehlo(&self.state, &domain, reply).await;

        if reply.is_positive() {
            internal!(level = DEBUG, "Client identified as {domain}");
            self.abandon_message().await;
            self.state.ehlo_host = Some(domain);
        }

        self.reply(reply).await
    }

    pub(super) async fn ehlo(&mut self, arguments: &str) -> CommandResult<Flow> {
        match command::parse_domain(arguments, EHLO_SYNTAX) {
            Ok(domain) => {
                let reply = Reply::new(Status::Ok, self.capabilities());
                self.greeted(domain, reply).await
            }
            Err(err) => self.reply(err.into()).await,
        }
    }

    pub(super) async fn helo(&mut self, arguments: &str) -> CommandResult<Flow> {
        match command::parse_domain(arguments, HELO_SYNTAX) {
            Ok(domain) => {
                let reply = Reply::single(Status::Ok, self.config.hostname.clone());
                self.greeted(domain, reply).await
            }
            Err(err) => self.reply(err.into()).await,
        }
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub(super) async fn start_tls(&mut self, arguments: &str) -> CommandResult<Flow> {
        if !arguments.trim().is_empty() {
            return self
                .reply(Reply::single(
                    Status::ParameterSyntaxError,
                    "Syntax error: No parameters allowed.",
                ))
                .await;
        }

        if self.state.secure {
            return self
                .reply(Reply::bad_sequence("Connection is already secure."))
                .await;
        }

        let Some(tls_context) = self
            .config
            .tls_context
            .clone()
            .filter(|_| self.config.is_enabled(Extension::Starttls))
        else {
            return self
                .reply(Reply::single(
                    Status::TlsUnavailable,
                    "TLS not available: Server has no SSL certificate.",
                ))
                .await;
        };

        self.reply(Reply::single(Status::ServiceReady, "Ready to start TLS."))
            .await?;

        let info = self.connection.upgrade(&tls_context).await?;
        internal!(
            level = DEBUG,
            "Connection upgraded to {} using {}",
            info.proto(),
            info.cipher()
        );

        self.state.secure = true;
        self.abandon_message().await;
        self.state.ehlo_host = None;

        Ok(Flow::Continue)
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub(super) async fn auth(&mut self, arguments: &str) -> CommandResult<Flow> {
        if self.state.authenticated_identity.is_some() {
            return self
                .reply(Reply::bad_sequence("you are already authenticated."))
                .await;
        }

        if self.state.mail_from.is_some() {
            return self
                .reply(Reply::bad_sequence(
                    "The AUTH command is not permitted during a mail transaction.",
                ))
                .await;
        }

        let (name, initial) = match command::parse_auth(arguments) {
            Ok(parsed) => parsed,
            Err(err) => return self.reply(err.into()).await,
        };

        let Some(mut mechanism) = self.config.mechanisms.create(&name, self.state.secure) else {
            return self
                .reply(Reply::single(
                    Status::ParameterSyntaxError,
                    "Not supported authentication mechanism.",
                ))
                .await;
        };

        mechanism.reset();
        let mut response = initial.unwrap_or_default();

        loop {
            let challenge = mechanism.step(&response).await;

            if mechanism.is_completed() {
                if mechanism.is_authenticated() {
                    let identity = mechanism.user_name().unwrap_or_default().to_string();
                    internal!(level = INFO, "Authenticated as {identity} using {name}");
                    self.state.authenticated_identity = Some(identity);

                    return self
                        .reply(Reply::single(
                            Status::AuthSucceeded,
                            "2.7.0 Authentication succeeded.",
                        ))
                        .await;
                }

                internal!(level = INFO, "Authentication using {name} failed");
                return self
                    .reply(Reply::single(
                        Status::AuthFailed,
                        "5.7.8 Authentication credentials invalid.",
                    ))
                    .await;
            }

            self.reply(Reply::single(
                Status::AuthContinue,
                STANDARD.encode(&challenge),
            ))
            .await?;

            let line = match self.next_line().await? {
                Line::Complete(line) => line,
                Line::TooLong => return self.invalid_client_response().await,
            };
            incoming!("<sasl response>");

            if line == b"*" {
                return self
                    .reply(Reply::single(
                        Status::ParameterSyntaxError,
                        "Authentication canceled.",
                    ))
                    .await;
            }

            response = match STANDARD.decode(&line) {
                Ok(decoded) => decoded,
                Err(_) => return self.invalid_client_response().await,
            };
        }
    }

    async fn invalid_client_response(&mut self) -> CommandResult<Flow> {
        self.reply(Reply::single(
            Status::ParameterSyntaxError,
            "Invalid client response.",
        ))
        .await
    }

    pub(super) async fn mail(&mut self, arguments: &str) -> CommandResult<Flow> {
        if self.state.ehlo_host.is_none() {
            return self
                .reply(Reply::bad_sequence("send EHLO/HELO first."))
                .await;
        }

        if self.state.mail_from.is_some() {
            return self
                .reply(Reply::bad_sequence("nested MAIL command."))
                .await;
        }

        if self.state.has_open_sink() {
            return self
                .reply(Reply::bad_sequence("BDAT command is pending."))
                .await;
        }

        let max = self.config.limits.max_transactions;
        if max != 0 && self.state.transaction_count >= max {
            return self
                .reply(Reply::bad_sequence(
                    "Maximum allowed mail transactions exceeded.",
                ))
                .await;
        }

        let from = match command::parse_mail_from(
            arguments,
            &self.config.extensions,
            self.config.limits.max_message_size,
        ) {
            Ok(from) => from,
            Err(err) => return self.reply(err.into()).await,
        };

        let reply = self
            .config
            .hooks
            .mail_from(&self.state, &from, Reply::ok())
            .await;

        if reply.is_positive() {
            self.state.mail_from = Some(from);
            self.state.transaction_count += 1;
            self.state.awaiting_rset_after_last_bdat = false;
        }

        self.reply(reply).await
    }

    pub(super) async fn rcpt(&mut self, arguments: &str) -> CommandResult<Flow> {
        if self.state.ehlo_host.is_none() {
            return self
                .reply(Reply::bad_sequence("send EHLO/HELO first."))
                .await;
        }

        if self.state.mail_from.is_none() {
            return self
                .reply(Reply::bad_sequence("send 'MAIL FROM:' first."))
                .await;
        }

        if self.state.has_open_sink() {
            return self
                .reply(Reply::bad_sequence("BDAT command is pending."))
                .await;
        }

        let to = match command::parse_rcpt_to(arguments, &self.config.extensions) {
            Ok(to) => to,
            Err(err) => return self.reply(err.into()).await,
        };

        if self.state.recipient_count() >= self.config.limits.max_recipients {
            return self
                .reply(Reply::single(
                    Status::InsufficientStorage,
                    "Too many recipients",
                ))
                .await;
        }

        let reply = self
            .config
            .hooks
            .rcpt_to(&self.state, &to, Reply::ok())
            .await;

        if reply.is_positive() {
            self.state.add_recipient(to);
        }

        self.reply(reply).await
    }

    pub(super) async fn rset(&mut self) -> CommandResult<Flow> {
        self.abandon_message().await;
        self.reply(Reply::ok()).await
    }

    pub(super) async fn quit(&mut self) -> CommandResult<Flow> {
        self.abandon_message().await;
        self.reply(Reply::single(
            Status::GoodBye,
            format!(
                "{} Service closing transmission channel.",
                self.config.hostname
            ),
        ))
        .await?;

        Ok(Flow::Close)
    }
}
