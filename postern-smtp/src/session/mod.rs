use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Instant};

use postern_common::{
    Signal, config::ServerTimeouts, error::SessionError, incoming, internal, status::Status,
};
use serde::Deserialize;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::broadcast::{self, error::RecvError},
};

use crate::{
    auth::Mechanisms,
    command::{self, Verb},
    connection::{Connection, Line},
    error::{CommandError, CommandResult, ConnectionError},
    extensions::Extension,
    hooks::{DefaultHooks, SessionHooks},
    reply::{Reply, excerpt},
    sink::DiscardSink,
    state::SessionState,
};

mod data;
mod handlers;

/// Longest command or body line accepted from a client, CRLF included.
pub const MAX_LINE_LENGTH: usize = 32_000;

#[derive(Clone, Debug, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// Per listener limits. A `max_bad_commands` or `max_transactions` of 0
/// disables that limit.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Limits {
    #[serde(default = "defaults::max_bad_commands")]
    pub max_bad_commands: usize,
    #[serde(default = "defaults::max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "defaults::max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "defaults::max_recipients")]
    pub max_recipients: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_bad_commands: defaults::max_bad_commands(),
            max_transactions: defaults::max_transactions(),
            max_message_size: defaults::max_message_size(),
            max_recipients: defaults::max_recipients(),
        }
    }
}

mod defaults {
    pub const fn max_bad_commands() -> usize {
        30
    }

    pub const fn max_transactions() -> usize {
        10
    }

    pub const fn max_message_size() -> usize {
        10_000_000
    }

    pub const fn max_recipients() -> usize {
        100
    }
}

/// Everything a session needs to know about the listener that accepted it.
#[derive(Clone)]
pub struct SessionConfig {
    pub hostname: String,
    pub greeting: Option<String>,
    pub extensions: Vec<Extension>,
    pub tls_context: Option<TlsContext>,
    pub limits: Limits,
    pub timeouts: ServerTimeouts,
    pub hooks: Arc<dyn SessionHooks>,
    pub mechanisms: Mechanisms,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("SessionConfig")
            .field("hostname", &self.hostname)
            .field("greeting", &self.greeting)
            .field("extensions", &self.extensions)
            .field("tls_context", &self.tls_context)
            .field("limits", &self.limits)
            .field("timeouts", &self.timeouts)
            .field("mechanisms", &self.mechanisms)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Create a new `SessionConfig` builder
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    fn is_enabled(&self, extension: Extension) -> bool {
        self.extensions.contains(&extension)
    }
}

/// Builder for `SessionConfig`
pub struct SessionConfigBuilder {
    hostname: Option<String>,
    greeting: Option<String>,
    extensions: Vec<Extension>,
    tls_context: Option<TlsContext>,
    limits: Limits,
    timeouts: ServerTimeouts,
    hooks: Arc<dyn SessionHooks>,
    mechanisms: Mechanisms,
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self {
            hostname: None,
            greeting: None,
            extensions: Extension::defaults(),
            tls_context: None,
            limits: Limits::default(),
            timeouts: ServerTimeouts::default(),
            hooks: Arc::new(DefaultHooks),
            mechanisms: Mechanisms::default(),
        }
    }
}

impl SessionConfigBuilder {
    /// Set the name the server announces. Defaults to `$HOSTNAME`, then
    /// `localhost`.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Replace the text of the 220 greeting.
    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }

    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub fn with_tls_context(mut self, tls_context: Option<TlsContext>) -> Self {
        self.tls_context = tls_context;
        self
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_mechanisms(mut self, mechanisms: Mechanisms) -> Self {
        self.mechanisms = mechanisms;
        self
    }

    #[must_use]
    pub fn build(self) -> SessionConfig {
        SessionConfig {
            hostname: self
                .hostname
                .filter(|hostname| !hostname.is_empty())
                .unwrap_or_else(|| {
                    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
                }),
            greeting: self.greeting,
            extensions: self.extensions,
            tls_context: self.tls_context,
            limits: self.limits,
            timeouts: self.timeouts,
            hooks: self.hooks,
            mechanisms: self.mechanisms,
        }
    }
}

/// Whether the dispatcher should read another command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Close,
}

pub struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> {
    state: SessionState,
    connection: Connection<Stream>,
    config: SessionConfig,
    started_at: Instant,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send + Sync> Session<Stream> {
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(?peer))]
    pub fn create(stream: Stream, peer: SocketAddr, config: SessionConfig) -> Self {
        tracing::debug!("Config: {config:?}");

        Self {
            state: SessionState::new(peer),
            connection: Connection::new(stream),
            config,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the conversation until the client quits, the connection fails,
    /// or `signal` announces a shutdown.
    ///
    /// # Errors
    /// Returns a [`SessionError`] when the transport fails, a timeout is
    /// reached, or the server shuts the session down.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, fields(peer = ?self.state.peer))]
    pub async fn run(mut self, mut signal: broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        internal!("Connected");

        let result = self.converse(&mut signal).await;

        internal!("Connection closed");

        result
    }

    async fn converse(
        &mut self,
        signal: &mut broadcast::Receiver<Signal>,
    ) -> Result<(), SessionError> {
        self.greet().await?;

        loop {
            let lifetime = self.started_at.elapsed();
            if lifetime >= self.config.timeouts.connection_timeout() {
                tracing::warn!(
                    peer = ?self.state.peer,
                    duration_secs = lifetime.as_secs(),
                    max_secs = self.config.timeouts.connection_secs,
                    "Connection exceeded maximum lifetime, closing"
                );
                self.abandon_message().await;
                return Err(SessionError::Timeout(self.config.timeouts.connection_secs));
            }

            let line = tokio::select! {
                received = signal.recv() => match received {
                    Ok(Signal::Shutdown) | Err(RecvError::Closed) => {
                        self.shut_down().await;
                        return Err(SessionError::Shutdown);
                    }
                    Ok(Signal::Finalised) | Err(RecvError::Lagged(_)) => continue,
                },
                line = self.next_line() => line,
            };

            let outcome = match line {
                Ok(Line::Complete(line)) => self.dispatch(&line).await,
                Ok(Line::TooLong) => {
                    incoming!(level = DEBUG, "<line too long>");
                    self.reply(Reply::single(Status::SyntaxError, "Line too long.")).await
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close) => return Ok(()),
                Err(err) => {
                    if self.recover(err).await? == Flow::Close {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn greet(&mut self) -> CommandResult<()> {
        let text = self.config.greeting.clone().unwrap_or_else(|| {
            format!("{} Simple Mail Transfer Service Ready.", self.config.hostname)
        });
        let reply = self
            .config
            .hooks
            .started(&self.state, Reply::single(Status::ServiceReady, text))
            .await;

        if !reply.is_positive() {
            internal!(level = INFO, "Session rejected with {}", reply.code());
            self.state.rejected = true;
        }

        self.connection.send(&reply).await?;
        Ok(())
    }

    /// Apply the error policy to a failed command.
    async fn recover(&mut self, err: CommandError) -> Result<Flow, SessionError> {
        match err {
            CommandError::Recoverable(reason) => {
                internal!(level = ERROR, "{reason}");
                let reply = Reply::single(Status::SyntaxError, "Internal server error.");
                self.connection
                    .send(&reply)
                    .await
                    .map_err(CommandError::from)?;
                Ok(Flow::Continue)
            }
            CommandError::Fatal(ConnectionError::Closed) => {
                internal!(level = DEBUG, "Connection closed by peer");
                self.abandon_message().await;
                Ok(Flow::Close)
            }
            CommandError::Fatal(ConnectionError::TimedOut) => {
                tracing::warn!(
                    peer = ?self.state.peer,
                    timeout_secs = self.config.timeouts.command_secs,
                    "Client connection timed out"
                );
                self.abandon_message().await;
                let reply = Reply::single(Status::Unavailable, "Idle timeout, closing connection.");
                if let Err(err) = self.connection.send(&reply).await {
                    internal!(level = DEBUG, "Unable to send timeout reply: {err}");
                }
                Err(SessionError::Timeout(self.config.timeouts.command_secs))
            }
            err => {
                internal!(level = ERROR, "{err}");
                self.abandon_message().await;
                Err(err.into())
            }
        }
    }

    async fn shut_down(&mut self) {
        internal!(level = DEBUG, "Shutting down session");
        self.abandon_message().await;

        let reply = Reply::single(
            Status::Unavailable,
            format!(
                "{} Service shutting down, closing transmission channel.",
                self.config.hostname
            ),
        );
        if let Err(err) = self.connection.send(&reply).await {
            internal!(level = DEBUG, "Unable to send shutdown reply: {err}");
        }
    }

    /// Read the next line, giving up after the idle timeout.
    async fn next_line(&mut self) -> CommandResult<Line> {
        tokio::time::timeout(
            self.config.timeouts.command_timeout(),
            self.connection.read_line(MAX_LINE_LENGTH),
        )
        .await
        .map_err(|_| ConnectionError::TimedOut)?
        .map_err(CommandError::from)
    }

    async fn reply(&mut self, reply: Reply) -> CommandResult<Flow> {
        self.connection.send(&reply).await?;
        Ok(Flow::Continue)
    }

    /// Drop the transaction, telling the hooks if a message was in progress.
    async fn abandon_message(&mut self) {
        self.cancel_message().await;
        self.state.reset();
    }

    /// Tell the hooks the open chunked message will not be stored. Later
    /// chunks of the same message are drained into a [`DiscardSink`] and
    /// the hooks hear about it only once.
    async fn cancel_message(&mut self) {
        if self.state.has_open_sink() && !self.state.message_canceled {
            self.config.hooks.message_canceled(&self.state).await;
            self.state.message_canceled = true;
            self.state.message_sink = Some(Box::new(DiscardSink::default()));
        }
    }

    async fn dispatch(&mut self, line: &[u8]) -> CommandResult<Flow> {
        let line = String::from_utf8_lossy(line);
        let (verb, arguments) = command::split(&line);

        let command = Verb::lookup(verb);

        // Initial SASL responses carry credentials.
        if command == Some(Verb::Auth) {
            incoming!("{verb} ...");
        } else {
            incoming!("{line}");
        }

        let Some(command) = command else {
            return self.unrecognised(verb).await;
        };

        if self.state.rejected && command != Verb::Quit {
            return self.reply(Reply::rejected()).await;
        }

        match command {
            Verb::Ehlo => self.ehlo(arguments).await,
            Verb::Helo => self.helo(arguments).await,
            Verb::StartTls => self.start_tls(arguments).await,
            Verb::Auth => self.auth(arguments).await,
            Verb::Mail => self.mail(arguments).await,
            Verb::Rcpt => self.rcpt(arguments).await,
            Verb::Data => self.data(arguments).await,
            Verb::Bdat => self.bdat(arguments).await,
            Verb::Rset => self.rset().await,
            Verb::Noop => self.reply(Reply::ok()).await,
            Verb::Quit => self.quit().await,
        }
    }

    async fn unrecognised(&mut self, verb: &str) -> CommandResult<Flow> {
        self.state.bad_command_count += 1;

        let max = self.config.limits.max_bad_commands;
        if max != 0 && self.state.bad_command_count > max {
            internal!(level = INFO, "Too many bad commands");
            self.reply(Reply::single(
                Status::Unavailable,
                "Too many bad commands, closing transmission channel.",
            ))
            .await?;
            return Ok(Flow::Close);
        }

        self.reply(Reply::single(
            Status::NotImplemented,
            format!(
                "Error: command '{}' not recognized.",
                excerpt(&verb.to_ascii_uppercase())
            ),
        ))
        .await
    }
}
