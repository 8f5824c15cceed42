pub mod auth;
pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod hooks;
pub mod received;
pub mod reply;
pub mod session;
pub mod sink;
pub mod state;
pub mod transaction;

use std::{fmt, net::SocketAddr, sync::Arc};

use postern_common::{
    Signal,
    config::ServerTimeouts,
    error::{ProtocolError, SessionError},
    traits::protocol::{Protocol, SessionHandler},
};
use serde::Deserialize;
use tokio::net::TcpStream;

use crate::{
    auth::{Authenticator, Mechanisms},
    extensions::Extension,
    hooks::{DefaultHooks, SessionHooks},
    session::{Limits, Session, SessionConfig, TlsContext},
};

/// Smallest message size limit a listener may be configured with.
const MIN_MESSAGE_SIZE: usize = 500;

#[derive(Default, Deserialize)]
pub struct Smtp;

#[derive(Clone, Deserialize)]
pub struct SmtpArgs {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    greeting: Option<String>,
    #[serde(default)]
    tls: Option<TlsContext>,
    #[serde(default = "Extension::defaults")]
    extensions: Vec<Extension>,
    #[serde(default)]
    limits: Limits,
    #[serde(default)]
    timeouts: ServerTimeouts,
    /// Offer AUTH over connections that have not negotiated TLS.
    #[serde(default)]
    allow_insecure_auth: bool,
    #[serde(skip, default = "default_hooks")]
    hooks: Arc<dyn SessionHooks>,
    #[serde(skip)]
    authenticator: Option<Arc<dyn Authenticator>>,
}

fn default_hooks() -> Arc<dyn SessionHooks> {
    Arc::new(DefaultHooks)
}

impl Default for SmtpArgs {
    fn default() -> Self {
        Self {
            hostname: None,
            greeting: None,
            tls: None,
            extensions: Extension::defaults(),
            limits: Limits::default(),
            timeouts: ServerTimeouts::default(),
            allow_insecure_auth: false,
            hooks: default_hooks(),
            authenticator: None,
        }
    }
}

impl fmt::Debug for SmtpArgs {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("SmtpArgs")
            .field("hostname", &self.hostname)
            .field("greeting", &self.greeting)
            .field("tls", &self.tls)
            .field("extensions", &self.extensions)
            .field("limits", &self.limits)
            .field("timeouts", &self.timeouts)
            .field("allow_insecure_auth", &self.allow_insecure_auth)
            .field("authenticator", &self.authenticator.is_some())
            .finish_non_exhaustive()
    }
}

impl SmtpArgs {
    /// Create a new `SmtpArgs` builder
    #[must_use]
    pub fn builder() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the TLS context for STARTTLS support
    #[must_use]
    pub fn with_tls(mut self, tls: Option<TlsContext>) -> Self {
        self.tls = tls;
        self
    }

    /// Set the SMTP extensions supported by this server
    #[must_use]
    pub fn with_extensions(mut self, extensions: Vec<Extension>) -> Self {
        self.extensions = extensions;
        self
    }

    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Install the hooks every session of this listener reports to
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Enable AUTH, checking credentials with `authenticator`
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    #[must_use]
    pub const fn limits(&self) -> &Limits {
        &self.limits
    }

    fn session_config(self) -> SessionConfig {
        let mechanisms = self
            .authenticator
            .map(|authenticator| {
                Mechanisms::with_authenticator(authenticator, self.allow_insecure_auth)
            })
            .unwrap_or_default();

        let builder = SessionConfig::builder()
            .with_extensions(self.extensions)
            .with_tls_context(self.tls)
            .with_limits(self.limits)
            .with_timeouts(self.timeouts)
            .with_hooks(self.hooks)
            .with_mechanisms(mechanisms);

        let builder = match self.hostname {
            Some(hostname) => builder.with_hostname(hostname),
            None => builder,
        };

        match self.greeting {
            Some(greeting) => builder.with_greeting(greeting),
            None => builder,
        }
        .build()
    }
}

impl Protocol for Smtp {
    type Session = Session<TcpStream>;
    type Args = SmtpArgs;

    fn ty() -> &'static str {
        "SMTP"
    }

    #[tracing::instrument(level = tracing::Level::TRACE, skip(self, stream, args))]
    fn handle(&self, stream: TcpStream, peer: SocketAddr, args: Self::Args) -> Self::Session {
        Session::create(stream, peer, args.session_config())
    }

    #[tracing::instrument(skip(self, args))]
    fn validate(&mut self, args: &mut Self::Args) -> Result<(), ProtocolError> {
        if let Some(tls) = args.tls.as_ref() {
            if !tls.certificate.try_exists()? {
                return Err(ProtocolError::MissingFile {
                    what: "TLS certificate",
                    path: tls.certificate.display().to_string(),
                });
            }

            if !tls.key.try_exists()? {
                return Err(ProtocolError::MissingFile {
                    what: "TLS key",
                    path: tls.key.display().to_string(),
                });
            }
        }

        if args.limits.max_message_size < MIN_MESSAGE_SIZE {
            return Err(ProtocolError::InvalidConfiguration {
                field: "max_message_size".to_string(),
                reason: format!("must be at least {MIN_MESSAGE_SIZE}"),
            });
        }

        if args.limits.max_recipients < 1 {
            return Err(ProtocolError::InvalidConfiguration {
                field: "max_recipients".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if args.hostname.as_deref().is_some_and(str::is_empty) {
            args.hostname = None;
        }

        Ok(())
    }
}

impl SessionHandler for Session<TcpStream> {
    async fn run(self, signal: tokio::sync::broadcast::Receiver<Signal>) -> Result<(), SessionError> {
        Self::run(self, signal).await
    }
}
