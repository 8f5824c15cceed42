//! SASL authentication for the AUTH command (RFC 4954).
//!
//! Mechanisms are created fresh for every AUTH attempt from a registry of
//! factories. The shipped mechanisms only parse the exchange; verifying
//! credentials is left to an embedder supplied [`Authenticator`].

mod login;
mod plain;

use std::{fmt, sync::Arc};

use async_trait::async_trait;

pub use self::{login::Login, plain::Plain};

/// Checks credentials on behalf of the PLAIN and LOGIN mechanisms.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `authzid` is empty when the client did not ask to act as someone else.
    async fn authenticate(&self, authzid: &str, authcid: &str, password: &str) -> bool;
}

/// Server side of a SASL mechanism.
#[async_trait]
pub trait SaslMechanism: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the mechanism may only be offered over TLS.
    fn requires_secure_channel(&self) -> bool;

    fn reset(&mut self);

    /// Feed the next client response, returning the next server challenge.
    async fn step(&mut self, client: &[u8]) -> Vec<u8>;

    fn is_completed(&self) -> bool;

    fn is_authenticated(&self) -> bool;

    fn user_name(&self) -> Option<&str>;
}

type Factory = Arc<dyn Fn() -> Box<dyn SaslMechanism> + Send + Sync>;

/// The mechanisms a listener offers, in advertisement order.
#[derive(Clone, Default)]
pub struct Mechanisms {
    factories: Vec<Factory>,
}

impl Mechanisms {
    /// PLAIN and LOGIN backed by `authenticator`.
    ///
    /// With `allow_insecure` unset both mechanisms are only offered over TLS.
    #[must_use]
    pub fn with_authenticator(authenticator: Arc<dyn Authenticator>, allow_insecure: bool) -> Self {
        let plain = Arc::clone(&authenticator);

        Self::default()
            .register(move || Box::new(Plain::new(Arc::clone(&plain), !allow_insecure)))
            .register(move || Box::new(Login::new(Arc::clone(&authenticator), !allow_insecure)))
    }

    #[must_use]
    pub fn register<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn SaslMechanism> + Send + Sync + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Names to advertise over a channel in the given state.
    #[must_use]
    pub fn names(&self, secure: bool) -> Vec<&'static str> {
        self.factories
            .iter()
            .map(|factory| factory())
            .filter(|mechanism| secure || !mechanism.requires_secure_channel())
            .map(|mechanism| mechanism.name())
            .collect()
    }

    /// A fresh instance of the named mechanism, if it is offered over a
    /// channel in the given state.
    #[must_use]
    pub fn create(&self, name: &str, secure: bool) -> Option<Box<dyn SaslMechanism>> {
        self.factories
            .iter()
            .map(|factory| factory())
            .find(|mechanism| mechanism.name().eq_ignore_ascii_case(name))
            .filter(|mechanism| secure || !mechanism.requires_secure_channel())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for Mechanisms {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_list().entries(self.names(true)).finish()
    }
}
