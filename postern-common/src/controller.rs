use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::broadcast::Receiver;

use crate::{
    Signal, error::ProtocolError, internal, listener::Listener, traits::Protocol,
};

#[derive(Default, Deserialize)]
pub struct Controller<Proto: Protocol> {
    #[serde(alias = "listener")]
    listeners: Vec<Listener<Proto>>,
}

impl<Proto: Protocol> Controller<Proto> {
    pub fn listeners(&self) -> &[Listener<Proto>] {
        &self.listeners
    }

    /// Map over the args of all listeners, allowing modification before initialization
    ///
    /// This is how runtime collaborators that cannot be deserialized (hooks,
    /// authenticators) get injected.
    pub fn map_args<F>(&mut self, f: F)
    where
        F: Fn(Proto::Args) -> Proto::Args,
    {
        for listener in &mut self.listeners {
            listener.map_args(&f);
        }
    }

    ///
    /// Initialise this controller
    ///
    /// # Errors
    /// Any listener whose arguments fail validation
    ///
    pub fn init(&mut self) -> Result<(), ProtocolError> {
        internal!("Initialising Controller for {}", Proto::ty());

        self.listeners.iter_mut().try_for_each(Listener::init)
    }

    ///
    /// # Errors
    /// If any of the listeners have a failure
    ///
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all)]
    pub async fn control(self, signal: Receiver<Signal>) -> anyhow::Result<()> {
        join_all(
            self.listeners
                .iter()
                .map(|listener| listener.serve(signal.resubscribe())),
        )
        .await
        .into_iter()
        .try_for_each(|result| result.map_err(anyhow::Error::from))
    }
}
