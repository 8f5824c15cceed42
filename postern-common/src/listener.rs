use std::net::SocketAddr;

use futures_util::future::join_all;
use serde::Deserialize;
use tokio::{
    net::TcpListener,
    sync::broadcast::{Receiver, error::RecvError},
};

use crate::{
    Signal,
    error::{ListenerError, ProtocolError},
    internal,
    traits::protocol::{Protocol, SessionHandler},
};

#[derive(Deserialize)]
pub struct Listener<Proto: Protocol> {
    #[serde(skip)]
    handler: Proto,
    socket: SocketAddr,
    #[serde(default)]
    args: Proto::Args,
}

impl<Proto: Protocol> Listener<Proto> {
    pub const fn socket(&self) -> SocketAddr {
        self.socket
    }

    pub const fn args(&self) -> &Proto::Args {
        &self.args
    }

    pub(crate) fn map_args<F>(&mut self, f: &F)
    where
        F: Fn(Proto::Args) -> Proto::Args,
    {
        self.args = f(std::mem::take(&mut self.args));
    }

    /// Validate (and complete) the arguments for this listener.
    ///
    /// # Errors
    /// Whatever the protocol rejects about its arguments.
    #[tracing::instrument(skip(self), fields(socket = %self.socket))]
    pub fn init(&mut self) -> Result<(), ProtocolError> {
        self.handler.validate(&mut self.args)
    }

    /// Accept connections until a shutdown signal arrives, then wait for the
    /// sessions in flight to finish.
    ///
    /// # Errors
    /// Binding the socket or accepting a connection failed.
    #[tracing::instrument(level = tracing::Level::TRACE, skip(self, shutdown), fields(socket = %self.socket))]
    pub async fn serve(&self, mut shutdown: Receiver<Signal>) -> Result<(), ListenerError> {
        internal!(level = INFO, "Serving {} on {}", Proto::ty(), self.socket);

        let mut sessions = Vec::default();
        let listener =
            TcpListener::bind(self.socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: self.socket.to_string(),
                    source,
                })?;

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown) | Err(RecvError::Closed)) {
                        internal!(level = INFO, "{} Listener {} Received Shutdown signal, finishing sessions ...", Proto::ty(), self.socket);
                        join_all(sessions).await;
                        return Ok(());
                    }
                }

                connection = listener.accept() => {
                    let (stream, address) = connection?;
                    tracing::debug!("Connection received on {} from {address}", self.socket);

                    let handler = self.handler.handle(stream, address, self.args.clone());
                    let signal = shutdown.resubscribe();

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = handler.run(signal).await {
                            if err.is_shutdown() {
                                internal!(level = DEBUG, "{address}: {err}");
                            } else if err.is_client_error() {
                                internal!(level = INFO, "{address}: {err}");
                            } else {
                                internal!(level = ERROR, "{address}: {err}");
                            }
                        }
                    }));

                    sessions.retain(|session| !session.is_finished());
                }
            }
        }
    }
}
