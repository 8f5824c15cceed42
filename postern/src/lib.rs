use std::sync::LazyLock;

use postern_common::{Signal, controller::Controller, internal, logging};
use postern_smtp::Smtp;
use serde::Deserialize;
use tokio::sync::broadcast;

#[derive(Default, Deserialize)]
pub struct Postern {
    #[serde(alias = "smtp_controller")]
    smtp: Controller<Smtp>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = tracing::Level::TRACE)]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

impl Postern {
    /// The SMTP listeners, for injecting hooks and authenticators before
    /// [`Postern::run`].
    pub const fn smtp_mut(&mut self) -> &mut Controller<Smtp> {
        &mut self.smtp
    }

    /// Run every configured listener until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// This function will return an error if a listener's configuration is
    /// invalid or it cannot bind its socket.
    #[tracing::instrument(level = tracing::Level::TRACE, skip_all, err)]
    pub async fn run(mut self) -> anyhow::Result<()> {
        logging::init();

        internal!("Controller running");

        self.smtp.init()?;

        let ret = tokio::select! {
            r = self.smtp.control(SHUTDOWN_BROADCAST.subscribe()) => {
                let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");

        ret
    }
}
