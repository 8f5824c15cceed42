use std::sync::Arc;

use async_trait::async_trait;

use super::{Authenticator, SaslMechanism};

/// RFC 4616: `[authzid] NUL authcid NUL passwd` in a single response.
pub struct Plain {
    authenticator: Arc<dyn Authenticator>,
    requires_secure: bool,
    challenged: bool,
    completed: bool,
    authenticated: bool,
    user: Option<String>,
}

impl Plain {
    pub fn new(authenticator: Arc<dyn Authenticator>, requires_secure: bool) -> Self {
        Self {
            authenticator,
            requires_secure,
            challenged: false,
            completed: false,
            authenticated: false,
            user: None,
        }
    }
}

#[async_trait]
impl SaslMechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn requires_secure_channel(&self) -> bool {
        self.requires_secure
    }

    fn reset(&mut self) {
        self.challenged = false;
        self.completed = false;
        self.authenticated = false;
        self.user = None;
    }

    async fn step(&mut self, client: &[u8]) -> Vec<u8> {
        // No initial response: ask for one with an empty challenge, once.
        if client.is_empty() && !self.challenged {
            self.challenged = true;
            return Vec::new();
        }

        self.completed = true;

        if client.is_empty() {
            return Vec::new();
        }

        let Ok(message) = std::str::from_utf8(client) else {
            return Vec::new();
        };

        let parts = message.split('\0').collect::<Vec<_>>();
        if let [authzid, authcid, password] = parts[..]
            && !authcid.is_empty()
        {
            self.authenticated = self
                .authenticator
                .authenticate(authzid, authcid, password)
                .await;
            self.user = Some(authcid.to_string());
        }

        Vec::new()
    }

    fn is_completed(&self) -> bool {
        self.completed
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn user_name(&self) -> Option<&str> {
        self.user.as_deref()
    }
}
